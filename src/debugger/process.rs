//! The ocamldebug subprocess
//!
//! ocamldebug prints its prompt on stdout and its errors on stderr. Both are
//! read as one stream, so an error always lands before the prompt that
//! follows it; the stream is cut into classifier chunks and forwarded,
//! tagged with the process generation, to whoever owns the session. Lines to
//! the debugger go through a writer task so the session never blocks on a
//! full pipe.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use super::codec::LineSplitter;
use super::command::CommandSink;
use crate::common::{Error, Result};

/// Output of a debugger process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    Chunk { generation: u64, text: String },
    /// stdout reached end of file
    Closed { generation: u64 },
}

/// Encode a command line as Latin-1, replacing what does not fit
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// A running debugger
pub struct DebuggerProcess {
    child: Child,
    generation: u64,
    stdin: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl DebuggerProcess {
    /// Spawn `program` with `args`, forwarding its output to `output`
    pub fn spawn(
        program: &Path,
        args: &[String],
        generation: u64,
        output: mpsc::UnboundedSender<ProcessOutput>,
        flush_after: Duration,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::piped()).kill_on_drop(true);
        #[cfg(unix)]
        let merged = merge_output(&mut cmd)?;
        // no socket pairs: two pipes, stderr unordered against stdout
        #[cfg(not(unix))]
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::LaunchFailed(format!("{}: {}", program.display(), e)))?;
        // the child now holds the only write ends of its output
        drop(cmd);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::LaunchFailed("Failed to get debugger stdin".to_string()))?;

        tracing::info!(
            program = %program.display(),
            pid = ?child.id(),
            generation,
            "Debugger started"
        );

        #[cfg(unix)]
        spawn_reader(merged, generation, output, flush_after, true);
        #[cfg(not(unix))]
        {
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| Error::LaunchFailed("Failed to get debugger stdout".to_string()))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| Error::LaunchFailed("Failed to get debugger stderr".to_string()))?;
            spawn_reader(stdout, generation, output.clone(), flush_after, true);
            spawn_reader(stderr, generation, output, flush_after, false);
        }

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_input(stdin, stdin_rx));

        Ok(Self {
            child,
            generation,
            stdin: Some(stdin_tx),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Deliver SIGINT, the equivalent of Ctrl-C at the debugger's terminal
    #[cfg(unix)]
    pub fn interrupt(&self) -> Result<()> {
        let pid = self.pid().ok_or(Error::DebuggerNotRunning)?;
        signal(pid, libc::SIGINT)
    }

    #[cfg(not(unix))]
    pub fn interrupt(&self) -> Result<()> {
        Err(Error::Unsupported(
            "Ctrl-C is not supported on this platform".to_string(),
        ))
    }

    #[cfg(unix)]
    fn request_exit(&self) {
        if let Some(pid) = self.pid() {
            let _ = signal(pid, libc::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        let _ = self.child.start_kill();
    }

    /// Stop the debugger: close stdin, ask it to terminate, wait up to
    /// `timeout`, then kill it
    pub async fn terminate(mut self, timeout: Duration) -> Option<i32> {
        self.stdin.take();
        self.request_exit();

        let status = match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Waiting for debugger failed");
                None
            }
            Err(_) => {
                tracing::debug!(generation = self.generation, "Debugger did not exit, killing it");
                let _ = self.child.kill().await;
                self.child.try_wait().ok().flatten()
            }
        };

        tracing::info!(generation = self.generation, ?status, "Debugger stopped");
        status.and_then(|s| s.code())
    }
}

impl CommandSink for DebuggerProcess {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_ref().ok_or(Error::DebuggerNotRunning)?;
        let mut bytes = encode_latin1(line);
        bytes.push(b'\n');
        stdin.send(bytes).map_err(|_| Error::DebuggerNotRunning)
    }
}

impl Drop for DebuggerProcess {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

#[cfg(unix)]
pub(crate) fn signal(pid: u32, sig: libc::c_int) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| Error::Internal(format!("pid {} out of range", pid)))?;
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(pid, sig) };
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::Io(std::io::Error::last_os_error()))
    }
}

/// Point the child's stdout and stderr at one socket and return our end
#[cfg(unix)]
fn merge_output(cmd: &mut Command) -> Result<tokio::net::UnixStream> {
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    let (ours, theirs) = UnixStream::pair()?;
    let theirs = OwnedFd::from(theirs);
    cmd.stdout(Stdio::from(theirs.try_clone()?))
        .stderr(Stdio::from(theirs));

    ours.set_nonblocking(true)?;
    Ok(tokio::net::UnixStream::from_std(ours)?)
}

/// Read `reader` in a task; `closes` sends `Closed` at its end
fn spawn_reader<R>(
    reader: R,
    generation: u64,
    output: mpsc::UnboundedSender<ProcessOutput>,
    flush_after: Duration,
    closes: bool,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        read_output(reader, generation, &output, flush_after).await;
        if closes {
            let _ = output.send(ProcessOutput::Closed { generation });
        }
    });
}

/// Forward output as classifier chunks, flushing a partial line after
/// `flush_after` of silence
async fn read_output<R: AsyncRead + Unpin>(
    mut reader: R,
    generation: u64,
    output: &mpsc::UnboundedSender<ProcessOutput>,
    flush_after: Duration,
) {
    let mut splitter = LineSplitter::new();
    let mut buf = [0u8; 4096];

    loop {
        let read = if splitter.has_pending() {
            match tokio::time::timeout(flush_after, reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    if let Some(text) = splitter.flush() {
                        if output.send(ProcessOutput::Chunk { generation, text }).is_err() {
                            return;
                        }
                    }
                    continue;
                }
            }
        } else {
            reader.read(&mut buf).await
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                for text in splitter.push(&buf[..n]) {
                    if output.send(ProcessOutput::Chunk { generation, text }).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, generation, "Debugger output read failed");
                break;
            }
        }
    }

    if let Some(text) = splitter.flush() {
        let _ = output.send(ProcessOutput::Chunk { generation, text });
    }
}

async fn write_input(mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = lines.recv().await {
        if let Err(e) = stdin.write_all(&bytes).await {
            tracing::debug!(error = %e, "Debugger stdin closed");
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}
