//! Debuggee launcher
//!
//! In manual loading mode ocamldebug listens on a socket and waits for the
//! program to connect. The program finds the socket through
//! `CAML_DEBUG_SOCKET`. The launcher is its own task: the session hands it a
//! [`Rendezvous`] when the debugger reports it is waiting, and hears back
//! only about output, exit and Ctrl-C typed into the program's input.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use super::codec::decode_latin1;
use super::process::encode_latin1;
use crate::common::{Error, Result};

/// Environment variable naming the debugger's socket
pub const SOCKET_ENV: &str = "CAML_DEBUG_SOCKET";

/// End-of-text: Ctrl-C typed into the program's input
const ETX: &str = "\x03";

/// Where the debugger and the debuggee meet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendezvous {
    socket: String,
}

impl Rendezvous {
    pub fn new(socket: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn tcp(host: &str, port: u16) -> Self {
        Self::new(format!("{}:{}", host, port))
    }

    /// `host:port` (or a socket path), as given to `set socket`
    pub fn socket(&self) -> &str {
        &self.socket
    }
}

/// The program to run under the debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug)]
enum Request {
    Start {
        rendezvous: Rendezvous,
        target: Target,
    },
    Input(String),
    Interrupt,
    Stop,
}

/// What the launcher reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggeeNotice {
    Started { socket: String, pid: Option<u32> },
    Output(String),
    Exited(Option<i32>),
    /// Ctrl-C was typed into the program's input
    InterruptRequested,
    Failed(String),
}

/// Handle to the launcher task
#[derive(Clone)]
pub struct DebuggeeLauncher {
    tx: mpsc::UnboundedSender<Request>,
}

impl DebuggeeLauncher {
    /// Spawn the launcher task
    pub fn spawn(notices: mpsc::UnboundedSender<DebuggeeNotice>, terminate_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Launcher {
            child: None,
            stdin: None,
            notices,
            terminate_timeout,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    /// Start (or restart) the program, pointed at `rendezvous`
    pub fn start(&self, rendezvous: Rendezvous, target: Target) {
        let _ = self.tx.send(Request::Start { rendezvous, target });
    }

    /// Write to the program's stdin; a lone ETX is relayed as an interrupt
    pub fn input(&self, text: impl Into<String>) {
        let _ = self.tx.send(Request::Input(text.into()));
    }

    pub fn interrupt(&self) {
        let _ = self.tx.send(Request::Interrupt);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(Request::Stop);
    }
}

struct Launcher {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    notices: mpsc::UnboundedSender<DebuggeeNotice>,
    terminate_timeout: Duration,
}

impl Launcher {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>) {
        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                status = wait_child(&mut self.child) => {
                    let code = status.and_then(|s| s.code());
                    tracing::info!(?code, "Debuggee exited");
                    self.child = None;
                    self.stdin = None;
                    let _ = self.notices.send(DebuggeeNotice::Exited(code));
                }
            }
        }
        self.terminate().await;
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Start { rendezvous, target } => {
                self.terminate().await;
                match self.launch(&rendezvous, &target) {
                    Ok(pid) => {
                        let _ = self.notices.send(DebuggeeNotice::Started {
                            socket: rendezvous.socket().to_string(),
                            pid,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not start debuggee");
                        let _ = self.notices.send(DebuggeeNotice::Failed(e.to_string()));
                    }
                }
            }
            Request::Input(text) => {
                if text == ETX {
                    let _ = self.notices.send(DebuggeeNotice::InterruptRequested);
                    return;
                }
                if let Some(stdin) = self.stdin.as_mut() {
                    let bytes = encode_latin1(&text);
                    if let Err(e) = stdin.write_all(&bytes).await {
                        tracing::debug!(error = %e, "Debuggee stdin closed");
                        self.stdin = None;
                    } else {
                        let _ = stdin.flush().await;
                    }
                }
            }
            Request::Interrupt => self.interrupt(),
            Request::Stop => self.terminate().await,
        }
    }

    fn launch(&mut self, rendezvous: &Rendezvous, target: &Target) -> Result<Option<u32>> {
        let mut cmd = Command::new(&target.program);
        cmd.args(&target.args)
            .env(SOCKET_ENV, rendezvous.socket())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::LaunchFailed(format!("{}: {}", target.program.display(), e))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, self.notices.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, self.notices.clone()));
        }
        self.stdin = child.stdin.take();

        let pid = child.id();
        tracing::info!(
            program = %target.program.display(),
            socket = rendezvous.socket(),
            ?pid,
            "Debuggee started"
        );
        self.child = Some(child);
        Ok(pid)
    }

    #[cfg(unix)]
    fn interrupt(&self) {
        if let Some(pid) = self.child.as_ref().and_then(|c| c.id()) {
            if let Err(e) = super::process::signal(pid, libc::SIGINT) {
                tracing::debug!(error = %e, "Could not interrupt debuggee");
            }
        }
    }

    #[cfg(not(unix))]
    fn interrupt(&self) {}

    /// Terminate, wait a bounded time, then kill
    async fn terminate(&mut self) {
        self.stdin = None;
        let Some(mut child) = self.child.take() else {
            return;
        };

        #[cfg(unix)]
        let asked = child
            .id()
            .map(|pid| super::process::signal(pid, libc::SIGTERM).is_ok())
            .unwrap_or(false);
        #[cfg(not(unix))]
        let asked = false;

        if asked {
            if let Ok(Ok(status)) = tokio::time::timeout(self.terminate_timeout, child.wait()).await {
                let _ = self.notices.send(DebuggeeNotice::Exited(status.code()));
                return;
            }
        }
        let _ = child.kill().await;
        let code = child.try_wait().ok().flatten().and_then(|s| s.code());
        let _ = self.notices.send(DebuggeeNotice::Exited(code));
    }
}

async fn wait_child(child: &mut Option<Child>) -> Option<std::process::ExitStatus> {
    match child {
        Some(child) => child.wait().await.ok(),
        None => std::future::pending().await,
    }
}

async fn forward_output<R: AsyncRead + Unpin>(mut reader: R, notices: mpsc::UnboundedSender<DebuggeeNotice>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if notices
                    .send(DebuggeeNotice::Output(decode_latin1(&buf[..n])))
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}
