//! Debugger session controller
//!
//! One tokio task owns the debugger process, the debuggee launcher, the
//! target watcher and the [`SessionCore`]. Everything else talks to it
//! through a cloneable [`SessionHandle`]; what happens in the session is
//! published as [`SessionEvent`]s.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::common::config::SessionConfig;
use crate::common::settings::{self, SharedSettings};
use crate::common::{Error, Result};
use crate::debugger::arguments::Arguments;
use crate::debugger::breakpoints::{self, Breakpoint};
use crate::debugger::command::{Command, CommandOutcome, Visibility};
use crate::debugger::core::{self, Effects, SessionCore};
use crate::debugger::debuggee::{DebuggeeLauncher, DebuggeeNotice, Rendezvous, Target};
use crate::debugger::events::{SessionEvent, SessionState};
use crate::debugger::port;
use crate::debugger::process::{DebuggerProcess, ProcessOutput};
use crate::debugger::protocol::StopLocation;
use crate::debugger::stack::Frame;
use crate::debugger::watcher::FileWatcher;

/// Snapshot of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub command_line: Option<String>,
    pub target: Option<String>,
    pub debugger_pid: Option<u32>,
    pub port: Option<u16>,
    pub location: Option<StopLocation>,
    pub time: i64,
    pub breakpoints: usize,
    pub pending: Vec<String>,
    pub show_all_commands: bool,
}

/// Result of a start or restart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartReport {
    pub status: SessionStatus,
    /// Problems that did not prevent the start
    pub warnings: Vec<String>,
}

/// Frames of the last `backtrace`, with the selected one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backtrace {
    pub frames: Vec<Frame>,
    pub current: Option<u32>,
}

/// A completed command and where it left the program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub command: String,
    pub result: String,
    pub location: Option<StopLocation>,
    pub time: i64,
}

enum SessionRequest {
    Start {
        arguments: Arguments,
        reply: oneshot::Sender<Result<StartReport>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
    Restart {
        reply: oneshot::Sender<Result<StartReport>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Interrupt {
        reply: oneshot::Sender<Result<()>>,
    },
    Enqueue {
        command: Command,
        reply: oneshot::Sender<Result<()>>,
    },
    Breakpoints {
        reply: oneshot::Sender<Vec<Breakpoint>>,
    },
    Frames {
        reply: oneshot::Sender<Backtrace>,
    },
    TimeForLine {
        line: usize,
        reply: oneshot::Sender<Result<i64>>,
    },
    Transcript {
        since: usize,
        reply: oneshot::Sender<Vec<(usize, String)>>,
    },
    History {
        reply: oneshot::Sender<Vec<String>>,
    },
    Verbose {
        enabled: Option<bool>,
        reply: oneshot::Sender<Result<bool>>,
    },
    DebuggeeInput {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to a running session controller
///
/// Dropping every handle stops the session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionRequest>,
}

impl SessionHandle {
    /// Spawn a controller; its events arrive on the returned receiver
    pub fn spawn(
        config: SessionConfig,
        settings: SharedSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = SessionController::new(config, settings, events_tx);
        tokio::spawn(controller.run(rx));
        (Self { tx }, events_rx)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionRequest,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| Error::SessionTerminated("session controller is gone".to_string()))?;
        rx.await
            .map_err(|_| Error::SessionTerminated("session controller dropped the request".to_string()))
    }

    /// Start the debugger on a classified command line
    pub async fn start(&self, arguments: Arguments) -> Result<StartReport> {
        self.request(|reply| SessionRequest::Start { arguments, reply })
            .await?
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| SessionRequest::Stop { reply }).await?
    }

    /// Stop and start again with the same command line
    pub async fn restart(&self) -> Result<StartReport> {
        self.request(|reply| SessionRequest::Restart { reply }).await?
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(|reply| SessionRequest::Status { reply }).await
    }

    /// Ctrl-C for the debugger and the debuggee
    pub async fn interrupt(&self) -> Result<()> {
        self.request(|reply| SessionRequest::Interrupt { reply })
            .await?
    }

    /// Queue a command without waiting for its result
    pub async fn send(&self, text: impl Into<String>, visibility: Visibility) -> Result<()> {
        let command = Command::new(text, visibility);
        self.request(|reply| SessionRequest::Enqueue { command, reply })
            .await?
    }

    /// Queue a command and wait up to `wait` for its result
    pub async fn execute(
        &self,
        text: impl Into<String>,
        visibility: Visibility,
        wait: Duration,
    ) -> Result<Execution> {
        let outcome = self.run(text.into(), visibility, wait).await?;
        let status = self.status().await?;
        Ok(Execution {
            command: outcome.command,
            result: outcome.result,
            location: status.location,
            time: status.time,
        })
    }

    async fn run(&self, text: String, visibility: Visibility, wait: Duration) -> Result<CommandOutcome> {
        let (done, outcome) = oneshot::channel();
        let command = Command::new(text.clone(), visibility).with_completion(done);
        self.request(|reply| SessionRequest::Enqueue { command, reply })
            .await??;

        match tokio::time::timeout(wait, outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::CommandDiscarded(text)),
            Err(_) => Err(Error::CommandTimeout {
                command: text,
                secs: wait.as_secs(),
            }),
        }
    }

    pub async fn breakpoints(&self) -> Result<Vec<Breakpoint>> {
        self.request(|reply| SessionRequest::Breakpoints { reply })
            .await
    }

    /// Break at a source position; `line` is 1-based, `column` 0-based
    pub async fn add_breakpoint(
        &self,
        file: &std::path::Path,
        line: u32,
        column: u32,
        wait: Duration,
    ) -> Result<Execution> {
        let command = breakpoints::break_command_for(file, line, column)?;
        self.execute(command, Visibility::ShowAll, wait).await
    }

    pub async fn remove_breakpoint(&self, id: u32, wait: Duration) -> Result<Execution> {
        if !self.breakpoints().await?.iter().any(|bp| bp.id == id) {
            return Err(Error::BreakpointNotFound { id });
        }
        self.execute(format!("del {}", id), Visibility::ShowAll, wait)
            .await
    }

    /// Run `backtrace` and `frame` quietly and return the parsed stack
    pub async fn backtrace(&self, wait: Duration) -> Result<Backtrace> {
        self.run("backtrace".to_string(), Visibility::HideAll, wait)
            .await?;
        self.run("frame".to_string(), Visibility::HideAll, wait)
            .await?;
        self.request(|reply| SessionRequest::Frames { reply }).await
    }

    /// Move to execution time `time`
    pub async fn goto_time(&self, time: i64, wait: Duration) -> Result<Execution> {
        self.execute(format!("goto {}", time), Visibility::ShowAll, wait)
            .await
    }

    /// Move to the execution time recorded nearest before transcript line `line`
    pub async fn goto_line(&self, line: usize, wait: Duration) -> Result<Execution> {
        let time = self
            .request(|reply| SessionRequest::TimeForLine { line, reply })
            .await??;
        self.goto_time(time, wait).await
    }

    /// Transcript lines numbered from `since`
    pub async fn transcript(&self, since: usize) -> Result<Vec<(usize, String)>> {
        self.request(|reply| SessionRequest::Transcript { since, reply })
            .await
    }

    pub async fn history(&self) -> Result<Vec<String>> {
        self.request(|reply| SessionRequest::History { reply }).await
    }

    /// Query or set the "show all commands" toggle; returns the new value
    pub async fn verbose(&self, enabled: Option<bool>) -> Result<bool> {
        self.request(|reply| SessionRequest::Verbose { enabled, reply })
            .await?
    }

    /// Write to the debugged program's stdin
    pub async fn debuggee_input(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request(|reply| SessionRequest::DebuggeeInput { text, reply })
            .await?
    }
}

struct SessionController {
    config: SessionConfig,
    settings: SharedSettings,
    core: SessionCore,
    state: SessionState,
    process: Option<DebuggerProcess>,
    generation: u64,
    arguments: Option<Arguments>,
    port: Option<u16>,
    launcher: DebuggeeLauncher,
    watcher: Option<FileWatcher>,
    events: mpsc::UnboundedSender<SessionEvent>,
    warnings: Vec<String>,
    output_tx: mpsc::UnboundedSender<ProcessOutput>,
    output_rx: mpsc::UnboundedReceiver<ProcessOutput>,
    notices_rx: mpsc::UnboundedReceiver<DebuggeeNotice>,
    changes_tx: mpsc::UnboundedSender<(u64, PathBuf)>,
    changes_rx: mpsc::UnboundedReceiver<(u64, PathBuf)>,
}

impl SessionController {
    fn new(
        config: SessionConfig,
        settings: SharedSettings,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let launcher = DebuggeeLauncher::spawn(notices_tx, config.terminate_timeout);

        Self {
            core: SessionCore::new(settings.clone(), config.history_size),
            config,
            settings,
            state: SessionState::Stopped,
            process: None,
            generation: 0,
            arguments: None,
            port: None,
            launcher,
            watcher: None,
            events,
            warnings: Vec::new(),
            output_tx,
            output_rx,
            notices_rx,
            changes_tx,
            changes_rx,
        }
    }

    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<SessionRequest>) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                Some(output) = self.output_rx.recv() => self.on_process_output(output).await,
                Some(notice) = self.notices_rx.recv() => self.on_debuggee(notice).await,
                Some((generation, path)) = self.changes_rx.recv() => {
                    self.on_file_changed(generation, path).await;
                }
            }
        }

        tracing::debug!("Session handles dropped, shutting down");
        self.teardown().await;
        self.launcher.stop();
    }

    async fn handle(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Start { arguments, reply } => {
                let result = if self.process.is_some() {
                    Err(Error::SessionAlreadyActive)
                } else {
                    self.start(arguments).await
                };
                let _ = reply.send(result);
            }
            SessionRequest::Stop { reply } => {
                let result = if self.process.is_none() {
                    Err(Error::SessionNotActive)
                } else {
                    self.stop().await;
                    Ok(())
                };
                let _ = reply.send(result);
            }
            SessionRequest::Restart { reply } => {
                let result = match self.arguments.clone() {
                    Some(arguments) => {
                        self.stop().await;
                        self.start(arguments).await
                    }
                    None => Err(Error::SessionNotActive),
                };
                let _ = reply.send(result);
            }
            SessionRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
            SessionRequest::Interrupt { reply } => {
                let _ = reply.send(self.interrupt());
            }
            SessionRequest::Enqueue { command, reply } => {
                let result = match self.process.as_mut() {
                    Some(process) => {
                        let fx = self.core.enqueue(command, process);
                        self.apply(fx).await;
                        Ok(())
                    }
                    None => Err(Error::SessionNotActive),
                };
                let _ = reply.send(result);
            }
            SessionRequest::Breakpoints { reply } => {
                let _ = reply.send(self.core.breakpoints());
            }
            SessionRequest::Frames { reply } => {
                let _ = reply.send(Backtrace {
                    frames: self.core.frames().to_vec(),
                    current: self.core.current_frame(),
                });
            }
            SessionRequest::TimeForLine { line, reply } => {
                let _ = reply.send(self.core.time_for_line(line));
            }
            SessionRequest::Transcript { since, reply } => {
                let _ = reply.send(self.core.transcript().since(since));
            }
            SessionRequest::History { reply } => {
                let _ = reply.send(self.core.history());
            }
            SessionRequest::Verbose { enabled, reply } => {
                let result = match enabled {
                    Some(enabled) => self
                        .core
                        .set_show_all_commands(enabled)
                        .map(|()| enabled),
                    None => Ok(self.core.show_all_commands()),
                };
                let _ = reply.send(result);
            }
            SessionRequest::DebuggeeInput { text, reply } => {
                let result = if self.process.is_some() {
                    self.launcher.input(text);
                    Ok(())
                } else {
                    Err(Error::SessionNotActive)
                };
                let _ = reply.send(result);
            }
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            command_line: self.arguments.as_ref().map(Arguments::to_command_line),
            target: self
                .arguments
                .as_ref()
                .and_then(Arguments::target)
                .map(|t| t.display().to_string()),
            debugger_pid: self.process.as_ref().and_then(DebuggerProcess::pid),
            port: self.port,
            location: self.core.location().cloned(),
            time: self.core.time_index().current(),
            breakpoints: self.core.breakpoints().len(),
            pending: self.core.pending(),
            show_all_commands: self.core.show_all_commands(),
        }
    }

    #[tracing::instrument(skip_all, fields(args = %arguments.to_command_line()))]
    async fn start(&mut self, arguments: Arguments) -> Result<StartReport> {
        self.warnings.clear();
        self.set_state(SessionState::Starting);

        let rendezvous = self.negotiate_port();
        let launch_args = arguments.launch_args(&self.config.debugger_args, self.config.emacs);

        self.generation += 1;
        let process = match DebuggerProcess::spawn(
            &self.config.debugger,
            &launch_args,
            self.generation,
            self.output_tx.clone(),
            self.config.output_flush,
        ) {
            Ok(process) => process,
            Err(e) => {
                self.warn(e.to_string());
                self.port = None;
                self.set_state(SessionState::Stopped);
                return Err(e);
            }
        };

        let setup = core::setup_commands(
            rendezvous.as_ref().map(Rendezvous::socket),
            self.config.init_script.as_deref(),
        );
        let process = self.process.insert(process);
        let fx = self.core.begin(setup, process);

        if let Some(target) = arguments.target() {
            self.watcher = Some(FileWatcher::spawn(
                target.to_path_buf(),
                self.config.watch_interval,
                self.generation,
                self.changes_tx.clone(),
            ));
        } else {
            tracing::debug!("No executable among the arguments, nothing to watch");
        }
        self.arguments = Some(arguments);
        self.set_state(SessionState::Running);
        self.apply(fx).await;

        Ok(StartReport {
            status: self.status(),
            warnings: std::mem::take(&mut self.warnings),
        })
    }

    /// Pick the rendezvous port, persisting it for the next session
    fn negotiate_port(&mut self) -> Option<Rendezvous> {
        let r = &self.config.rendezvous;
        let preferred = settings::lock(&self.settings)
            .last_port()
            .unwrap_or(r.preferred_port);

        match port::negotiate(&r.host, preferred, r.port_min, r.port_max) {
            Ok(port) => {
                tracing::info!(port, "Rendezvous port");
                if let Err(e) = settings::lock(&self.settings).set_last_port(port) {
                    tracing::warn!(error = %e, "Could not persist port");
                }
                self.port = Some(port);
                Some(Rendezvous::tcp(&r.host, port))
            }
            Err(e) => {
                self.port = None;
                self.warn(e.to_string());
                None
            }
        }
    }

    async fn stop(&mut self) {
        let was_running = self.process.is_some();
        self.teardown().await;
        if was_running {
            let fx = self.core.note("ocamldebug process stopped.");
            self.emit_all(fx.events);
        }
        self.set_state(SessionState::Stopped);
    }

    /// Stop both processes and drop all per-process state
    async fn teardown(&mut self) {
        self.watcher = None;
        self.launcher.stop();
        if let Some(process) = self.process.take() {
            let code = process.terminate(self.config.terminate_timeout).await;
            tracing::debug!(?code, "Debugger terminated");
        }
        self.port = None;
        let fx = self.core.end();
        self.emit_all(fx.events);
    }

    fn interrupt(&mut self) -> Result<()> {
        let process = self.process.as_ref().ok_or(Error::SessionNotActive)?;
        self.launcher.interrupt();
        match process.interrupt() {
            Ok(()) => Ok(()),
            Err(e @ Error::Unsupported(_)) => {
                self.emit(SessionEvent::Notice {
                    message: e.to_string(),
                });
                Err(e)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Interrupt failed");
                Err(e)
            }
        }
    }

    async fn on_process_output(&mut self, output: ProcessOutput) {
        match output {
            ProcessOutput::Chunk { generation, text } if generation == self.generation => {
                if let Some(process) = self.process.as_mut() {
                    let fx = self.core.on_output(&text, process);
                    self.apply(fx).await;
                }
            }
            ProcessOutput::Closed { generation } if generation == self.generation => {
                if self.process.is_some() {
                    tracing::info!(generation, "Debugger exited");
                    self.stop().await;
                }
            }
            stale => tracing::trace!(?stale, "Output of a previous debugger"),
        }
    }

    async fn on_debuggee(&mut self, notice: DebuggeeNotice) {
        match notice {
            DebuggeeNotice::Started { socket, pid } => {
                tracing::debug!(socket = %socket, ?pid, "Debuggee running");
                self.emit(SessionEvent::DebuggeeStarted { socket });
            }
            DebuggeeNotice::Output(text) => self.emit(SessionEvent::DebuggeeOutput { text }),
            DebuggeeNotice::Exited(code) => self.emit(SessionEvent::DebuggeeExited { code }),
            DebuggeeNotice::InterruptRequested => {
                let _ = self.interrupt();
            }
            DebuggeeNotice::Failed(message) => self.warn(message),
        }
    }

    async fn on_file_changed(&mut self, generation: u64, path: PathBuf) {
        if generation != self.generation || self.process.is_none() {
            return;
        }
        let Some(arguments) = self.arguments.clone() else {
            return;
        };

        tracing::info!(path = %path.display(), "Target modified, restarting");
        self.set_state(SessionState::Restarting);
        let message = format!("Application {} is modified.", path.display());
        let fx = self.core.note(&message);
        self.emit_all(fx.events);
        self.emit(SessionEvent::Notice { message });

        self.teardown().await;
        if let Err(e) = self.start(arguments).await {
            tracing::warn!(error = %e, "Restart failed");
        }
    }

    /// Act on what the core asked for
    async fn apply(&mut self, fx: Effects) {
        self.emit_all(fx.events);

        if let Some(socket) = fx.start_debuggee {
            match self.arguments.as_ref().and_then(|a| {
                a.target().map(|program| Target {
                    program: program.to_path_buf(),
                    args: a.target_args().to_vec(),
                })
            }) {
                Some(target) => self.launcher.start(Rendezvous::new(socket), target),
                None => self.warn(Error::NoTarget.to_string()),
            }
        }

        if fx.debugger_lost && self.process.is_some() {
            tracing::info!("Debugger no longer accepts input");
            self.stop().await;
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Session state");
            self.state = state;
            self.emit(SessionEvent::StateChanged { state });
        }
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message.clone());
        self.emit(SessionEvent::Warning { message });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}
