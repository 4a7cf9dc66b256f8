//! Command handler for processing IPC requests
//!
//! Translates IPC commands into session controller requests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{mpsc, Notify};

use crate::common::settings::{self, SharedSettings};
use crate::common::{config::Config, error::IpcError, Error, Result};
use crate::debugger::{Arguments, SessionEvent, SessionState};
use crate::ipc::protocol::{Command, EventsResult, Response, StatusResult, TranscriptResult};

use super::session::SessionHandle;

/// Session events collected while no client is looking
pub struct EventBuffer {
    events: VecDeque<SessionEvent>,
    capacity: usize,
    dropped: usize,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Append, dropping the oldest event when full
    pub fn push(&mut self, event: SessionEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// The last `tail` events (all when `None`), optionally clearing the buffer
    pub fn take(&mut self, tail: Option<usize>, clear: bool) -> EventsResult {
        let skip = tail.map_or(0, |n| self.events.len().saturating_sub(n));
        let events = self.events.iter().skip(skip).cloned().collect();
        let dropped = self.dropped;
        if clear {
            self.events.clear();
            self.dropped = 0;
        }
        EventsResult { events, dropped }
    }
}

/// State shared by all client connections
pub struct DaemonState {
    pub config: Config,
    pub settings: SharedSettings,
    session: Mutex<Option<SessionHandle>>,
    events: Mutex<EventBuffer>,
    debugging: AtomicBool,
    last_activity: Mutex<Instant>,
    shutdown: Notify,
}

impl DaemonState {
    pub fn new(config: Config, settings: SharedSettings) -> Self {
        let events = EventBuffer::new(config.output.max_events);
        Self {
            config,
            settings,
            session: Mutex::new(None),
            events: Mutex::new(events),
            debugging: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            shutdown: Notify::new(),
        }
    }

    pub fn session(&self) -> Option<SessionHandle> {
        relock(&self.session).clone()
    }

    /// The session controller, created on first use
    fn session_or_spawn(self: &Arc<Self>) -> Result<SessionHandle> {
        let mut slot = relock(&self.session);
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        let (handle, events) = SessionHandle::spawn(self.config.session_config()?, self.settings.clone());
        tokio::spawn(pump_events(Arc::clone(self), events));
        Ok(slot.insert(handle).clone())
    }

    /// Whether a debugger is running
    pub fn is_debugging(&self) -> bool {
        self.debugging.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        *relock(&self.last_activity) = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        relock(&self.last_activity).elapsed()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Move session events into the buffer
async fn pump_events(state: Arc<DaemonState>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        if let SessionEvent::StateChanged { state: session_state } = &event {
            state
                .debugging
                .store(*session_state != SessionState::Stopped, Ordering::Relaxed);
            state.touch();
        }
        relock(&state.events).push(event);
    }
    tracing::debug!("Session event stream ended");
}

/// Handle an IPC command
pub async fn handle_command(state: &Arc<DaemonState>, id: u64, command: Command) -> Response {
    match handle_command_inner(state, command).await {
        Ok(result) => Response::success(id, result),
        Err(e) => Response::error(id, IpcError::from(&e)),
    }
}

async fn handle_command_inner(state: &Arc<DaemonState>, command: Command) -> Result<serde_json::Value> {
    let wait = Duration::from_secs(state.config.timeouts.command_wait_secs);
    let session = state.session();

    match command {
        // === Session Management ===
        Command::Start { args, cwd } => {
            if let Some(cwd) = cwd {
                // one session per daemon: the debugger and the program run where the CLI was
                std::env::set_current_dir(&cwd).map_err(|e| Error::file_read(&cwd, &e))?;
            }
            let arguments = Arguments::classify(args);
            if arguments.target().is_none() {
                tracing::info!("No executable among the arguments");
            }

            let session = state.session_or_spawn()?;
            let report = session.start(arguments).await?;
            Ok(serde_json::to_value(report)?)
        }

        Command::Stop => {
            active(&session)?.stop().await?;
            Ok(json!({ "status": "stopped" }))
        }

        Command::Restart => {
            let report = active(&session)?.restart().await?;
            Ok(serde_json::to_value(report)?)
        }

        Command::Status => {
            let status = match session {
                Some(session) => Some(session.status().await?),
                None => None,
            };
            Ok(serde_json::to_value(StatusResult {
                daemon_running: true,
                session: status,
            })?)
        }

        Command::Interrupt => {
            active(&session)?.interrupt().await?;
            Ok(json!({ "status": "interrupted" }))
        }

        // === Debugger REPL ===
        Command::Send { text, visibility } => {
            active(&session)?.send(text, visibility).await?;
            Ok(json!({ "status": "queued" }))
        }

        Command::Execute { text, visibility } => {
            let execution = active(&session)?.execute(text, visibility, wait).await?;
            Ok(serde_json::to_value(execution)?)
        }

        // === Breakpoints ===
        Command::BreakpointAdd { file, line, column } => {
            let session = active(&session)?;
            let execution = session.add_breakpoint(&file, line, column, wait).await?;
            Ok(json!({
                "execution": execution,
                "breakpoints": session.breakpoints().await?,
            }))
        }

        Command::BreakpointRemove { id } => {
            let execution = active(&session)?.remove_breakpoint(id, wait).await?;
            Ok(serde_json::to_value(execution)?)
        }

        Command::BreakpointList => {
            let breakpoints = active(&session)?.breakpoints().await?;
            Ok(json!({ "breakpoints": breakpoints }))
        }

        // === Inspection ===
        Command::Backtrace => {
            let backtrace = active(&session)?.backtrace(wait).await?;
            Ok(serde_json::to_value(backtrace)?)
        }

        // === Time travel ===
        Command::Goto { time } => {
            let execution = active(&session)?.goto_time(time, wait).await?;
            Ok(serde_json::to_value(execution)?)
        }

        Command::GotoLine { line } => {
            let execution = active(&session)?.goto_line(line, wait).await?;
            Ok(serde_json::to_value(execution)?)
        }

        // === Output ===
        Command::Transcript { since } => {
            let lines = active(&session)?.transcript(since).await?;
            Ok(serde_json::to_value(TranscriptResult { lines })?)
        }

        Command::Events { tail, clear } => Ok(serde_json::to_value(relock(&state.events).take(tail, clear))?),

        // history and verbosity outlive sessions
        Command::History => {
            let history = match &session {
                Some(session) => session.history().await?,
                None => settings::lock(&state.settings).command_history(),
            };
            Ok(json!({ "history": history }))
        }

        Command::Verbose { enabled } => {
            let enabled = match (&session, enabled) {
                (Some(session), enabled) => session.verbose(enabled).await?,
                (None, Some(enabled)) => {
                    settings::lock(&state.settings).set_show_all_commands(enabled)?;
                    enabled
                }
                (None, None) => settings::lock(&state.settings).show_all_commands(),
            };
            Ok(json!({ "show_all_commands": enabled }))
        }

        Command::DebuggeeInput { text } => {
            active(&session)?.debuggee_input(text).await?;
            Ok(json!({ "status": "sent" }))
        }

        Command::Shutdown => {
            state.request_shutdown();
            Ok(json!({ "status": "shutting_down" }))
        }
    }
}

fn active(session: &Option<SessionHandle>) -> Result<&SessionHandle> {
    session.as_ref().ok_or(Error::SessionNotActive)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(n: usize) -> SessionEvent {
        SessionEvent::Notice {
            message: n.to_string(),
        }
    }

    #[test]
    fn test_event_buffer_drops_oldest() {
        let mut buffer = EventBuffer::new(2);
        for n in 0..3 {
            buffer.push(notice(n));
        }
        let taken = buffer.take(None, false);
        assert_eq!(taken.events, vec![notice(1), notice(2)]);
        assert_eq!(taken.dropped, 1);
        assert_eq!(buffer.take(None, false).events.len(), 2);
    }

    #[test]
    fn test_event_buffer_tail_and_clear() {
        let mut buffer = EventBuffer::new(10);
        for n in 0..5 {
            buffer.push(notice(n));
        }
        assert_eq!(buffer.take(Some(2), true).events, vec![notice(3), notice(4)]);
        let rest = buffer.take(None, false);
        assert!(rest.events.is_empty());
        assert_eq!(rest.dropped, 0);
    }
}
