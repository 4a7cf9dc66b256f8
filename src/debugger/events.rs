//! Session lifecycle state and the notifications a session emits

use serde::{Deserialize, Serialize};

use super::breakpoints::Breakpoint;
use super::protocol::StopLocation;

/// Lifecycle of a debug session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    /// The target executable changed on disk; stopping to start again
    Restarting,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Restarting => "restarting",
        };
        f.write_str(s)
    }
}

/// Something a UI would want to redraw
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: SessionState },
    /// Text appended to the transcript
    Transcript { text: String },
    /// New stop location, `None` once the program halted
    Location { location: Option<StopLocation> },
    Breakpoints { breakpoints: Vec<Breakpoint> },
    BreakpointsHit { ids: Vec<u32> },
    Time { time: i64 },
    CommandCompleted { command: String, result: String },
    DebuggeeStarted { socket: String },
    DebuggeeOutput { text: String },
    DebuggeeExited { code: Option<i32> },
    Warning { message: String },
    Notice { message: String },
}
