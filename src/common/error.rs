//! Error types for camldbg
//!
//! Messages are phrased for the person at the terminal, with a hint on how
//! to get unstuck where one exists.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for camldbg
#[derive(Error, Debug)]
pub enum Error {
    // === Daemon/Connection Errors ===
    #[error("Daemon not running. Start a session with 'camldbg start <program>'")]
    DaemonNotRunning,

    #[error("Failed to spawn daemon: timed out waiting for socket after {0} seconds")]
    DaemonSpawnTimeout(u64),

    #[error("Failed to connect to daemon: {0}")]
    DaemonConnectionFailed(#[source] io::Error),

    #[error("Daemon communication error: {0}")]
    DaemonCommunication(String),

    // === Session Errors ===
    #[error("No debug session active. Use 'camldbg start <program>' first")]
    SessionNotActive,

    #[error("Debug session already active. Use 'camldbg stop' first to end current session")]
    SessionAlreadyActive,

    #[error("Session terminated unexpectedly: {0}")]
    SessionTerminated(String),

    // === Launch Errors ===
    #[error("Debugger '{name}' not found. Searched: {searched}")]
    DebuggerNotFound { name: String, searched: String },

    #[error("Debugger failed to start: {0}")]
    LaunchFailed(String),

    #[error("No executable target found among the arguments")]
    NoTarget,

    #[error("No free port between {min} and {max}; the debuggee will not be able to connect")]
    PortExhausted { min: u16, max: u16 },

    #[error("{0} is not supported on this platform")]
    Unsupported(String),

    // === Command Errors ===
    #[error("Debugger process is not running")]
    DebuggerNotRunning,

    #[error("Command '{0}' was discarded before it completed")]
    CommandDiscarded(String),

    #[error("Command '{command}' did not complete within {secs} seconds")]
    CommandTimeout { command: String, secs: u64 },

    // === Breakpoint Errors ===
    #[error("Invalid breakpoint location: {0}")]
    InvalidLocation(String),

    #[error("Breakpoint {id} not found")]
    BreakpointNotFound { id: u32 },

    // === Time Travel Errors ===
    #[error("No execution time recorded at or before transcript line {0}")]
    NoTimeRecorded(usize),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Settings error: {0}")]
    Settings(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a debugger not found error with search paths
    pub fn debugger_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::DebuggerNotFound {
            name: name.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: &io::Error) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }
}

/// IPC-serializable error for daemon responses
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IpcError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for IpcError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::DaemonNotRunning => "DAEMON_NOT_RUNNING",
            Error::SessionNotActive => "SESSION_NOT_ACTIVE",
            Error::SessionAlreadyActive => "SESSION_ALREADY_ACTIVE",
            Error::DebuggerNotFound { .. } => "DEBUGGER_NOT_FOUND",
            Error::LaunchFailed(_) => "LAUNCH_FAILED",
            Error::NoTarget => "NO_TARGET",
            Error::PortExhausted { .. } => "PORT_EXHAUSTED",
            Error::Unsupported(_) => "UNSUPPORTED",
            Error::DebuggerNotRunning => "DEBUGGER_NOT_RUNNING",
            Error::CommandDiscarded(_) => "COMMAND_DISCARDED",
            Error::CommandTimeout { .. } => "TIMEOUT",
            Error::InvalidLocation(_) => "INVALID_LOCATION",
            Error::BreakpointNotFound { .. } => "BREAKPOINT_NOT_FOUND",
            Error::NoTimeRecorded(_) => "NO_TIME_RECORDED",
            _ => "INTERNAL_ERROR",
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<IpcError> for Error {
    fn from(e: IpcError) -> Self {
        // Only the codes the CLI branches on are mapped back
        match e.code.as_str() {
            "SESSION_NOT_ACTIVE" => Error::SessionNotActive,
            "SESSION_ALREADY_ACTIVE" => Error::SessionAlreadyActive,
            "DEBUGGER_NOT_RUNNING" => Error::DebuggerNotRunning,
            _ => Error::DaemonCommunication(e.message),
        }
    }
}
