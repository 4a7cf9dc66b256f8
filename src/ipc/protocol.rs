//! IPC protocol message types
//!
//! Defines the request/response format for CLI ↔ daemon communication.
//! Uses a simple length-prefixed JSON protocol.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::common::error::IpcError;
use crate::daemon::SessionStatus;
use crate::debugger::Visibility;
use crate::debugger::SessionEvent;

/// IPC request from CLI to daemon
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for matching responses
    pub id: u64,
    /// The command to execute
    pub command: Command,
}

/// IPC response from daemon to CLI
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: u64,
    /// Whether the command succeeded
    pub success: bool,
    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error information on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: IpcError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Commands that can be sent from CLI to daemon
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // === Session Management ===
    /// Start the debugger on a command line
    Start {
        /// Debugger flags, program and program arguments, unclassified
        args: Vec<String>,
        /// Directory the command line is relative to
        cwd: Option<PathBuf>,
    },

    /// Stop the debugger and the program
    Stop,

    /// Stop and start again with the same command line
    Restart,

    /// Get session status
    Status,

    /// Ctrl-C
    Interrupt,

    // === Debugger REPL ===
    /// Queue a command and return immediately
    Send { text: String, visibility: Visibility },

    /// Queue a command and wait for its result
    Execute { text: String, visibility: Visibility },

    // === Breakpoints ===
    /// Break at a source position
    BreakpointAdd {
        file: PathBuf,
        line: u32,
        column: u32,
    },

    /// Delete a breakpoint
    BreakpointRemove { id: u32 },

    /// List all breakpoints
    BreakpointList,

    // === Inspection ===
    /// Parsed call stack
    Backtrace,

    // === Time travel ===
    /// Move to an execution time
    Goto { time: i64 },

    /// Move to the time recorded at a transcript line
    GotoLine { line: usize },

    // === Output ===
    /// Transcript lines from `since` on
    Transcript { since: usize },

    /// Buffered session events
    Events { tail: Option<usize>, clear: bool },

    /// Command history, oldest first
    History,

    /// Query or set the "show all commands" toggle
    Verbose { enabled: Option<bool> },

    /// Write to the program's stdin
    DebuggeeInput { text: String },

    // === Shutdown ===
    /// Shutdown the daemon
    Shutdown,
}

/// A `file:line[:column]` source position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: PathBuf,
    /// 1-based
    pub line: u32,
    /// 0-based
    pub column: u32,
}

impl SourcePosition {
    /// Parse `file:line` or `file:line:column`
    ///
    /// Colons inside the file part are kept, so Windows paths such as
    /// `C:\src\main.ml:10` work.
    pub fn parse(s: &str) -> Result<Self, crate::common::Error> {
        let invalid = || crate::common::Error::InvalidLocation(format!("expected file:line[:column], got '{}'", s));

        let (rest, last) = s.rsplit_once(':').ok_or_else(invalid)?;
        let last: u32 = last.parse().map_err(|_| invalid())?;

        // file:line:column when the part before the last colon also ends in a number
        if let Some((file, line)) = rest.rsplit_once(':') {
            if let Ok(line) = line.parse::<u32>() {
                if !file.is_empty() {
                    return Self::new(file, line, last).ok_or_else(invalid);
                }
            }
        }
        if rest.is_empty() {
            return Err(invalid());
        }
        Self::new(rest, last, 0).ok_or_else(invalid)
    }

    fn new(file: &str, line: u32, column: u32) -> Option<Self> {
        (line > 0).then(|| Self {
            file: PathBuf::from(file),
            line,
            column,
        })
    }
}

impl std::fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

// === Result types for responses ===

/// Status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResult {
    pub daemon_running: bool,
    pub session: Option<SessionStatus>,
}

/// Numbered transcript lines
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub lines: Vec<(usize, String)>,
}

/// Buffered session events
#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResult {
    pub events: Vec<SessionEvent>,
    /// Events dropped because the buffer was full
    pub dropped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_line() {
        let pos = SourcePosition::parse("src/main.ml:42").unwrap();
        assert_eq!(pos.file, PathBuf::from("src/main.ml"));
        assert_eq!(pos.line, 42);
        assert_eq!(pos.column, 0);
    }

    #[test]
    fn test_parse_file_line_column() {
        let pos = SourcePosition::parse("foo.ml:12:5").unwrap();
        assert_eq!(pos.file, PathBuf::from("foo.ml"));
        assert_eq!((pos.line, pos.column), (12, 5));
    }

    #[test]
    fn test_parse_rejects_names_and_line_zero() {
        assert!(SourcePosition::parse("Foo.bar").is_err());
        assert!(SourcePosition::parse("foo.ml:0").is_err());
        assert!(SourcePosition::parse(":3").is_err());
    }

    #[cfg(windows)]
    #[test]
    fn test_parse_windows_path() {
        let pos = SourcePosition::parse(r"C:\Users\test\src\main.ml:42").unwrap();
        assert_eq!(pos.file, PathBuf::from(r"C:\Users\test\src\main.ml"));
        assert_eq!(pos.line, 42);
    }

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_value(Command::Execute {
            text: "print x".to_string(),
            visibility: Visibility::HideDebuggerOutput,
        })
        .unwrap();
        assert_eq!(json["type"], "execute");
        assert_eq!(json["visibility"], "hide_debugger_output");
    }
}
