//! camldbg - a session controller and CLI frontend for ocamldebug
//!
//! A background daemon owns the debugger REPL and the program under debug;
//! short-lived CLI invocations talk to it over a local socket.

pub mod cli;
pub mod commands;
pub mod common;
pub mod daemon;
pub mod debugger;
pub mod ipc;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use daemon::{SessionHandle, SessionStatus};
