//! CLI ↔ daemon channel
//!
//! Length-prefixed JSON frames over a local socket: a Unix domain socket on
//! Unix/macOS, a named pipe on Windows (both through `interprocess`).

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::DaemonClient;
