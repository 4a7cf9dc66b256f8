//! Daemon mode - background process owning the debug session
//!
//! The daemon is spawned automatically by CLI commands and keeps ocamldebug
//! and the debugged program alive across CLI invocations.

mod handler;
mod server;
pub mod session;

pub use session::{Backtrace, Execution, SessionHandle, SessionStatus, StartReport};

use crate::common::{logging, Result};

/// Run in daemon mode
///
/// This is the entry point when the binary is invoked with the hidden `daemon` command.
/// The daemon:
/// 1. Creates an IPC socket/pipe for CLI connections
/// 2. Hands CLI commands to the session controller
/// 3. Buffers session events between CLI invocations
/// 4. Exits after the configured idle time without a running debugger
pub async fn run() -> Result<()> {
    let log_file = logging::init_daemon();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        log_file = ?log_file,
        "Starting camldbg daemon"
    );

    let mut daemon = server::Daemon::new().await?;
    daemon.run().await
}
