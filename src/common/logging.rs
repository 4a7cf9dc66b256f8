//! Logging and tracing configuration
//!
//! The CLI logs compactly to stderr. The daemon runs detached, so it also
//! writes a full log file that `camldbg logs` can show.

use std::path::PathBuf;
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use super::paths;

const DAEMON_LOG: &str = "daemon.log";

/// Initialize tracing for the CLI (stderr logging)
///
/// Controlled by `RUST_LOG`; defaults to INFO for this crate and WARN for
/// dependencies.
pub fn init_cli() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camldbg=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .compact(),
        )
        .init();
}

/// Initialize tracing for the daemon (file + stderr logging)
///
/// The file lives at `<data_dir>/camldbg/logs/daemon.log`. Default level is
/// DEBUG for this crate; set `RUST_LOG=camldbg=trace` to see every line
/// exchanged with the debugger.
pub fn init_daemon() -> Option<PathBuf> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camldbg=debug,info"));

    let appender = paths::log_dir().and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(DAEMON_LOG)
            .build(&dir)
            .map(|appender| (appender, dir.join(DAEMON_LOG)))
            .map_err(|e| eprintln!("Warning: Could not open log file: {}", e))
            .ok()
    });

    match appender {
        Some((appender, log_file)) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer(appender))
                .with(stderr_layer())
                .init();

            Some(log_file)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer())
                .init();
            None
        }
    }
}

/// Compact stderr output, built per subscriber stack since the layer type
/// depends on the layers below it
fn stderr_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
}

fn file_layer<S>(appender: RollingFileAppender) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
}

/// Get the path to the daemon log file
pub fn daemon_log_path() -> Option<PathBuf> {
    paths::log_dir().map(|d| d.join(DAEMON_LOG))
}

/// Truncate the daemon log file
pub fn truncate_daemon_log() -> std::io::Result<()> {
    if let Some(path) = daemon_log_path() {
        if path.exists() {
            std::fs::write(&path, "")?;
        }
    }
    Ok(())
}
