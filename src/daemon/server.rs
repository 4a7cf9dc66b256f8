//! Daemon server - IPC listener and main event loop
//!
//! Each client connection gets its own task, so an `interrupt` can reach
//! the session while another client waits on a long `run`.

use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use tokio::io::BufReader;

use crate::common::settings::FileSettings;
use crate::common::{config::Config, error::IpcError, paths, Result};
use crate::ipc::protocol::{Command, Request, Response};
use crate::ipc::transport::{self, Listener, Stream};

use super::handler::{self, DaemonState};

/// Main daemon server
pub struct Daemon {
    state: Arc<DaemonState>,
}

impl Daemon {
    /// Create a new daemon instance
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        let settings = FileSettings::open_default();

        Ok(Self {
            state: Arc::new(DaemonState::new(config, settings)),
        })
    }

    /// Run the daemon main loop
    pub async fn run(&mut self) -> Result<()> {
        let listener = transport::bind()?;
        tracing::info!("Daemon listening on {}", paths::socket_name());

        let idle_timeout = Duration::from_secs(self.state.config.daemon.idle_timeout_minutes * 60);

        loop {
            if !self.state.is_debugging() && self.state.idle_for() > idle_timeout {
                tracing::info!("Idle timeout reached, shutting down daemon");
                break;
            }

            if self.run_select_loop(&listener).await? {
                break;
            }
        }

        tracing::info!("Cleaning up daemon resources");
        if let Some(session) = self.state.session() {
            tracing::debug!("Stopping debug session");
            let _ = session.stop().await;
        }

        paths::remove_socket()?;
        tracing::info!("Daemon shutdown complete");

        Ok(())
    }

    /// Run one iteration of the select loop, returns true if should break
    #[cfg(unix)]
    async fn run_select_loop(&mut self, listener: &Listener) -> Result<bool> {
        use tokio::signal::unix::{signal, SignalKind};

        // Recreated each iteration to avoid lifetime issues
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                Ok(true)
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully");
                Ok(true)
            }
            _ = self.state.shutdown_requested() => {
                tracing::info!("Shutdown requested, exiting");
                Ok(true)
            }
            accept_result = listener.accept() => {
                self.accept(accept_result);
                Ok(false)
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                // Periodic wakeup to check idle timeout
                Ok(false)
            }
        }
    }

    /// Run one iteration of the select loop (Windows version)
    #[cfg(not(unix))]
    async fn run_select_loop(&mut self, listener: &Listener) -> Result<bool> {
        tokio::select! {
            _ = self.state.shutdown_requested() => {
                tracing::info!("Shutdown requested, exiting");
                Ok(true)
            }
            accept_result = listener.accept() => {
                self.accept(accept_result);
                Ok(false)
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                Ok(false)
            }
        }
    }

    fn accept(&self, accept_result: std::io::Result<Stream>) {
        match accept_result {
            Ok(stream) => {
                self.state.touch();
                let state = Arc::clone(&self.state);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(state, stream).await {
                        tracing::error!("Error handling client: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::error!("Accept error: {}", e);
            }
        }
    }
}

/// Handle a single client connection
async fn handle_client(state: Arc<DaemonState>, stream: Stream) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    // Read and process commands until client disconnects
    loop {
        let frame = tokio::select! {
            frame = transport::read_frame::<_, Request>(&mut reader) => frame,
            _ = tokio::time::sleep(Duration::from_secs(300)) => {
                tracing::debug!("Client timeout");
                break;
            }
        };

        let request = match frame {
            Ok(Some(Ok(request))) => request,
            Ok(Some(Err(e))) => {
                tracing::error!("Invalid request: {}", e);
                let response = Response::error(
                    0,
                    IpcError {
                        code: "INVALID_REQUEST".to_string(),
                        message: e.to_string(),
                    },
                );
                transport::write_frame(&mut writer, &response).await?;
                continue;
            }
            Ok(None) => {
                tracing::debug!("Client disconnected");
                break;
            }
            Err(e) => {
                tracing::error!("Error reading request: {}", e);
                break;
            }
        };

        tracing::debug!("Received command: {:?}", request.command);
        let shutdown = matches!(request.command, Command::Shutdown);

        let response = handler::handle_command(&state, request.id, request.command).await;
        transport::write_frame(&mut writer, &response).await?;

        state.touch();
        if shutdown {
            break;
        }
    }

    Ok(())
}
