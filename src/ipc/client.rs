//! CLI-side IPC client for communicating with the daemon

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tokio::io::{ReadHalf, WriteHalf};

use crate::common::{error::IpcError, Error, Result};

use super::protocol::{Command, Request, Response};
use super::transport::{self, Stream};

/// How long a freshly spawned daemon gets to open its socket
const SPAWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for communicating with the camldbg daemon
pub struct DaemonClient {
    reader: ReadHalf<Stream>,
    writer: WriteHalf<Stream>,
    next_id: u64,
}

impl DaemonClient {
    /// Connect to the running daemon
    pub async fn connect() -> Result<Self> {
        let stream = transport::connect().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused
            {
                Error::DaemonNotRunning
            } else {
                Error::DaemonConnectionFailed(e)
            }
        })?;

        let (reader, writer) = tokio::io::split(stream);

        Ok(Self {
            reader,
            writer,
            next_id: 1,
        })
    }

    /// Connect, starting the daemon first when none is running
    pub async fn connect_or_spawn() -> Result<Self> {
        match Self::connect().await {
            Err(Error::DaemonNotRunning) => {}
            connected => return connected,
        }

        spawn_daemon()?;
        let deadline = Instant::now() + SPAWN_TIMEOUT;
        loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            match Self::connect().await {
                Err(Error::DaemonNotRunning) if Instant::now() < deadline => continue,
                Err(Error::DaemonNotRunning) => {
                    return Err(Error::DaemonSpawnTimeout(SPAWN_TIMEOUT.as_secs()))
                }
                connected => {
                    tracing::debug!("Daemon is up");
                    return connected;
                }
            }
        }
    }

    /// Send a command and wait for the raw response payload
    pub async fn send_command(&mut self, command: Command) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        transport::write_frame(&mut self.writer, &Request { id, command })
            .await
            .map_err(|e| Error::DaemonCommunication(e.to_string()))?;

        let response: Response = transport::read_frame(&mut self.reader)
            .await
            .map_err(|e| Error::DaemonCommunication(e.to_string()))?
            .ok_or_else(|| Error::DaemonCommunication("daemon closed the connection".to_string()))??;

        if response.id != id {
            return Err(Error::DaemonCommunication(format!(
                "Response ID mismatch: expected {}, got {}",
                id, response.id
            )));
        }

        if response.success {
            Ok(response.result.unwrap_or(serde_json::json!({})))
        } else {
            let error = response.error.unwrap_or_else(|| IpcError {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(error.into())
        }
    }

    /// Send a command and decode the response into `T`
    pub async fn request<T: DeserializeOwned>(&mut self, command: Command) -> Result<T> {
        let value = self.send_command(command).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Run this binary's hidden `daemon` subcommand, detached from the terminal
///
/// The daemon logs to its own file, so its standard streams go nowhere.
fn spawn_daemon() -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::Internal(format!("Cannot locate the camldbg executable: {}", e)))?;
    tracing::debug!(exe = %exe.display(), "Spawning daemon");

    let mut cmd = std::process::Command::new(&exe);
    cmd.arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // a Ctrl-C at the terminal must not reach the daemon or its debugger
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    cmd.spawn()
        .map_err(|e| Error::Internal(format!("Failed to spawn daemon: {}", e)))?;
    Ok(())
}
