//! Local socket between the CLI and the daemon
//!
//! A connection carries frames: a little-endian `u32` length followed by one
//! JSON document, a request from the CLI or the daemon's response to it. The
//! socket is a Unix domain socket under the runtime directory, or a per-user
//! named pipe on Windows.

use std::io;

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{ListenerOptions, Name};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub use interprocess::local_socket::tokio::{Listener, Stream};

use crate::common::paths;

/// Largest frame either side accepts
///
/// Transcript and event replies are the big ones: a long session's
/// transcript, or a full event buffer of debuggee output.
pub const MAX_FRAME_LEN: usize = 32 * 1024 * 1024;

fn daemon_socket() -> io::Result<Name<'static>> {
    #[cfg(unix)]
    {
        use interprocess::local_socket::GenericFilePath;
        paths::socket_path().to_fs_name::<GenericFilePath>()
    }
    #[cfg(windows)]
    {
        use interprocess::local_socket::GenericNamespaced;
        paths::socket_name().to_ns_name::<GenericNamespaced>()
    }
}

/// Bind the daemon socket, replacing one left by a dead daemon
pub fn bind() -> io::Result<Listener> {
    paths::ensure_socket_dir()?;
    paths::remove_socket()?;

    let listener = ListenerOptions::new()
        .name(daemon_socket()?)
        .create_tokio()?;

    // owner only: whoever connects drives the debugger
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(paths::socket_path(), std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Connect to the daemon socket
pub async fn connect() -> io::Result<Stream> {
    Stream::connect(daemon_socket()?).await
}

/// Serialize `message` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|_| body.len() <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes is over the limit", body.len()),
            )
        })?;

    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Read one frame
///
/// `Ok(None)` means the peer hung up between frames. A frame that is not a
/// valid `T` is consumed whole and comes back as the inner error, so the
/// connection stays usable.
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<Option<serde_json::Result<T>>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes is over the limit", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)))
}
