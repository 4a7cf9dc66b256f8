//! Socket, configuration and state locations
//!
//! Unix/macOS: the daemon socket lives under $XDG_RUNTIME_DIR or /tmp
//! Windows: a named pipe called `camldbg-<username>`

use std::io;
use std::path::PathBuf;

/// Application name used for directories and the IPC socket/pipe
const APP_NAME: &str = "camldbg";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the socket/pipe path for IPC communication
///
/// - Unix: `$XDG_RUNTIME_DIR/camldbg/daemon.sock` or `/tmp/camldbg-<uid>/daemon.sock`
/// - Windows: pipe name, the interprocess crate adds the `\\.\pipe\` prefix
#[cfg(unix)]
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_NAME).join("daemon.sock");
    }

    // SAFETY: getuid has no preconditions and cannot fail
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid)).join("daemon.sock")
}

#[cfg(windows)]
pub fn socket_path() -> PathBuf {
    PathBuf::from(socket_name())
}

/// Socket name in the form the interprocess local socket API expects
#[cfg(unix)]
pub fn socket_name() -> String {
    socket_path().to_string_lossy().into_owned()
}

#[cfg(windows)]
pub fn socket_name() -> String {
    let username = std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string());
    format!("{}-{}", APP_NAME, username)
}

/// Ensure the socket directory exists, owner-only on Unix
#[cfg(unix)]
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    let socket = socket_path();
    let dir = socket
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid socket path"))?;

    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(dir.to_path_buf())
}

#[cfg(windows)]
pub fn ensure_socket_dir() -> io::Result<PathBuf> {
    Ok(PathBuf::new())
}

/// Remove a stale socket file
#[cfg(unix)]
pub fn remove_socket() -> io::Result<()> {
    let path = socket_path();
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn remove_socket() -> io::Result<()> {
    Ok(())
}

/// Get the configuration directory path
///
/// - Linux: `~/.config/camldbg/`
/// - macOS: `~/Library/Application Support/camldbg/`
/// - Windows: `%APPDATA%\camldbg\`
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Directory holding persisted session state and logs
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the path to the persisted session state (port, breakpoints, history)
pub fn state_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("state.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("logs"))
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_home(path: &std::path::Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_is_valid() {
        let path = socket_path();
        assert!(!path.as_os_str().is_empty());
    }

    #[test]
    fn test_state_path_lives_in_data_dir() {
        if let (Some(state), Some(data)) = (state_path(), data_dir()) {
            assert!(state.starts_with(data));
        }
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        let path = std::path::Path::new("/usr/bin/ocamldebug");
        assert_eq!(expand_home(path), PathBuf::from("/usr/bin/ocamldebug"));
    }
}
