//! Persisted session state
//!
//! The debugger session owns four values that outlive a process: the last
//! rendezvous port, the breakpoint replay commands, the command history and
//! the "show all commands" toggle. They are reached through the
//! [`SettingsStore`] trait so the controller never touches a global store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Error, Result};

/// Typed access to the persisted session values
pub trait SettingsStore: Send {
    fn last_port(&self) -> Option<u16>;
    fn set_last_port(&mut self, port: u16) -> Result<()>;

    fn breakpoint_commands(&self) -> Vec<String>;
    fn set_breakpoint_commands(&mut self, commands: &[String]) -> Result<()>;

    fn command_history(&self) -> Vec<String>;
    fn set_command_history(&mut self, history: &[String]) -> Result<()>;

    fn show_all_commands(&self) -> bool;
    fn set_show_all_commands(&mut self, enabled: bool) -> Result<()>;
}

/// Settings shared between the session controller and the breakpoint store
pub type SharedSettings = Arc<Mutex<dyn SettingsStore>>;

/// Wrap a store for sharing
pub fn shared<S: SettingsStore + 'static>(store: S) -> SharedSettings {
    Arc::new(Mutex::new(store))
}

/// Lock shared settings, recovering from a poisoned lock
pub fn lock(settings: &SharedSettings) -> MutexGuard<'_, dyn SettingsStore + 'static> {
    settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Move `command` to the most-recent end of `history`, keeping at most `cap` entries
pub fn push_history(history: &mut Vec<String>, command: &str, cap: usize) {
    if command.is_empty() {
        return;
    }
    history.retain(|c| c != command);
    history.push(command.to_string());
    if history.len() > cap {
        let excess = history.len() - cap;
        history.drain(..excess);
    }
}

/// On-disk shape of the persisted values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_port: Option<u16>,
    #[serde(default)]
    pub breakpoint_commands: Vec<String>,
    #[serde(default)]
    pub command_history: Vec<String>,
    #[serde(default)]
    pub show_all_commands: bool,
}

/// In-memory store, used by tests and when no data directory exists
#[derive(Debug, Default)]
pub struct MemorySettings {
    state: PersistedState,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self { state }
    }
}

impl SettingsStore for MemorySettings {
    fn last_port(&self) -> Option<u16> {
        self.state.last_port
    }
    fn set_last_port(&mut self, port: u16) -> Result<()> {
        self.state.last_port = Some(port);
        Ok(())
    }
    fn breakpoint_commands(&self) -> Vec<String> {
        self.state.breakpoint_commands.clone()
    }
    fn set_breakpoint_commands(&mut self, commands: &[String]) -> Result<()> {
        self.state.breakpoint_commands = commands.to_vec();
        Ok(())
    }
    fn command_history(&self) -> Vec<String> {
        self.state.command_history.clone()
    }
    fn set_command_history(&mut self, history: &[String]) -> Result<()> {
        self.state.command_history = history.to_vec();
        Ok(())
    }
    fn show_all_commands(&self) -> bool {
        self.state.show_all_commands
    }
    fn set_show_all_commands(&mut self, enabled: bool) -> Result<()> {
        self.state.show_all_commands = enabled;
        Ok(())
    }
}

/// TOML file store, written through on every change
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    state: PersistedState,
}

impl FileSettings {
    /// Open the store at `path`; a missing file yields empty state
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| Error::file_read(&path, &e))?;
            toml::from_str(&content).map_err(|e| {
                Error::Settings(format!("{}: {}", path.display(), e))
            })?
        } else {
            PersistedState::default()
        };
        Ok(Self { path, state })
    }

    /// Open the store at the default state path, falling back to memory
    pub fn open_default() -> SharedSettings {
        match super::paths::state_path().map(Self::open) {
            Some(Ok(store)) => shared(store),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Could not load persisted state, starting fresh");
                shared(MemorySettings::new())
            }
            None => shared(MemorySettings::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content =
            toml::to_string(&self.state).map_err(|e| Error::Settings(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl SettingsStore for FileSettings {
    fn last_port(&self) -> Option<u16> {
        self.state.last_port
    }
    fn set_last_port(&mut self, port: u16) -> Result<()> {
        self.state.last_port = Some(port);
        self.save()
    }
    fn breakpoint_commands(&self) -> Vec<String> {
        self.state.breakpoint_commands.clone()
    }
    fn set_breakpoint_commands(&mut self, commands: &[String]) -> Result<()> {
        self.state.breakpoint_commands = commands.to_vec();
        self.save()
    }
    fn command_history(&self) -> Vec<String> {
        self.state.command_history.clone()
    }
    fn set_command_history(&mut self, history: &[String]) -> Result<()> {
        self.state.command_history = history.to_vec();
        self.save()
    }
    fn show_all_commands(&self) -> bool {
        self.state.show_all_commands
    }
    fn set_show_all_commands(&mut self, enabled: bool) -> Result<()> {
        self.state.show_all_commands = enabled;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_push_history_moves_duplicates_to_end() {
        let mut history = vec!["run".to_string(), "next".to_string(), "step".to_string()];
        push_history(&mut history, "run", 10);
        assert_eq!(history, vec!["next", "step", "run"]);
    }

    #[test]
    fn test_push_history_caps_length() {
        let mut history = Vec::new();
        for cmd in ["a", "b", "c", "d"] {
            push_history(&mut history, cmd, 3);
        }
        assert_eq!(history, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_push_history_ignores_empty() {
        let mut history = vec!["run".to_string()];
        push_history(&mut history, "", 3);
        assert_eq!(history, vec!["run"]);
    }

    #[test]
    fn test_file_settings_persist_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.toml");

        let mut store = FileSettings::open(&path).unwrap();
        store.set_last_port(10042).unwrap();
        store
            .set_breakpoint_commands(&["break @ Foo 12 5".to_string()])
            .unwrap();
        store.set_show_all_commands(true).unwrap();

        let reopened = FileSettings::open(&path).unwrap();
        assert_eq!(reopened.last_port(), Some(10042));
        assert_eq!(reopened.breakpoint_commands(), vec!["break @ Foo 12 5"]);
        assert!(reopened.show_all_commands());
        assert!(reopened.command_history().is_empty());
    }

    #[test]
    fn test_file_settings_reject_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "last_port = \"not a number\"").unwrap();
        assert!(matches!(FileSettings::open(&path), Err(Error::Settings(_))));
    }
}
