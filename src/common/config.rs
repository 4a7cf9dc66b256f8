//! Configuration file handling

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::paths::{config_path, expand_home};
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debugger executable and launch flags
    #[serde(default)]
    pub debugger: DebuggerConfig,

    /// Debugger/debuggee rendezvous settings
    #[serde(default)]
    pub rendezvous: RendezvousConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Output buffer settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Debugger executable settings
#[derive(Debug, Deserialize, Clone)]
pub struct DebuggerConfig {
    /// Path or PATH-relative name of the debugger
    #[serde(default = "default_debugger")]
    pub path: PathBuf,

    /// Extra launch flags, placed before the flags given on the command line
    #[serde(default)]
    pub args: Vec<String>,

    /// Prepend `-emacs` so the debugger emits location markers
    #[serde(default = "default_true")]
    pub emacs: bool,

    /// Script sourced right after start, when it exists
    #[serde(default)]
    pub init_script: Option<PathBuf>,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            path: default_debugger(),
            args: Vec::new(),
            emacs: true,
            init_script: None,
        }
    }
}

fn default_debugger() -> PathBuf {
    PathBuf::from("ocamldebug")
}

fn default_true() -> bool {
    true
}

/// Rendezvous port range
#[derive(Debug, Deserialize, Clone)]
pub struct RendezvousConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port_min")]
    pub port_min: u16,

    #[serde(default = "default_port_max")]
    pub port_max: u16,

    /// Starting point when no last-used port has been persisted
    #[serde(default = "default_port_min")]
    pub preferred_port: u16,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port_min: default_port_min(),
            port_max: default_port_max(),
            preferred_port: default_port_min(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port_min() -> u16 {
    10000
}
fn default_port_max() -> u16 {
    10999
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Wait between graceful terminate and kill
    #[serde(default = "default_terminate")]
    pub terminate_millis: u64,

    /// Idle time after which a partial output line is emitted
    #[serde(default = "default_flush")]
    pub output_flush_millis: u64,

    /// Poll interval of the target executable watcher
    #[serde(default = "default_watch")]
    pub watch_interval_millis: u64,

    /// How long IPC callers wait for a command to complete
    #[serde(default = "default_command_wait")]
    pub command_wait_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            terminate_millis: default_terminate(),
            output_flush_millis: default_flush(),
            watch_interval_millis: default_watch(),
            command_wait_secs: default_command_wait(),
        }
    }
}

fn default_terminate() -> u64 {
    1000
}
fn default_flush() -> u64 {
    50
}
fn default_watch() -> u64 {
    1000
}
fn default_command_wait() -> u64 {
    300
}

/// Daemon configuration
#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    /// Auto-exit after this many minutes with no active session
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_minutes: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout(),
        }
    }
}

fn default_idle_timeout() -> u64 {
    30
}

/// Output buffer configuration
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Maximum number of session events to buffer in the daemon
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Length of the command history
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            history_size: default_history_size(),
        }
    }
}

fn default_max_events() -> usize {
    10_000
}
fn default_history_size() -> usize {
    100
}

/// The part of the configuration a single debug session needs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub debugger: PathBuf,
    pub debugger_args: Vec<String>,
    pub emacs: bool,
    pub init_script: Option<PathBuf>,
    pub rendezvous: RendezvousConfig,
    pub terminate_timeout: Duration,
    pub output_flush: Duration,
    pub watch_interval: Duration,
    pub history_size: usize,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| Error::file_read(&path, &e))?;
                return Self::parse(&content);
            }
        }
        Ok(Self::default())
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        let r = &config.rendezvous;
        if r.port_min > r.port_max {
            return Err(Error::Config(format!(
                "rendezvous.port_min ({}) is greater than rendezvous.port_max ({})",
                r.port_min, r.port_max
            )));
        }
        Ok(config)
    }

    /// Resolve the debugger executable
    ///
    /// Absolute or relative paths are used as they are; bare names are
    /// looked up in PATH.
    pub fn resolve_debugger(&self) -> Result<PathBuf> {
        let path = expand_home(&self.debugger.path);
        if path.components().count() > 1 {
            if path.exists() {
                return Ok(path);
            }
            return Err(Error::debugger_not_found(
                &path.display().to_string(),
                &[path.display().to_string()],
            ));
        }

        which::which(&path).map_err(|_| {
            Error::debugger_not_found(&path.display().to_string(), &["PATH"])
        })
    }

    /// Build the per-session configuration
    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            debugger: self.resolve_debugger()?,
            debugger_args: self.debugger.args.clone(),
            emacs: self.debugger.emacs,
            init_script: self.debugger.init_script.as_deref().map(expand_home),
            rendezvous: self.rendezvous.clone(),
            terminate_timeout: Duration::from_millis(self.timeouts.terminate_millis),
            output_flush: Duration::from_millis(self.timeouts.output_flush_millis),
            watch_interval: Duration::from_millis(self.timeouts.watch_interval_millis),
            history_size: self.output.history_size,
        })
    }
}

impl SessionConfig {
    /// A configuration for the given debugger executable with default settings
    pub fn for_debugger(debugger: impl Into<PathBuf>) -> Self {
        let defaults = Config::default();
        Self {
            debugger: debugger.into(),
            debugger_args: Vec::new(),
            emacs: true,
            init_script: None,
            rendezvous: defaults.rendezvous,
            terminate_timeout: Duration::from_millis(defaults.timeouts.terminate_millis),
            output_flush: Duration::from_millis(defaults.timeouts.output_flush_millis),
            watch_interval: Duration::from_millis(defaults.timeouts.watch_interval_millis),
            history_size: defaults.output.history_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.debugger.path, PathBuf::from("ocamldebug"));
        assert!(config.debugger.emacs);
        assert_eq!(config.rendezvous.port_min, 10000);
        assert_eq!(config.rendezvous.port_max, 10999);
        assert_eq!(config.timeouts.terminate_millis, 1000);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
[debugger]
path = "/opt/ocaml/bin/ocamldebug"
args = ["-I", "_build"]

[rendezvous]
port_min = 20000
port_max = 20010
"#,
        )
        .unwrap();
        assert_eq!(config.debugger.args, vec!["-I", "_build"]);
        assert_eq!(config.rendezvous.port_max, 20010);
        assert_eq!(config.rendezvous.host, "127.0.0.1");
        assert_eq!(config.output.history_size, 100);
    }

    #[test]
    fn test_inverted_port_range_is_rejected() {
        let err = Config::parse("[rendezvous]\nport_min = 3000\nport_max = 2000\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_absolute_debugger() {
        let config =
            Config::parse("[debugger]\npath = \"/nonexistent/dir/ocamldebug\"\n").unwrap();
        assert!(matches!(
            config.resolve_debugger(),
            Err(Error::DebuggerNotFound { .. })
        ));
    }
}
