//! TOML configuration for the browser agent
//!
//! Every section is optional. The file is looked up in order:
//! 1. The `--config` command line argument
//! 2. The `BROWSER_AGENT_CONFIG` environment variable
//! 3. `/etc/browser-agent/agent.toml`
//! 4. Compiled-in defaults

use crate::connection::ConnectionConfig;
use crate::queue::QueueConfig;
use dispatch_shared::limits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "BROWSER_AGENT_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/browser-agent/agent.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration for the agent process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub driver: DriverSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl AgentConfig {
    /// Load and validate configuration from a TOML file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration using the standard lookup order
    ///
    /// An explicit `--config` path must load; the environment and system
    /// locations fall through to the next candidate on error. Resolution runs
    /// before logging is set up, so what happened is returned in the
    /// [`ConfigReport`] for the caller to log afterwards.
    pub fn resolve(cli_path: Option<&Path>) -> Result<(Self, ConfigReport), ConfigError> {
        let env_path = std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        Self::resolve_from(cli_path, env_path.as_deref(), Path::new(SYSTEM_CONFIG_PATH))
    }

    fn resolve_from(
        cli_path: Option<&Path>,
        env_path: Option<&Path>,
        system_path: &Path,
    ) -> Result<(Self, ConfigReport), ConfigError> {
        let mut report = ConfigReport::default();

        if let Some(path) = cli_path {
            let config = Self::load(path)?;
            report.source = ConfigSource::File(path.to_path_buf());
            return Ok((config, report));
        }

        let mut candidates = Vec::new();
        if let Some(path) = env_path {
            candidates.push((ConfigOrigin::EnvVar, path));
        }
        if system_path.exists() {
            candidates.push((ConfigOrigin::System, system_path));
        }

        for (origin, path) in candidates {
            match Self::load(path) {
                Ok(config) => {
                    report.source = ConfigSource::File(path.to_path_buf());
                    return Ok((config, report));
                }
                Err(error) => report.skipped.push(SkippedConfig {
                    origin,
                    path: path.to_path_buf(),
                    error,
                }),
            }
        }

        Ok((Self::default(), report))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_queue_size == 0 {
            return Err(ConfigError::Invalid("queue.max_queue_size must be at least 1".into()));
        }
        if self.queue.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue.history_capacity must be at least 1".into(),
            ));
        }
        if self.queue.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "queue.command_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.driver.kind == DriverKind::Remote && self.driver.address.is_none() {
            return Err(ConfigError::Invalid(
                "driver.address is required when driver.kind = \"remote\"".into(),
            ));
        }
        if self.driver.io_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "driver.io_timeout_ms must be greater than zero".into(),
            ));
        }
        // The executor's deadline must not cut a remote exchange off mid-frame
        if self.driver.io_timeout_ms >= self.queue.command_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "driver.io_timeout_ms ({}) must be less than queue.command_timeout_ms ({})",
                self.driver.io_timeout_ms, self.queue.command_timeout_ms
            )));
        }
        if self.agent.id.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.id must not be empty".into()));
        }
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            agent_id: self.agent.id.clone(),
            server_address: self.agent.server_address.clone(),
            reconnect_delay: Duration::from_millis(self.agent.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.agent.max_reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.agent.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.agent.read_timeout_ms),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_queue_size: self.queue.max_queue_size,
            history_capacity: self.queue.history_capacity,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.queue.command_timeout_ms)
    }
}

/// Which lookup location a skipped file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    EnvVar,
    System,
}

/// Where the effective configuration came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    #[default]
    Defaults,
}

/// A candidate file that could not be loaded and was passed over
#[derive(Debug)]
pub struct SkippedConfig {
    pub origin: ConfigOrigin,
    pub path: PathBuf,
    pub error: ConfigError,
}

/// Outcome of [`AgentConfig::resolve`]
#[derive(Debug, Default)]
pub struct ConfigReport {
    pub source: ConfigSource,
    pub skipped: Vec<SkippedConfig>,
}

impl ConfigReport {
    /// Emit the resolution outcome; call once the subscriber is installed
    pub fn log(&self) {
        for skipped in &self.skipped {
            match skipped.origin {
                ConfigOrigin::EnvVar => warn!(
                    path = %skipped.path.display(),
                    error = %skipped.error,
                    "{} set but file could not be loaded, trying fallback",
                    CONFIG_ENV_VAR
                ),
                ConfigOrigin::System => warn!(
                    path = %skipped.path.display(),
                    error = %skipped.error,
                    "system config file exists but could not be loaded"
                ),
            }
        }

        match &self.source {
            ConfigSource::File(path) => info!(path = %path.display(), "loaded agent configuration"),
            ConfigSource::Defaults => info!("no config file loaded, using compiled-in defaults"),
        }
    }
}

/// Identity and control-server link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub id: String,
    pub server_address: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Should exceed the server heartbeat interval
    pub read_timeout_ms: u64,
    /// When set, commands must carry a matching `authToken`
    pub auth_token: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            id: "agent-001".to_string(),
            server_address: "127.0.0.1:8080".to_string(),
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 15_000,
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub max_queue_size: usize,
    pub history_capacity: usize,
    pub command_timeout_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_queue_size: limits::DEFAULT_MAX_QUEUE_SIZE,
            history_capacity: limits::DEFAULT_HISTORY_CAPACITY,
            command_timeout_ms: limits::DEFAULT_COMMAND_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// In-process session model, no real browser
    Simulated,
    /// Browser-control endpoint reached over TCP
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSection {
    pub kind: DriverKind,
    pub address: Option<String>,
    pub io_timeout_ms: u64,
    pub simulated_latency_ms: u64,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            kind: DriverKind::Simulated,
            address: None,
            io_timeout_ms: 10_000,
            simulated_latency_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default tracing directive; `RUST_LOG` still wins when set
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AgentConfig::default();
        assert!(cfg.validate().is_ok());

        assert_eq!(cfg.agent.server_address, "127.0.0.1:8080");
        assert!(cfg.agent.auth_token.is_none());
        assert_eq!(cfg.queue.max_queue_size, 100);
        assert_eq!(cfg.queue.history_capacity, 200);
        assert_eq!(cfg.command_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.driver.kind, DriverKind::Simulated);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[agent]
id = "agent-eu-1"
server_address = "10.0.0.5:8080"
reconnect_delay_ms = 500
auth_token = "s3cret"

[queue]
max_queue_size = 10
history_capacity = 50
command_timeout_ms = 1500

[driver]
kind = "remote"
address = "127.0.0.1:9222"
io_timeout_ms = 1000

[logging]
level = "debug"
json = true
"#;
        let cfg: AgentConfig = toml::from_str(toml_str).unwrap();
        assert!(cfg.validate().is_ok());

        assert_eq!(cfg.agent.id, "agent-eu-1");
        assert_eq!(cfg.agent.auth_token.as_deref(), Some("s3cret"));
        assert_eq!(cfg.agent.max_reconnect_delay_ms, 30_000);
        assert_eq!(cfg.queue_config().max_queue_size, 10);
        assert_eq!(cfg.queue_config().history_capacity, 50);
        assert_eq!(cfg.driver.kind, DriverKind::Remote);
        assert_eq!(cfg.driver.address.as_deref(), Some("127.0.0.1:9222"));
        assert!(cfg.logging.json);

        let conn = cfg.connection_config();
        assert_eq!(conn.agent_id, "agent-eu-1");
        assert_eq!(conn.reconnect_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = AgentConfig::default();
        cfg.queue.max_queue_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = AgentConfig::default();
        cfg.queue.command_timeout_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AgentConfig::default();
        cfg.driver.kind = DriverKind::Remote;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("driver.address"));
    }

    #[test]
    fn test_io_timeout_must_fit_inside_command_timeout() {
        let mut cfg = AgentConfig::default();
        cfg.driver.io_timeout_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("driver.io_timeout_ms"));

        let mut cfg = AgentConfig::default();
        cfg.queue.command_timeout_ms = 5_000;
        cfg.driver.io_timeout_ms = 5_000;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("less than queue.command_timeout_ms"));

        cfg.driver.io_timeout_ms = 4_999;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_cli_path_errors_are_fatal() {
        let file = write_config("[queue]\nmax_queue_size = 0\n");
        let result = AgentConfig::resolve_from(
            Some(file.path()),
            None,
            Path::new("/nonexistent/agent.toml"),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let missing = AgentConfig::resolve_from(
            Some(Path::new("/nonexistent/cli.toml")),
            None,
            Path::new("/nonexistent/agent.toml"),
        );
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_env_path_falls_back_to_system_then_defaults() {
        let system = write_config("[agent]\nid = \"from-system\"\n");
        let (cfg, report) = AgentConfig::resolve_from(
            None,
            Some(Path::new("/nonexistent/env.toml")),
            system.path(),
        )
        .unwrap();
        assert_eq!(cfg.agent.id, "from-system");
        assert_eq!(report.source, ConfigSource::File(system.path().to_path_buf()));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].origin, ConfigOrigin::EnvVar);
        assert!(matches!(report.skipped[0].error, ConfigError::Read { .. }));

        let broken = write_config("this is not toml [");
        let (cfg, report) = AgentConfig::resolve_from(
            None,
            Some(broken.path()),
            Path::new("/nonexistent/agent.toml"),
        )
        .unwrap();
        assert_eq!(cfg.agent.id, AgentSection::default().id);
        assert_eq!(report.source, ConfigSource::Defaults);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, broken.path());
        assert!(matches!(report.skipped[0].error, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_unloadable_system_file_is_reported() {
        let system = write_config("[queue]\nhistory_capacity = 0\n");
        let (cfg, report) = AgentConfig::resolve_from(None, None, system.path()).unwrap();
        assert_eq!(cfg.queue.history_capacity, AgentConfig::default().queue.history_capacity);
        assert_eq!(report.source, ConfigSource::Defaults);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].origin, ConfigOrigin::System);
        assert!(matches!(report.skipped[0].error, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_env_path_wins_over_system() {
        let env = write_config("[agent]\nid = \"from-env\"\n");
        let system = write_config("[agent]\nid = \"from-system\"\n");
        let (cfg, report) =
            AgentConfig::resolve_from(None, Some(env.path()), system.path()).unwrap();
        assert_eq!(cfg.agent.id, "from-env");
        assert!(report.skipped.is_empty());
    }
}
