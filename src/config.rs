// Client configuration
//
// Resolution order: `--config` path, `$PLAYDECK_CONFIG`, `./playdeck.yaml`,
// built-in defaults. `$PLAYDECK_SERVER` then overrides the server URL, and
// the CLI's `--server` overrides that.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::executor::retry::{BackoffKind, DelayStrategy};

pub const CONFIG_ENV: &str = "PLAYDECK_CONFIG";
pub const SERVER_ENV: &str = "PLAYDECK_SERVER";
pub const LOCAL_CONFIG_FILE: &str = "playdeck.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Step for the linear strategy
    #[serde(default = "default_increment_ms")]
    pub increment_ms: u64,
    #[serde(default)]
    pub jitter: bool,
    /// Stop following a job after this many failed polls in a row.
    /// Unset means keep retrying until the job finishes or is cancelled.
    #[serde(default)]
    pub max_consecutive_errors: Option<u32>,
}

fn default_base_interval_ms() -> u64 {
    1000
}
fn default_max_interval_ms() -> u64 {
    5000
}
fn default_increment_ms() -> u64 {
    1000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffKind::default(),
            base_interval_ms: default_base_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            increment_ms: default_increment_ms(),
            jitter: false,
            max_consecutive_errors: None,
        }
    }
}

impl PollingConfig {
    pub fn delay_strategy(&self) -> DelayStrategy {
        let base = Duration::from_millis(self.base_interval_ms);
        let max = Duration::from_millis(self.max_interval_ms);
        match self.backoff {
            BackoffKind::Fixed => DelayStrategy::Fixed(base),
            BackoffKind::Exponential => DelayStrategy::Exponential {
                base,
                max,
                jitter: self.jitter,
            },
            BackoffKind::Linear => DelayStrategy::Linear {
                base,
                increment: Duration::from_millis(self.increment_ms),
                max,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Print new log lines as they arrive
    #[serde(default)]
    pub stream: bool,
    /// Print the parsed log of each job once it finishes
    #[serde(default)]
    pub show_output: bool,
    /// Observer specs (`name[:arg]`) always registered
    #[serde(default)]
    pub observers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// File holding per-host baseline settings
    #[serde(default)]
    pub baseline_hosts_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration following the documented resolution order
    pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let local = PathBuf::from(LOCAL_CONFIG_FILE);

        let path = match (explicit, env_path) {
            (Some(p), _) => Some(p.to_path_buf()),
            (None, Some(p)) => Some(p),
            (None, None) if local.exists() => Some(local),
            _ => None,
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("no config file found, using defaults");
                Config::default()
            }
        };

        if let Ok(server) = std::env::var(SERVER_ENV) {
            if !server.trim().is_empty() {
                config.server.base_url = server;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading config");
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Config, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.polling.base_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "polling.base_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.polling.max_interval_ms < self.polling.base_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "polling.max_interval_ms ({}) is below base_interval_ms ({})",
                self.polling.max_interval_ms, self.polling.base_interval_ms
            )));
        }
        if self.polling.max_consecutive_errors == Some(0) {
            return Err(ConfigError::Invalid(
                "polling.max_consecutive_errors must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.base_url, "http://127.0.0.1:5000");
        assert_eq!(config.polling.delay_strategy(), DelayStrategy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "server:\n  base_url: http://dash.lan:8080\npolling:\n  backoff: linear\n  increment_ms: 250\n",
        )
        .unwrap();
        assert_eq!(config.server.base_url, "http://dash.lan:8080");
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(
            config.polling.delay_strategy(),
            DelayStrategy::Linear {
                base: Duration::from_secs(1),
                increment: Duration::from_millis(250),
                max: Duration::from_secs(5),
            }
        );
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "output:\n  stream: true\n  observers: [\"json_log:/tmp/x.jsonl\"]").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.output.stream);
        assert_eq!(config.output.observers, vec!["json_log:/tmp/x.jsonl".to_string()]);
    }

    #[test]
    fn test_bad_yaml_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server: [not, a, map]").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_validate_rejects_inverted_intervals() {
        let mut config = Config::default();
        config.polling.max_interval_ms = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.polling.max_consecutive_errors = Some(0);
        assert!(config.validate().is_err());
    }
}
