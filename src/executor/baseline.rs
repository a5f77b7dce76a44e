// Baseline playbooks
//
// A baseline renames a host and sets its account passwords, so every host it
// runs against needs its own settings. When several hosts are selected the
// launch is split into one single-host job per host.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroize;

pub const MIN_PASSWORD_LEN: usize = 8;

const BASELINE_MARKERS: [&str; 3] = ["baseline", "configuracao-base", "config-base"];

pub fn is_baseline_playbook(name: &str) -> bool {
    let lower = name.to_lowercase();
    BASELINE_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("cannot read baseline settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid baseline settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("baseline settings missing or invalid for {} host(s)", .problems.len())]
    Unconfigured { problems: Vec<(String, String)> },

    #[error("could not read baseline settings from the terminal: {0}")]
    Prompt(#[source] io::Error),
}

impl BaselineError {
    /// Hosts that block the launch
    pub fn hosts(&self) -> Vec<String> {
        match self {
            BaselineError::Unconfigured { problems } => {
                problems.iter().map(|(host, _)| host.clone()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// A password held in memory only as long as needed
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BaselineHostConfig {
    /// Defaults to the inventory name
    #[serde(default)]
    pub new_hostname: Option<String>,
    #[serde(default)]
    pub parceiro_password: Secret,
    #[serde(default)]
    pub root_password: Secret,
}

impl BaselineHostConfig {
    /// Reason this config cannot be used, if any
    pub fn problem(&self) -> Option<String> {
        if let Some(name) = &self.new_hostname {
            if name.trim().is_empty() {
                return Some("new_hostname is empty".to_string());
            }
        }
        if self.parceiro_password.len() < MIN_PASSWORD_LEN {
            return Some(format!(
                "parceiro_password must have at least {} characters",
                MIN_PASSWORD_LEN
            ));
        }
        if self.root_password.len() < MIN_PASSWORD_LEN {
            return Some(format!(
                "root_password must have at least {} characters",
                MIN_PASSWORD_LEN
            ));
        }
        None
    }
}

/// Baseline settings for every host that may be targeted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaselineConfigs {
    #[serde(default)]
    hosts: BTreeMap<String, BaselineHostConfig>,
}

impl BaselineConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, BaselineError> {
        let content = std::fs::read_to_string(path).map_err(|source| BaselineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let configs = Self::from_yaml(&content).map_err(|source| BaselineError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), hosts = configs.hosts.len(), "loaded baseline settings");
        Ok(configs)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn insert(&mut self, host: impl Into<String>, config: BaselineHostConfig) {
        self.hosts.insert(host.into(), config);
    }

    pub fn get(&self, host: &str) -> Option<&BaselineHostConfig> {
        self.hosts.get(host)
    }

    pub fn is_configured(&self, host: &str) -> bool {
        self.get(host).map_or(false, |c| c.problem().is_none())
    }

    /// Every selected host must have usable settings
    pub fn check(&self, hosts: &[String]) -> Result<(), BaselineError> {
        let problems: Vec<(String, String)> = hosts
            .iter()
            .filter_map(|host| match self.get(host) {
                None => Some((host.clone(), "not configured".to_string())),
                Some(config) => config.problem().map(|p| (host.clone(), p)),
            })
            .collect();

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BaselineError::Unconfigured { problems })
        }
    }

    /// Extra vars for a single-host baseline run
    pub fn host_extra_vars(&self, host: &str) -> Option<Map<String, Value>> {
        let config = self.get(host)?;
        let hostname = config
            .new_hostname
            .clone()
            .unwrap_or_else(|| host.to_string());

        let mut vars = Map::new();
        vars.insert("new_hostname".into(), Value::String(hostname));
        vars.insert(
            "parceiro_password".into(),
            Value::String(config.parceiro_password.expose().to_string()),
        );
        // Windows baselines read the partner password under this name
        vars.insert(
            "user_password".into(),
            Value::String(config.parceiro_password.expose().to_string()),
        );
        vars.insert(
            "root_password".into(),
            Value::String(config.root_password.expose().to_string()),
        );
        Some(vars)
    }

    /// Ask on the terminal for every host that lacks usable settings
    pub fn prompt_missing(&mut self, hosts: &[String]) -> Result<(), BaselineError> {
        let stdin = io::stdin();
        let mut lines = stdin.lock();
        self.prompt_missing_with(hosts, |label, secret| {
            if secret {
                rpassword::prompt_password(label)
            } else {
                eprint!("{}", label);
                io::stderr().flush()?;
                let mut line = String::new();
                lines.read_line(&mut line)?;
                Ok(line.trim().to_string())
            }
        })
    }

    pub(crate) fn prompt_missing_with<F>(
        &mut self,
        hosts: &[String],
        mut ask: F,
    ) -> Result<(), BaselineError>
    where
        F: FnMut(&str, bool) -> io::Result<String>,
    {
        for host in hosts {
            if self.is_configured(host) {
                continue;
            }

            let hostname = ask(&format!("[{}] new hostname [{}]: ", host, host), false)
                .map_err(BaselineError::Prompt)?;
            let parceiro = ask_password(&mut ask, &format!("[{}] parceiro password: ", host))?;
            let root = ask_password(&mut ask, &format!("[{}] root password: ", host))?;

            self.insert(
                host.clone(),
                BaselineHostConfig {
                    new_hostname: if hostname.is_empty() {
                        None
                    } else {
                        Some(hostname)
                    },
                    parceiro_password: parceiro,
                    root_password: root,
                },
            );
        }
        Ok(())
    }
}

fn ask_password<F>(ask: &mut F, label: &str) -> Result<Secret, BaselineError>
where
    F: FnMut(&str, bool) -> io::Result<String>,
{
    loop {
        let value = Secret::new(ask(label, true).map_err(BaselineError::Prompt)?);
        if value.len() >= MIN_PASSWORD_LEN {
            return Ok(value);
        }
        eprintln!("password must have at least {} characters", MIN_PASSWORD_LEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    const SETTINGS: &str = r#"
hosts:
  web01:
    new_hostname: srv-web-01
    parceiro_password: parceiro123
    root_password: rootroot9
  db01:
    parceiro_password: short
    root_password: rootroot9
"#;

    #[test]
    fn test_detects_baseline_playbooks() {
        assert!(is_baseline_playbook("linux/ubuntu/baseline/baseline_ubuntu.yml"));
        assert!(is_baseline_playbook("Configuracao-Base-Windows.yml"));
        assert!(is_baseline_playbook("rhel_config-base.yml"));
        assert!(!is_baseline_playbook("site.yml"));
        assert!(!is_baseline_playbook("configuracao.yml"));
    }

    #[test]
    fn test_check_names_every_blocking_host() {
        let configs = BaselineConfigs::from_yaml(SETTINGS).unwrap();
        let hosts = vec!["web01".to_string(), "db01".to_string(), "app01".to_string()];

        let err = configs.check(&hosts).unwrap_err();
        assert_eq!(err.hosts(), vec!["db01".to_string(), "app01".to_string()]);
        match err {
            BaselineError::Unconfigured { problems } => {
                assert!(problems[0].1.contains("parceiro_password"));
                assert_eq!(problems[1].1, "not configured");
            }
            other => panic!("unexpected error: {}", other),
        }

        assert!(configs.check(&["web01".to_string()]).is_ok());
    }

    #[test]
    fn test_host_extra_vars() {
        let configs = BaselineConfigs::from_yaml(SETTINGS).unwrap();
        let vars = configs.host_extra_vars("web01").unwrap();

        assert_eq!(vars["new_hostname"], "srv-web-01");
        assert_eq!(vars["parceiro_password"], "parceiro123");
        assert_eq!(vars["user_password"], "parceiro123");
        assert_eq!(vars["root_password"], "rootroot9");

        // Hostname falls back to the inventory name
        let vars = configs.host_extra_vars("db01").unwrap();
        assert_eq!(vars["new_hostname"], "db01");
        assert!(configs.host_extra_vars("app01").is_none());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let configs = BaselineConfigs::from_yaml(SETTINGS).unwrap();
        let debug = format!("{:?}", configs);
        assert!(!debug.contains("parceiro123"));
        assert!(debug.contains("Secret(***)"));
    }

    #[test]
    fn test_prompt_fills_missing_hosts_only() {
        let mut configs = BaselineConfigs::from_yaml(SETTINGS).unwrap();
        let mut answers: VecDeque<&str> =
            VecDeque::from(vec!["", "tiny", "longenough1", "longenough2"]);
        let mut asked = Vec::new();

        configs
            .prompt_missing_with(&["web01".to_string(), "db01".to_string()], |label, _| {
                asked.push(label.to_string());
                Ok(answers.pop_front().unwrap_or_default().to_string())
            })
            .unwrap();

        assert!(asked.iter().all(|l| l.starts_with("[db01]")));
        assert_eq!(asked.len(), 4);
        let db = configs.get("db01").unwrap();
        assert_eq!(db.new_hostname, None);
        assert_eq!(db.parceiro_password.expose(), "longenough1");
        assert_eq!(db.root_password.expose(), "longenough2");
        assert_eq!(configs.get("web01").unwrap().new_hostname.as_deref(), Some("srv-web-01"));
    }
}
