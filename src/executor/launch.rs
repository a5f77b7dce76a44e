// Turning a playbook/host selection into backend run requests

use serde_json::{Map, Value};

use super::baseline::{is_baseline_playbook, BaselineConfigs, BaselineError};
use crate::api::RunRequest;

/// One job to post to `/api/run`
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub playbook: String,
    /// Shown on the job's card
    pub label: String,
    pub hosts: Vec<String>,
    pub extra_vars: Map<String, Value>,
    /// Set for per-host baseline jobs: the playbook path they were split from
    pub group: Option<String>,
}

impl LaunchPlan {
    pub fn request(&self) -> RunRequest {
        RunRequest::new(self.playbook.clone(), self.hosts.clone())
            .with_extra_vars(self.extra_vars.clone())
    }
}

/// Plan the jobs for the selected playbooks and hosts.
///
/// Baselines run against several hosts are split into one job per host, each
/// carrying that host's settings. Every other playbook is a single job for
/// all hosts. User-supplied `extra_vars` go to every job; per-host baseline
/// settings take precedence over them.
pub fn plan_launches(
    playbooks: &[String],
    hosts: &[String],
    extra_vars: &Map<String, Value>,
    baseline: &BaselineConfigs,
) -> Result<Vec<LaunchPlan>, BaselineError> {
    let mut plans = Vec::new();

    for playbook in playbooks {
        let label = display_name(playbook);

        if !is_baseline_playbook(playbook) {
            plans.push(LaunchPlan {
                playbook: playbook.clone(),
                label,
                hosts: hosts.to_vec(),
                extra_vars: extra_vars.clone(),
                group: None,
            });
            continue;
        }

        baseline.check(hosts)?;

        let fan_out = hosts.len() > 1;
        for host in hosts {
            let mut vars = extra_vars.clone();
            if let Some(host_vars) = baseline.host_extra_vars(host) {
                vars.extend(host_vars);
            }
            if fan_out {
                vars.insert("single_host_execution".into(), Value::Bool(true));
            }

            plans.push(LaunchPlan {
                playbook: playbook.clone(),
                label: if fan_out {
                    format!("{} ({})", label, host)
                } else {
                    label.clone()
                },
                hosts: vec![host.clone()],
                extra_vars: vars,
                group: fan_out.then(|| playbook.clone()),
            });
        }
    }

    Ok(plans)
}

/// File name without directories or the `.yml` extension
pub fn display_name(playbook: &str) -> String {
    let file = playbook.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(playbook);
    file.strip_suffix(".yml")
        .or_else(|| file.strip_suffix(".yaml"))
        .unwrap_or(file)
        .to_string()
}

/// Parse `key=value` pairs given on the command line.
///
/// Values that read as JSON (numbers, booleans, quoted strings, lists) keep
/// their type; anything else is a string.
pub fn parse_extra_vars(pairs: &[String]) -> Result<Map<String, Value>, String> {
    let mut vars = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty variable name in '{}'", pair));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}
