// Wire types of the dashboard backend's JSON API

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend-assigned job identifier
pub type JobId = String;

/// Job state as reported by `GET /api/status/{job_id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Running,
    Completed,
    Success,
    Failed,
    Cancelled,
    /// The backend no longer (or never) knew the job
    NotFound,
    /// Anything newer than this client; polled like `running`
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running | JobStatus::Unknown)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::NotFound => "not_found",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One poll of a job
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobSnapshot {
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub output: String,
    /// Some backends report their own percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostFacts {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub private_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostEntry {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub facts: HostFacts,
}

/// Inventory keyed by inventory hostname, sorted for display
pub type HostMap = BTreeMap<String, HostEntry>;

/// Playbook metadata from `GET /api/playbooks`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaybookInfo {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub description: String,
}

/// Body of `POST /api/run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub playbook: String,
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<Map<String, Value>>,
}

impl RunRequest {
    pub fn new(playbook: impl Into<String>, hosts: Vec<String>) -> Self {
        RunRequest {
            playbook: playbook.into(),
            hosts,
            extra_vars: None,
        }
    }

    pub fn with_extra_vars(mut self, vars: Map<String, Value>) -> Self {
        self.extra_vars = if vars.is_empty() { None } else { Some(vars) };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    #[serde(default)]
    pub success: bool,
}

/// `{"error": "..."}` body sent with non-2xx responses
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_status_parsing() {
        let snap: JobSnapshot =
            serde_json::from_value(json!({"status": "success", "output": "x", "progress": 40}))
                .unwrap();
        assert_eq!(snap.status, JobStatus::Success);
        assert!(snap.status.is_terminal());
        assert!(snap.status.is_success());
        assert_eq!(snap.progress, Some(40.0));

        let snap: JobSnapshot =
            serde_json::from_value(json!({"status": "queued", "start_time": "now"})).unwrap();
        assert_eq!(snap.status, JobStatus::Unknown);
        assert!(!snap.status.is_terminal());
        assert_eq!(snap.output, "");

        let snap: JobSnapshot = serde_json::from_value(json!({"status": "not_found"})).unwrap();
        assert!(snap.status.is_terminal());
        assert!(!snap.status.is_success());
    }

    #[test]
    fn test_hosts_parsing() {
        let hosts: HostMap = serde_json::from_value(json!({
            "web01": {"valid": true, "facts": {"hostname": "web01.lan", "system": "Ubuntu 22.04", "public_ip": "1.2.3.4", "private_ip": "10.0.0.4"}},
            "db01": {"valid": false, "facts": {"hostname": "db01"}}
        }))
        .unwrap();

        let names: Vec<&String> = hosts.keys().collect();
        assert_eq!(names, vec!["db01", "web01"]);
        assert_eq!(hosts["web01"].facts.private_ip, "10.0.0.4");
        assert!(!hosts["db01"].valid);
    }

    #[test]
    fn test_run_request_omits_empty_vars() {
        let req = RunRequest::new("linux/ubuntu/baseline/baseline.yml", vec!["h1".into()])
            .with_extra_vars(Map::new());
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("extra_vars").is_none());
        assert_eq!(json["hosts"], json!(["h1"]));
    }
}
