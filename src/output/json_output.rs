// JSON output for structured logging
//
// One JSON object per line on stdout (NDJSON). Logs go to stderr, so stdout
// can be piped straight into `jq` or a log shipper.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::{HostMap, JobSnapshot, PlaybookInfo};
use crate::executor::{JobHandle, JobOutcome, JobUpdate, PollError, RunSummary};
use crate::parser::ParsedLog;
use crate::plugins::JobObserver;

/// JSON output manager for machine-readable logging
pub struct JsonOutput {
    verbose: bool,
    quiet: bool,
}

impl JsonOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        JsonOutput { verbose, quiet }
    }

    pub fn print_hosts(&self, hosts: &HostMap, valid_only: bool) {
        let hosts: Vec<Value> = hosts
            .iter()
            .filter(|(_, entry)| !valid_only || entry.valid)
            .map(|(name, entry)| {
                json!({
                    "host": name,
                    "valid": entry.valid,
                    "facts": entry.facts,
                })
            })
            .collect();
        self.emit_json(&json!({ "event": "hosts", "hosts": hosts }));
    }

    pub fn print_playbooks(&self, playbooks: &[PlaybookInfo]) {
        self.emit_json(&json!({ "event": "playbooks", "playbooks": playbooks }));
    }

    pub fn print_snapshot(&self, job_id: &str, snapshot: &JobSnapshot, progress: u8, show_output: bool) {
        let mut event = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": "job_status",
            "job_id": job_id,
            "status": snapshot.status.as_str(),
            "progress": progress,
        });
        if show_output {
            if let Some(obj) = event.as_object_mut() {
                obj.insert("output".to_string(), json!(snapshot.output));
                obj.insert(
                    "parsed".to_string(),
                    json!(crate::parser::parse_output(&snapshot.output)),
                );
            }
        }
        self.emit_json(&event);
    }

    pub fn print_parsed(&self, log: &ParsedLog) {
        self.emit_json(&json!({
            "event": "parsed_log",
            "nodes": log.nodes,
            "counts": log.status_counts(),
            "overall_status": log.final_recap().and_then(|r| r.overall_status()),
            "has_failures": log.has_failures(),
        }));
    }

    pub fn print_progress(&self, progress: u8, log: &ParsedLog) {
        self.emit_json(&json!({
            "event": "progress",
            "progress": progress,
            "tasks": log.task_count(),
            "results": log.result_count(),
        }));
    }

    pub fn print_cancelled(&self, job_id: &str, accepted: bool) {
        self.emit_json(&json!({
            "event": "job_cancel",
            "job_id": job_id,
            "success": accepted,
        }));
    }

    pub fn print_summary(&self, summary: &RunSummary) {
        self.emit_json(&summary_event(summary));
    }

    /// Emit a JSON object as a single line (NDJSON format)
    fn emit_json(&self, value: &Value) {
        if let Ok(json_str) = serde_json::to_string(value) {
            println!("{}", json_str);
        }
    }
}

fn start_event(job: &JobHandle) -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "event": "job_start",
        "job_id": job.job_id,
        "playbook": job.playbook,
        "hosts": job.hosts,
        "group": job.group,
    })
}

fn update_event(job: &JobHandle, update: &JobUpdate, verbose: bool) -> Value {
    let mut event = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "event": "job_update",
        "job_id": job.job_id,
        "sequence": update.sequence,
        "status": update.snapshot.status.as_str(),
        "progress": update.progress,
    });

    if let Some(obj) = event.as_object_mut() {
        if !update.new_output.is_empty() {
            obj.insert("output".to_string(), json!(update.new_output));
            if update.output_reset {
                obj.insert("output_reset".to_string(), json!(true));
            }
        }
        if verbose {
            if let Some(native) = update.snapshot.progress {
                obj.insert("native_progress".to_string(), json!(native));
            }
        }
    }
    event
}

fn complete_event(outcome: &JobOutcome) -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "event": "job_complete",
        "job_id": outcome.handle.job_id,
        "playbook": outcome.handle.playbook,
        "status": outcome.status().map(|s| s.as_str()),
        "progress": outcome.progress(),
        "failed": outcome.is_failure(),
        "results": outcome.counts,
        "error": outcome.error,
    })
}

fn summary_event(summary: &RunSummary) -> Value {
    let refused: Vec<Value> = summary
        .launch_failures
        .iter()
        .map(|f| {
            json!({
                "playbook": f.plan.playbook,
                "hosts": f.plan.hosts,
                "error": f.error.to_string(),
            })
        })
        .collect();

    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "event": "run_complete",
        "jobs": summary.outcomes.len(),
        "succeeded": summary.succeeded(),
        "failed": summary.failed(),
        "interrupted": summary.interrupted,
        "not_started": refused,
        "has_failures": summary.has_failures(),
    })
}

#[async_trait]
impl JobObserver for JsonOutput {
    fn name(&self) -> &str {
        "ndjson"
    }

    async fn on_start(&self, job: &JobHandle) {
        if !self.quiet {
            self.emit_json(&start_event(job));
        }
    }

    async fn on_update(&self, job: &JobHandle, update: &JobUpdate) {
        if !self.quiet {
            self.emit_json(&update_event(job, update, self.verbose));
        }
    }

    async fn on_poll_error(&self, job: &JobHandle, error: &PollError) {
        self.emit_json(&json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": "poll_error",
            "job_id": job.job_id,
            "consecutive": error.consecutive,
            "error": error.source.to_string(),
        }));
    }

    async fn on_group_progress(&self, group: &str, progress: u8, jobs: usize) {
        if !self.quiet {
            self.emit_json(&json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "event": "group_progress",
                "group": group,
                "progress": progress,
                "jobs": jobs,
            }));
        }
    }

    async fn on_complete(&self, outcome: &JobOutcome) {
        self.emit_json(&complete_event(outcome));
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        self.print_summary(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::snapshot;
    use crate::api::JobStatus;

    fn update(output: &str, new_output: &str, reset: bool) -> JobUpdate {
        let mut snap = snapshot(JobStatus::Running, output);
        snap.progress = Some(12.0);
        JobUpdate {
            job_id: "job-1".to_string(),
            snapshot: snap,
            progress: 20,
            sequence: 3,
            new_output: new_output.to_string(),
            output_reset: reset,
        }
    }

    #[test]
    fn test_update_event_carries_only_new_output() {
        let job = JobHandle::existing("job-1");

        let event = update_event(&job, &update("a\nb\n", "b\n", false), false);
        assert_eq!(event["event"], "job_update");
        assert_eq!(event["output"], "b\n");
        assert_eq!(event["progress"], 20);
        assert!(event.get("output_reset").is_none());
        assert!(event.get("native_progress").is_none());

        let event = update_event(&job, &update("a\n", "", false), true);
        assert!(event.get("output").is_none());
        assert_eq!(event["native_progress"], 12.0);

        let event = update_event(&job, &update("x\n", "x\n", true), false);
        assert_eq!(event["output_reset"], true);
    }

    #[test]
    fn test_summary_event() {
        let summary = RunSummary::default();
        let event = summary_event(&summary);
        assert_eq!(event["event"], "run_complete");
        assert_eq!(event["jobs"], 0);
        assert_eq!(event["has_failures"], false);
    }

    #[test]
    fn test_complete_event() {
        let outcome = JobOutcome {
            handle: JobHandle::existing("job-9"),
            last: None,
            error: Some("gave up".to_string()),
            counts: Default::default(),
            recap_failures: false,
        };
        let event = complete_event(&outcome);
        assert_eq!(event["status"], Value::Null);
        assert_eq!(event["failed"], true);
        assert_eq!(event["results"]["ok"], 0);
    }
}
