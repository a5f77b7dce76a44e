// Event system for TUI updates

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::JobStatus;
use crate::executor::{JobHandle, JobOutcome, JobUpdate, PollError, RunSummary};
use crate::parser::{parse_output, RecapNode};
use crate::plugins::JobObserver;

/// Events sent from the job pollers to the dashboard
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    JobStart {
        job_id: String,
        label: String,
        hosts: Vec<String>,
        group: Option<String>,
    },

    JobUpdate {
        job_id: String,
        status: JobStatus,
        progress: u8,
        new_output: String,
        output_reset: bool,
    },

    PollError {
        job_id: String,
        message: String,
    },

    GroupProgress {
        group: String,
        progress: u8,
        jobs: usize,
    },

    JobComplete {
        job_id: String,
        status: Option<JobStatus>,
        failed: bool,
        recap: Option<RecapNode>,
    },

    RunComplete {
        succeeded: usize,
        failed: usize,
        interrupted: bool,
    },
}

/// Observer that forwards job events into a channel
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<DashboardEvent>,
}

impl EventEmitter {
    /// Create a new event emitter with the given channel
    pub fn new(tx: mpsc::UnboundedSender<DashboardEvent>) -> Self {
        EventEmitter { tx }
    }

    fn send(&self, event: DashboardEvent) {
        // The dashboard may already be closed
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl JobObserver for EventEmitter {
    fn name(&self) -> &str {
        "tui"
    }

    async fn on_start(&self, job: &JobHandle) {
        self.send(DashboardEvent::JobStart {
            job_id: job.job_id.clone(),
            label: job.label.clone(),
            hosts: job.hosts.clone(),
            group: job.group.clone(),
        });
    }

    async fn on_update(&self, job: &JobHandle, update: &JobUpdate) {
        self.send(DashboardEvent::JobUpdate {
            job_id: job.job_id.clone(),
            status: update.snapshot.status,
            progress: update.progress,
            new_output: update.new_output.clone(),
            output_reset: update.output_reset,
        });
    }

    async fn on_poll_error(&self, job: &JobHandle, error: &PollError) {
        self.send(DashboardEvent::PollError {
            job_id: job.job_id.clone(),
            message: error.source.to_string(),
        });
    }

    async fn on_group_progress(&self, group: &str, progress: u8, jobs: usize) {
        self.send(DashboardEvent::GroupProgress {
            group: group.to_string(),
            progress,
            jobs,
        });
    }

    async fn on_complete(&self, outcome: &JobOutcome) {
        let recap = outcome
            .last
            .as_ref()
            .and_then(|u| parse_output(&u.snapshot.output).final_recap().cloned());
        self.send(DashboardEvent::JobComplete {
            job_id: outcome.handle.job_id.clone(),
            status: outcome.status(),
            failed: outcome.is_failure(),
            recap,
        });
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        self.send(DashboardEvent::RunComplete {
            succeeded: summary.succeeded(),
            failed: summary.failed(),
            interrupted: summary.interrupted,
        });
    }
}

/// Create a new event channel
pub fn create_event_channel() -> (EventEmitter, mpsc::UnboundedReceiver<DashboardEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventEmitter::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::snapshot;

    #[tokio::test]
    async fn test_emitter_forwards_recap_on_complete() {
        let (emitter, mut rx) = create_event_channel();
        let job = JobHandle::existing("job-1");

        emitter.on_start(&job).await;
        let outcome = JobOutcome {
            handle: job,
            last: Some(JobUpdate {
                job_id: "job-1".to_string(),
                snapshot: snapshot(
                    JobStatus::Success,
                    "PLAY RECAP\nh1 : ok=2 changed=1 unreachable=0 failed=0 skipped=0\n",
                ),
                progress: 100,
                sequence: 4,
                new_output: String::new(),
                output_reset: false,
            }),
            error: None,
            counts: Default::default(),
            recap_failures: false,
        };
        emitter.on_complete(&outcome).await;

        assert!(matches!(rx.recv().await, Some(DashboardEvent::JobStart { .. })));
        match rx.recv().await {
            Some(DashboardEvent::JobComplete { status, failed, recap, .. }) => {
                assert_eq!(status, Some(JobStatus::Success));
                assert!(!failed);
                assert_eq!(recap.unwrap().rows[0].changed, 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_dashboard_is_ignored() {
        let (emitter, rx) = create_event_channel();
        drop(rx);
        emitter.on_start(&JobHandle::existing("job-1")).await;
    }
}
