// Status polling for launched jobs
//
// Each job is followed by one lazy stream. The stream polls immediately,
// then sleeps with back-off between polls, and ends after the first terminal
// snapshot or when its `CancelToken` fires. Fetch errors are yielded and
// retried rather than ending the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use super::retry::{calculate_delay, DelayStrategy};
use crate::api::{ApiClient, ApiError, JobId, JobSnapshot};
use crate::config::PollingConfig;
use crate::progress::{effective_progress, ProgressRegistry};

/// Shared stop signal for pollers
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PollerSettings {
    pub strategy: DelayStrategy,
    pub max_consecutive_errors: Option<u32>,
}

impl From<&PollingConfig> for PollerSettings {
    fn from(config: &PollingConfig) -> Self {
        PollerSettings {
            strategy: config.delay_strategy(),
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }
}

/// One successful poll of a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub snapshot: JobSnapshot,
    /// Displayed progress, never lower than an earlier update's
    pub progress: u8,
    /// 1 for the first update of the job
    pub sequence: u64,
    /// Output that arrived since the previous update
    pub new_output: String,
    /// The backend's output no longer extends what was seen before,
    /// so `new_output` holds the whole output
    pub output_reset: bool,
}

impl JobUpdate {
    pub fn is_terminal(&self) -> bool {
        self.snapshot.status.is_terminal()
    }
}

#[derive(Debug, Error)]
#[error("polling job {job_id} failed ({consecutive} in a row): {source}")]
pub struct PollError {
    pub job_id: JobId,
    pub consecutive: u32,
    #[source]
    pub source: ApiError,
}

/// Follows jobs on one backend
#[derive(Clone)]
pub struct JobPoller {
    client: Arc<dyn ApiClient>,
    registry: Arc<ProgressRegistry>,
    settings: PollerSettings,
}

impl JobPoller {
    pub fn new(
        client: Arc<dyn ApiClient>,
        registry: Arc<ProgressRegistry>,
        settings: PollerSettings,
    ) -> Self {
        JobPoller {
            client,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ProgressRegistry> {
        &self.registry
    }

    /// Stream of updates for one job
    pub fn watch(
        &self,
        job_id: &str,
        token: CancelToken,
    ) -> BoxStream<'static, Result<JobUpdate, PollError>> {
        let state = PollState {
            client: Arc::clone(&self.client),
            registry: Arc::clone(&self.registry),
            settings: self.settings.clone(),
            job_id: job_id.to_string(),
            token,
            sequence: 0,
            last_output: String::new(),
            idle_polls: 0,
            consecutive_errors: 0,
            started: false,
            done: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.done || state.token.is_cancelled() {
                return None;
            }

            if state.started {
                let delay = state.next_delay();
                trace!(job_id = %state.job_id, ?delay, "waiting before next poll");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = state.token.cancelled() => {
                        debug!(job_id = %state.job_id, "polling cancelled");
                        return None;
                    }
                }
            }
            state.started = true;

            let fetched = tokio::select! {
                result = state.client.status(&state.job_id) => result,
                _ = state.token.cancelled() => {
                    debug!(job_id = %state.job_id, "polling cancelled");
                    return None;
                }
            };

            match fetched {
                Ok(snapshot) => {
                    let update = state.apply(snapshot);
                    Some((Ok(update), state))
                }
                Err(source) => {
                    let error = state.fail(source);
                    Some((Err(error), state))
                }
            }
        })
        .boxed()
    }

    /// Drive a job's stream to the end and return its last update.
    ///
    /// Returns `Ok(None)` when cancelled before any successful poll, and the
    /// last error when the stream gave up after consecutive failures.
    pub async fn poll_until_terminal(
        &self,
        job_id: &str,
        token: CancelToken,
    ) -> Result<Option<JobUpdate>, PollError> {
        let mut updates = self.watch(job_id, token);
        let mut last = None;
        let mut last_error = None;

        while let Some(item) = updates.next().await {
            match item {
                Ok(update) => {
                    last = Some(update);
                    last_error = None;
                }
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(last),
        }
    }
}

struct PollState {
    client: Arc<dyn ApiClient>,
    registry: Arc<ProgressRegistry>,
    settings: PollerSettings,
    job_id: JobId,
    token: CancelToken,
    sequence: u64,
    last_output: String,
    idle_polls: u32,
    consecutive_errors: u32,
    started: bool,
    done: bool,
}

impl PollState {
    fn next_delay(&self) -> Duration {
        calculate_delay(
            &self.settings.strategy,
            backoff_attempt(self.idle_polls, self.consecutive_errors),
        )
    }

    fn apply(&mut self, snapshot: JobSnapshot) -> JobUpdate {
        let terminal = snapshot.status.is_terminal();
        let estimate = effective_progress(Some(&snapshot.output), snapshot.progress, terminal);
        let progress = self.registry.record(&self.job_id, estimate);

        let (new_output, output_reset) = output_delta(&self.last_output, &snapshot.output);
        if new_output.is_empty() {
            self.idle_polls = self.idle_polls.saturating_add(1);
        } else {
            self.idle_polls = 0;
        }
        self.consecutive_errors = 0;
        self.last_output = snapshot.output.clone();
        self.sequence += 1;

        if terminal {
            debug!(job_id = %self.job_id, status = %snapshot.status, "job finished");
            self.done = true;
        }

        JobUpdate {
            job_id: self.job_id.clone(),
            snapshot,
            progress,
            sequence: self.sequence,
            new_output,
            output_reset,
        }
    }

    fn fail(&mut self, source: ApiError) -> PollError {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        warn!(
            job_id = %self.job_id,
            consecutive = self.consecutive_errors,
            error = %source,
            "status poll failed"
        );

        if let Some(max) = self.settings.max_consecutive_errors {
            if self.consecutive_errors >= max {
                warn!(job_id = %self.job_id, "giving up after {} failed polls", max);
                self.done = true;
            }
        }

        PollError {
            job_id: self.job_id.clone(),
            consecutive: self.consecutive_errors,
            source,
        }
    }
}

/// Errors back off by their own count; otherwise the delay grows with the
/// number of polls that brought no new output.
fn backoff_attempt(idle_polls: u32, consecutive_errors: u32) -> u32 {
    if consecutive_errors > 0 {
        consecutive_errors
    } else {
        idle_polls
    }
}

fn output_delta(previous: &str, current: &str) -> (String, bool) {
    match current.strip_prefix(previous) {
        Some(suffix) => (suffix.to_string(), false),
        None => (current.to_string(), true),
    }
}
