// Launching jobs and following them to completion

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::launch::LaunchPlan;
use super::poller::{CancelToken, JobPoller, JobUpdate, PollerSettings};
use crate::api::{ApiClient, ApiError, JobId, JobStatus};
use crate::parser::{parse_output, StatusCounts};
use crate::plugins::ObserverRegistry;
use crate::progress::ProgressRegistry;

/// A job the backend accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: JobId,
    pub playbook: String,
    pub label: String,
    pub hosts: Vec<String>,
    pub group: Option<String>,
}

impl JobHandle {
    /// Handle for a job started elsewhere (`watch`)
    pub fn existing(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        JobHandle {
            label: job_id.clone(),
            job_id,
            playbook: String::new(),
            hosts: Vec::new(),
            group: None,
        }
    }
}

/// A plan the backend refused
#[derive(Debug)]
pub struct LaunchFailure {
    pub plan: LaunchPlan,
    pub error: ApiError,
}

#[derive(Debug, Default)]
pub struct LaunchReport {
    pub handles: Vec<JobHandle>,
    pub failures: Vec<LaunchFailure>,
}

/// How a followed job ended
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub handle: JobHandle,
    pub last: Option<JobUpdate>,
    /// Last poll error, when polling gave up
    pub error: Option<String>,
    pub counts: StatusCounts,
    pub recap_failures: bool,
}

impl JobOutcome {
    fn new(handle: JobHandle, last: Option<JobUpdate>, error: Option<String>) -> Self {
        let (counts, recap_failures) = match &last {
            Some(update) => {
                let log = parse_output(&update.snapshot.output);
                (log.status_counts(), log.has_failures())
            }
            None => (StatusCounts::default(), false),
        };
        JobOutcome {
            handle,
            last,
            error,
            counts,
            recap_failures,
        }
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.last.as_ref().map(|u| u.snapshot.status)
    }

    pub fn progress(&self) -> u8 {
        self.last.as_ref().map_or(0, |u| u.progress)
    }

    pub fn is_finished(&self) -> bool {
        self.status().map_or(false, |s| s.is_terminal())
    }

    pub fn is_failure(&self) -> bool {
        match self.status() {
            Some(status) if status.is_terminal() => !status.is_success() || self.recap_failures,
            _ => self.error.is_some(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<JobOutcome>,
    pub launch_failures: Vec<LaunchFailure>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.launch_failures.is_empty() || self.outcomes.iter().any(|o| o.is_failure())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.is_finished() && !o.is_failure())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.launch_failures.len() + self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn unfinished(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| !o.is_finished())
    }
}

/// Runs the launch/poll/notify cycle for a set of jobs
pub struct JobSupervisor {
    client: Arc<dyn ApiClient>,
    poller: JobPoller,
    observers: Arc<ObserverRegistry>,
    token: CancelToken,
}

impl JobSupervisor {
    pub fn new(
        client: Arc<dyn ApiClient>,
        settings: PollerSettings,
        observers: ObserverRegistry,
    ) -> Self {
        let poller = JobPoller::new(
            Arc::clone(&client),
            Arc::new(ProgressRegistry::new()),
            settings,
        );
        JobSupervisor {
            client,
            poller,
            observers: Arc::new(observers),
            token: CancelToken::new(),
        }
    }

    /// Token that stops every poller of this supervisor
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Post every plan. A refused plan does not stop the others.
    pub async fn launch(&self, plans: Vec<LaunchPlan>) -> LaunchReport {
        let mut report = LaunchReport::default();

        for plan in plans {
            if self.token.is_cancelled() {
                break;
            }
            match self.client.run(&plan.request()).await {
                Ok(job_id) => {
                    info!(job_id = %job_id, playbook = %plan.playbook, hosts = ?plan.hosts, "job started");
                    report.handles.push(JobHandle {
                        job_id,
                        playbook: plan.playbook,
                        label: plan.label,
                        hosts: plan.hosts,
                        group: plan.group,
                    });
                }
                Err(error) => {
                    warn!(playbook = %plan.playbook, %error, "backend refused job");
                    report.failures.push(LaunchFailure { plan, error });
                }
            }
        }

        report
    }

    /// Poll every job until it finishes or the token fires
    pub async fn follow(&self, handles: Vec<JobHandle>) -> Vec<JobOutcome> {
        let groups = Arc::new(group_members(&handles));
        let order: Vec<JobId> = handles.iter().map(|h| h.job_id.clone()).collect();
        let mut tasks = JoinSet::new();

        for handle in handles {
            let mut updates = self.poller.watch(&handle.job_id, self.token.clone());
            let observers = Arc::clone(&self.observers);
            let registry = Arc::clone(self.poller.registry());
            let groups = Arc::clone(&groups);
            let token = self.token.clone();

            tasks.spawn(async move {
                notify(&token, observers.on_start(&handle)).await;

                let mut last: Option<JobUpdate> = None;
                let mut last_error = None;
                while let Some(item) = updates.next().await {
                    match item {
                        Ok(update) => {
                            notify(&token, observers.on_update(&handle, &update)).await;
                            if let Some(group) = &handle.group {
                                if let Some(members) = groups.get(group) {
                                    let progress = registry.aggregate(members.as_slice());
                                    notify(
                                        &token,
                                        observers.on_group_progress(group, progress, members.len()),
                                    )
                                    .await;
                                }
                            }
                            last = Some(update);
                            last_error = None;
                        }
                        Err(error) => {
                            notify(&token, observers.on_poll_error(&handle, &error)).await;
                            last_error = Some(error.to_string());
                        }
                    }
                }

                let outcome = JobOutcome::new(handle, last, last_error);
                notify(&token, observers.on_complete(&outcome)).await;
                outcome
            });
        }

        let mut outcomes = Vec::with_capacity(order.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("job task ended abnormally: {}", e),
            }
        }

        // Report in launch order, not completion order
        outcomes.sort_by_key(|o| {
            order
                .iter()
                .position(|id| *id == o.handle.job_id)
                .unwrap_or(usize::MAX)
        });
        outcomes
    }

    /// Launch, follow and summarise
    pub async fn run(&self, plans: Vec<LaunchPlan>) -> RunSummary {
        let report = self.launch(plans).await;
        self.summarise(report.handles, report.failures).await
    }

    /// Follow jobs that are already running and summarise
    pub async fn watch(&self, handles: Vec<JobHandle>) -> RunSummary {
        self.summarise(handles, Vec::new()).await
    }

    async fn summarise(
        &self,
        handles: Vec<JobHandle>,
        launch_failures: Vec<LaunchFailure>,
    ) -> RunSummary {
        let outcomes = self.follow(handles).await;
        let summary = RunSummary {
            outcomes,
            launch_failures,
            interrupted: self.token.is_cancelled(),
        };
        notify(&self.token, self.observers.on_run_complete(&summary)).await;
        summary
    }

    /// Ask the backend to stop every job that had not finished
    pub async fn cancel_unfinished(&self, summary: &RunSummary) -> Vec<(JobId, Result<bool, ApiError>)> {
        let mut results = Vec::new();
        for outcome in summary.unfinished() {
            let job_id = outcome.handle.job_id.clone();
            debug!(job_id = %job_id, "cancelling job");
            let result = self.client.cancel(&job_id).await;
            results.push((job_id, result));
        }
        results
    }
}

/// Longest an observer may hold a job up once following has stopped
const HOOK_GRACE: Duration = Duration::from_secs(1);

/// Run an observer hook without letting it outlive cancellation.
///
/// While the token is live the hook races it; after cancellation the hook
/// gets `HOOK_GRACE` to report completion and is then dropped.
async fn notify<F: Future<Output = ()>>(token: &CancelToken, hook: F) {
    if token.is_cancelled() {
        if tokio::time::timeout(HOOK_GRACE, hook).await.is_err() {
            warn!("observer did not finish within {:?} of cancellation", HOOK_GRACE);
        }
        return;
    }
    tokio::select! {
        _ = hook => {}
        _ = token.cancelled() => debug!("observer hook interrupted by cancellation"),
    }
}

fn group_members(handles: &[JobHandle]) -> HashMap<String, Vec<JobId>> {
    let mut groups: HashMap<String, Vec<JobId>> = HashMap::new();
    for handle in handles {
        if let Some(group) = &handle.group {
            groups
                .entry(group.clone())
                .or_default()
                .push(handle.job_id.clone());
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{snapshot, ScriptedApi};
    use crate::executor::retry::DelayStrategy;
    use crate::plugins::JobObserver;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Map;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        groups: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl JobObserver for Arc<Recorder> {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn on_start(&self, job: &JobHandle) {
            self.events.lock().push(format!("start {}", job.job_id));
        }

        async fn on_group_progress(&self, _group: &str, progress: u8, _jobs: usize) {
            self.groups.lock().push(progress);
        }

        async fn on_complete(&self, outcome: &JobOutcome) {
            self.events.lock().push(format!(
                "complete {} {:?}",
                outcome.handle.job_id,
                outcome.status()
            ));
        }
    }

    fn plan(playbook: &str, hosts: &[&str], group: Option<&str>) -> LaunchPlan {
        LaunchPlan {
            playbook: playbook.to_string(),
            label: playbook.to_string(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            extra_vars: Map::new(),
            group: group.map(String::from),
        }
    }

    fn fast() -> PollerSettings {
        PollerSettings {
            strategy: DelayStrategy::Fixed(Duration::from_millis(1)),
            max_consecutive_errors: Some(3),
        }
    }

    const DONE: &str = "PLAY [x]\nTASK [a]\nok: [h1]\nPLAY RECAP\nh1 : ok=1 changed=0 unreachable=0 failed=0 skipped=0\n";
    const FAILED: &str = "PLAY [x]\nTASK [a]\nfatal: [h2]: FAILED! => {}\nPLAY RECAP\nh2 : ok=0 changed=0 unreachable=0 failed=1 skipped=0\n";

    #[tokio::test]
    async fn test_run_follows_every_job() {
        let api = Arc::new(ScriptedApi::new());
        api.script(
            "job-1",
            vec![
                Ok(snapshot(JobStatus::Running, "PLAY [x]\n")),
                Ok(snapshot(JobStatus::Success, DONE)),
            ],
        );
        api.script("job-2", vec![Ok(snapshot(JobStatus::Failed, FAILED))]);

        let recorder = Arc::new(Recorder::default());
        let mut observers = ObserverRegistry::new();
        observers.add(Box::new(Arc::clone(&recorder)));

        let supervisor = JobSupervisor::new(api.clone(), fast(), observers);
        let summary = supervisor
            .run(vec![plan("a.yml", &["h1"], None), plan("b.yml", &["h2"], None)])
            .await;

        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(summary.outcomes[0].handle.job_id, "job-1");
        assert_eq!(summary.outcomes[0].status(), Some(JobStatus::Success));
        assert_eq!(summary.outcomes[0].progress(), 100);
        assert!(!summary.outcomes[0].is_failure());
        assert!(summary.outcomes[1].is_failure());
        assert_eq!(summary.outcomes[1].counts.failed, 1);
        assert!(summary.has_failures());
        assert_eq!((summary.succeeded(), summary.failed()), (1, 1));

        let events = recorder.events.lock();
        assert!(events.contains(&"start job-1".to_string()));
        assert!(events.contains(&"complete job-2 Some(Failed)".to_string()));
        assert_eq!(api.runs.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_refused_launch_is_reported() {
        let api = Arc::new(ScriptedApi::new());
        api.fail_runs_for.lock().push("bad.yml".to_string());
        api.script("job-1", vec![Ok(snapshot(JobStatus::Completed, DONE))]);

        let supervisor = JobSupervisor::new(api, fast(), ObserverRegistry::new());
        let summary = supervisor
            .run(vec![plan("bad.yml", &["h1"], None), plan("good.yml", &["h1"], None)])
            .await;

        assert_eq!(summary.launch_failures.len(), 1);
        assert_eq!(summary.launch_failures[0].plan.playbook, "bad.yml");
        assert_eq!(summary.outcomes.len(), 1);
        assert!(summary.has_failures());
    }

    #[tokio::test]
    async fn test_group_progress_is_reported() {
        let api = Arc::new(ScriptedApi::new());
        api.script("job-1", vec![Ok(snapshot(JobStatus::Success, DONE))]);
        api.script("job-2", vec![Ok(snapshot(JobStatus::Success, DONE))]);

        let recorder = Arc::new(Recorder::default());
        let mut observers = ObserverRegistry::new();
        observers.add(Box::new(Arc::clone(&recorder)));

        let supervisor = JobSupervisor::new(api, fast(), observers);
        supervisor
            .run(vec![
                plan("baseline.yml", &["h1"], Some("baseline")),
                plan("baseline.yml", &["h2"], Some("baseline")),
            ])
            .await;

        let groups = recorder.groups.lock();
        assert_eq!(groups.len(), 2);
        // One child done, the other unseen, then both done
        assert!(groups.contains(&100));
        assert!(groups.iter().all(|&p| p >= 50));
    }

    #[tokio::test]
    async fn test_unresponsive_webhook_does_not_block_cancellation() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let api = Arc::new(ScriptedApi::new());
        api.script("job-1", vec![Ok(snapshot(JobStatus::Running, "PLAY [x]\n"))]);

        let mut observers = ObserverRegistry::new();
        observers.add(
            crate::plugins::create_observer(&format!("webhook:http://127.0.0.1:{}/hook", port))
                .unwrap(),
        );

        let supervisor = JobSupervisor::new(api.clone(), fast(), observers);
        let token = supervisor.token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(3),
            supervisor.run(vec![plan("long.yml", &["h1"], None)]),
        )
        .await
        .expect("run returned after cancellation");
        assert!(summary.interrupted);
        assert_eq!(summary.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_observer_is_dropped_on_cancel() {
        struct Stalled;

        #[async_trait]
        impl JobObserver for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }

            async fn on_start(&self, _job: &JobHandle) {
                std::future::pending::<()>().await;
            }
        }

        let api = Arc::new(ScriptedApi::new());
        api.script("job-1", vec![Ok(snapshot(JobStatus::Running, "PLAY [x]\n"))]);

        let mut observers = ObserverRegistry::new();
        observers.add(Box::new(Stalled));
        let supervisor = JobSupervisor::new(api.clone(), fast(), observers);
        let token = supervisor.token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(3),
            supervisor.run(vec![plan("long.yml", &["h1"], None)]),
        )
        .await
        .expect("run returned after cancellation");
        assert!(summary.interrupted);
    }

    #[tokio::test]
    async fn test_cancel_unfinished_after_interrupt() {
        let api = Arc::new(ScriptedApi::new());
        api.script("job-1", vec![Ok(snapshot(JobStatus::Running, "PLAY [x]\n"))]);

        let supervisor = JobSupervisor::new(api.clone(), fast(), ObserverRegistry::new());
        let token = supervisor.token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });

        let summary = supervisor.run(vec![plan("long.yml", &["h1"], None)]).await;
        assert!(summary.interrupted);
        assert_eq!(summary.unfinished().count(), 1);
        assert!(!summary.has_failures());

        let cancelled = supervisor.cancel_unfinished(&summary).await;
        assert_eq!(cancelled.len(), 1);
        assert_eq!(api.cancelled.lock().as_slice(), ["job-1".to_string()]);
    }
}
