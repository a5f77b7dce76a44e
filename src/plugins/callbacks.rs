// Observer plugins for job lifecycle events

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tracing::debug;

use crate::executor::{JobHandle, JobOutcome, JobUpdate, PollError, RunSummary};

/// Receives job lifecycle events.
///
/// Every hook has an empty default, so an observer only implements the
/// events it cares about. Hooks for different jobs may run concurrently;
/// hooks for one job arrive in order.
#[async_trait]
pub trait JobObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn on_start(&self, _job: &JobHandle) {}
    async fn on_update(&self, _job: &JobHandle, _update: &JobUpdate) {}
    async fn on_poll_error(&self, _job: &JobHandle, _error: &PollError) {}
    /// Mean progress of the per-host jobs of a split baseline
    async fn on_group_progress(&self, _group: &str, _progress: u8, _jobs: usize) {}
    async fn on_complete(&self, _outcome: &JobOutcome) {}
    async fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// Fans events out to every registered observer, in registration order
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Box<dyn JobObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        ObserverRegistry {
            observers: Vec::new(),
        }
    }

    pub fn add(&mut self, observer: Box<dyn JobObserver>) {
        debug!(observer = observer.name(), "registered observer");
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.observers.iter().map(|o| o.name()).collect()
    }

    pub async fn on_start(&self, job: &JobHandle) {
        for observer in &self.observers {
            observer.on_start(job).await;
        }
    }

    pub async fn on_update(&self, job: &JobHandle, update: &JobUpdate) {
        for observer in &self.observers {
            observer.on_update(job, update).await;
        }
    }

    pub async fn on_poll_error(&self, job: &JobHandle, error: &PollError) {
        for observer in &self.observers {
            observer.on_poll_error(job, error).await;
        }
    }

    pub async fn on_group_progress(&self, group: &str, progress: u8, jobs: usize) {
        for observer in &self.observers {
            observer.on_group_progress(group, progress, jobs).await;
        }
    }

    pub async fn on_complete(&self, outcome: &JobOutcome) {
        for observer in &self.observers {
            observer.on_complete(outcome).await;
        }
    }

    pub async fn on_run_complete(&self, summary: &RunSummary) {
        for observer in &self.observers {
            observer.on_run_complete(summary).await;
        }
    }
}

// ========== Built-in Observers ==========

fn outcome_event(outcome: &JobOutcome) -> serde_json::Value {
    json!({
        "event": "job_complete",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "job_id": outcome.handle.job_id,
        "playbook": outcome.handle.playbook,
        "hosts": outcome.handle.hosts,
        "status": outcome.status().map(|s| s.as_str()),
        "progress": outcome.progress(),
        "failed": outcome.is_failure(),
        "results": outcome.counts,
        "error": outcome.error,
    })
}

/// Appends one JSON object per event to a file
pub struct JsonLogObserver {
    file: Arc<Mutex<File>>,
}

impl JsonLogObserver {
    pub fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(JsonLogObserver {
            file: Arc::new(Mutex::new(file)),
        })
    }

    fn write_event(&self, event: serde_json::Value) {
        let mut file = self.file.lock();
        if let Ok(json) = serde_json::to_string(&event) {
            let _ = writeln!(file, "{}", json);
            let _ = file.flush();
        }
    }
}

#[async_trait]
impl JobObserver for JsonLogObserver {
    fn name(&self) -> &str {
        "json_log"
    }

    async fn on_start(&self, job: &JobHandle) {
        self.write_event(json!({
            "event": "job_start",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "job_id": job.job_id,
            "playbook": job.playbook,
            "hosts": job.hosts,
            "group": job.group,
        }));
    }

    async fn on_update(&self, job: &JobHandle, update: &JobUpdate) {
        if update.new_output.is_empty() && !update.is_terminal() {
            return;
        }
        self.write_event(json!({
            "event": "job_output",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "job_id": job.job_id,
            "status": update.snapshot.status.as_str(),
            "progress": update.progress,
            "output": update.new_output,
        }));
    }

    async fn on_poll_error(&self, job: &JobHandle, error: &PollError) {
        self.write_event(json!({
            "event": "poll_error",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "job_id": job.job_id,
            "consecutive": error.consecutive,
            "error": error.source.to_string(),
        }));
    }

    async fn on_complete(&self, outcome: &JobOutcome) {
        self.write_event(outcome_event(outcome));
    }
}

/// Tracks how long each job took and prints a table at the end of the run
pub struct TimerObserver {
    started: Mutex<HashMap<String, Instant>>,
    finished: Mutex<Vec<(String, Duration)>>,
}

impl TimerObserver {
    pub fn new() -> Self {
        TimerObserver {
            started: Mutex::new(HashMap::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    /// Finished jobs, slowest first
    pub fn durations(&self) -> Vec<(String, Duration)> {
        let mut durations = self.finished.lock().clone();
        durations.sort_by(|a, b| b.1.cmp(&a.1));
        durations
    }
}

impl Default for TimerObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobObserver for TimerObserver {
    fn name(&self) -> &str {
        "timer"
    }

    async fn on_start(&self, job: &JobHandle) {
        self.started
            .lock()
            .insert(job.job_id.clone(), Instant::now());
    }

    async fn on_complete(&self, outcome: &JobOutcome) {
        if let Some(start) = self.started.lock().remove(&outcome.handle.job_id) {
            self.finished
                .lock()
                .push((outcome.handle.label.clone(), start.elapsed()));
        }
    }

    async fn on_run_complete(&self, _summary: &RunSummary) {
        let durations = self.durations();

        eprintln!("\n{}", "=".repeat(60));
        eprintln!("Job Timing");
        eprintln!("{}", "=".repeat(60));

        if durations.is_empty() {
            eprintln!("No timing data collected");
            return;
        }

        for (i, (label, duration)) in durations.iter().enumerate() {
            eprintln!(
                "{:>2}. {:<45} {:>9.2}s",
                i + 1,
                truncate(label, 45),
                duration.as_secs_f64()
            );
        }
        let total: Duration = durations.iter().map(|(_, d)| *d).sum();
        eprintln!("\nTotal job time: {:.2}s", total.as_secs_f64());
        eprintln!("{}", "=".repeat(60));
    }
}

/// Upper bound on a single webhook delivery
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// POSTs start, completion and run-summary events to a URL
pub struct WebhookObserver {
    url: String,
    client: reqwest::Client,
}

impl WebhookObserver {
    pub fn new(url: impl Into<String>) -> reqwest::Result<Self> {
        Self::with_timeout(url, WEBHOOK_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(WebhookObserver {
            url: url.into(),
            client,
        })
    }

    async fn post_event(&self, event: serde_json::Value) {
        if let Err(e) = self.client.post(&self.url).json(&event).send().await {
            debug!(url = %self.url, "webhook delivery failed: {}", e);
        }
    }
}

#[async_trait]
impl JobObserver for WebhookObserver {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn on_start(&self, job: &JobHandle) {
        self.post_event(json!({
            "event": "job_start",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "job_id": job.job_id,
            "playbook": job.playbook,
            "hosts": job.hosts,
        }))
        .await;
    }

    async fn on_complete(&self, outcome: &JobOutcome) {
        self.post_event(outcome_event(outcome)).await;
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        self.post_event(json!({
            "event": "run_complete",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "jobs": summary.outcomes.len(),
            "succeeded": summary.succeeded(),
            "failed": summary.failed(),
            "interrupted": summary.interrupted,
            "has_failures": summary.has_failures(),
        }))
        .await;
    }
}

/// Parse an observer specification from the CLI.
/// Format: "name:args" or just "name"
pub fn parse_observer_spec(spec: &str) -> Result<(&str, Option<&str>), String> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err("empty observer specification".to_string());
    }
    if let Some((name, args)) = spec.split_once(':') {
        Ok((name, Some(args)))
    } else {
        Ok((spec, None))
    }
}

/// Create an observer from a specification string
pub fn create_observer(spec: &str) -> Result<Box<dyn JobObserver>, String> {
    let (name, args) = parse_observer_spec(spec)?;

    match name {
        "json_log" => {
            let path = args.ok_or_else(|| {
                "json_log observer requires a file path (e.g., json_log:/tmp/playdeck.jsonl)"
                    .to_string()
            })?;

            JsonLogObserver::new(path)
                .map(|o| Box::new(o) as Box<dyn JobObserver>)
                .map_err(|e| format!("Failed to create json_log observer: {}", e))
        }

        "timer" => Ok(Box::new(TimerObserver::new())),

        "webhook" => {
            let url = args.ok_or_else(|| {
                "webhook observer requires a URL (e.g., webhook:https://example.com/events)"
                    .to_string()
            })?;

            WebhookObserver::new(url)
                .map(|o| Box::new(o) as Box<dyn JobObserver>)
                .map_err(|e| format!("Failed to create webhook observer: {}", e))
        }

        _ => Err(format!("Unknown observer: {}", name)),
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::snapshot;
    use crate::api::JobStatus;
    use crate::executor::JobHandle;

    fn handle() -> JobHandle {
        JobHandle {
            job_id: "job-1".to_string(),
            playbook: "site.yml".to_string(),
            label: "site".to_string(),
            hosts: vec!["h1".to_string()],
            group: None,
        }
    }

    fn update(status: JobStatus, output: &str, new_output: &str) -> JobUpdate {
        JobUpdate {
            job_id: "job-1".to_string(),
            snapshot: snapshot(status, output),
            progress: 40,
            sequence: 1,
            new_output: new_output.to_string(),
            output_reset: false,
        }
    }

    #[test]
    fn test_parse_observer_spec() {
        assert_eq!(parse_observer_spec("timer").unwrap(), ("timer", None));
        assert_eq!(
            parse_observer_spec("json_log:/tmp/log.jsonl").unwrap(),
            ("json_log", Some("/tmp/log.jsonl"))
        );
        assert_eq!(
            parse_observer_spec("webhook:https://example.com/events").unwrap(),
            ("webhook", Some("https://example.com/events"))
        );
        assert!(parse_observer_spec("  ").is_err());
    }

    #[test]
    fn test_create_observer_errors() {
        assert!(create_observer("json_log").is_err());
        assert!(create_observer("webhook").is_err());
        assert!(create_observer("slack:x").is_err());
        assert_eq!(create_observer("timer").unwrap().name(), "timer");
    }

    #[tokio::test]
    async fn test_json_log_writes_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut registry = ObserverRegistry::new();
        registry.add(create_observer(&format!("json_log:{}", path.display())).unwrap());
        assert_eq!(registry.names(), vec!["json_log"]);

        let job = handle();
        registry.on_start(&job).await;
        // Polls without new output are not logged
        registry
            .on_update(&job, &update(JobStatus::Running, "", ""))
            .await;
        registry
            .on_update(&job, &update(JobStatus::Running, "PLAY [x]\n", "PLAY [x]\n"))
            .await;

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "job_start");
        assert_eq!(events[1]["output"], "PLAY [x]\n");
        assert_eq!(events[1]["progress"], 40);
    }

    #[tokio::test]
    async fn test_timer_records_completed_jobs() {
        let timer = TimerObserver::new();
        let job = handle();
        timer.on_start(&job).await;

        let outcome = JobOutcome {
            handle: job,
            last: None,
            error: None,
            counts: Default::default(),
            recap_failures: false,
        };
        timer.on_complete(&outcome).await;

        let durations = timer.durations();
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].0, "site");
    }

    #[tokio::test]
    async fn test_webhook_gives_up_on_silent_endpoint() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let webhook = WebhookObserver::with_timeout(
            format!("http://127.0.0.1:{}/hook", port),
            Duration::from_millis(100),
        )
        .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(2), webhook.on_start(&handle())).await;
        assert!(delivered.is_ok());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("configuração", 8), "confi...");
    }
}
