// Executor module - job launching and supervision

pub mod baseline;
pub mod launch;
pub mod poller;
pub mod retry;
pub mod supervisor;

pub use baseline::{
    is_baseline_playbook, BaselineConfigs, BaselineError, BaselineHostConfig, Secret,
    MIN_PASSWORD_LEN,
};
pub use launch::{display_name, parse_extra_vars, plan_launches, LaunchPlan};
pub use poller::{CancelToken, JobPoller, JobUpdate, PollError, PollerSettings};
pub use retry::{calculate_delay, BackoffKind, DelayStrategy};
pub use supervisor::{
    JobHandle, JobOutcome, JobSupervisor, LaunchFailure, LaunchReport, RunSummary,
};
