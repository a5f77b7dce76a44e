// playdeck - command-line client for an Ansible execution dashboard
//
// Lists hosts and playbooks, launches jobs, follows them with live progress
// and parses their Ansible output.

pub mod api;
pub mod config;
pub mod executor;
pub mod output;
pub mod parser;
pub mod plugins;
pub mod progress;

pub use api::{ApiClient, ApiError, HttpApiClient, JobSnapshot, JobStatus};
pub use config::{Config, ConfigError};
pub use executor::{JobHandle, JobSupervisor, LaunchPlan, RunSummary};
pub use output::{DashError, OutputFormat, OutputWriter, TerminalOutput};
pub use parser::{parse_output, ParsedLog};
pub use progress::{effective_progress, ProgressRegistry};

/// Version of the playdeck tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{ApiClient, HttpApiClient, JobStatus};
    pub use crate::config::Config;
    pub use crate::executor::{plan_launches, BaselineConfigs, JobSupervisor, PollerSettings};
    pub use crate::output::{DashError, OutputWriter};
    pub use crate::parser::parse_output;
    pub use crate::plugins::{JobObserver, ObserverRegistry};
}
