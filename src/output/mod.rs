// Output module for playdeck

use indicatif::MultiProgress;
use once_cell::sync::Lazy;

pub mod errors;
pub mod events;
pub mod json_output;
pub mod terminal;
pub mod tui;

pub use errors::*;
pub use events::*;
pub use json_output::*;
pub use terminal::*;
pub use tui::*;

use crate::api::{HostMap, JobSnapshot, PlaybookInfo};
use crate::executor::RunSummary;
use crate::parser::ParsedLog;
use crate::plugins::JobObserver;

/// Output format for playdeck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text output with colors
    #[default]
    Text,
    /// Machine-readable JSON output (NDJSON format)
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{}' (expected text or json)", other)),
        }
    }
}

/// Unified output writer supporting both text and JSON formats
pub enum OutputWriter {
    Text(TerminalOutput),
    Json(JsonOutput),
    /// Silent mode for TUI - suppresses all output
    Silent,
}

impl OutputWriter {
    pub fn new(format: OutputFormat, verbose: bool, quiet: bool) -> Self {
        match format {
            OutputFormat::Text => OutputWriter::Text(TerminalOutput::new(verbose, quiet)),
            OutputFormat::Json => OutputWriter::Json(JsonOutput::new(verbose, quiet)),
        }
    }

    /// Create a silent output writer (for TUI mode)
    pub fn silent() -> Self {
        OutputWriter::Silent
    }

    /// Text mode only; JSON always carries the new output in its updates
    pub fn with_log_display(self, stream: bool, show_output: bool) -> Self {
        match self {
            OutputWriter::Text(output) => {
                OutputWriter::Text(output.with_log_display(stream, show_output))
            }
            other => other,
        }
    }

    pub fn print_hosts(&self, hosts: &HostMap, valid_only: bool) {
        match self {
            OutputWriter::Text(output) => output.print_hosts(hosts, valid_only),
            OutputWriter::Json(output) => output.print_hosts(hosts, valid_only),
            OutputWriter::Silent => {}
        }
    }

    pub fn print_playbooks(&self, playbooks: &[PlaybookInfo]) {
        match self {
            OutputWriter::Text(output) => output.print_playbooks(playbooks),
            OutputWriter::Json(output) => output.print_playbooks(playbooks),
            OutputWriter::Silent => {}
        }
    }

    pub fn print_snapshot(&self, job_id: &str, snapshot: &JobSnapshot, progress: u8, show_output: bool) {
        match self {
            OutputWriter::Text(output) => output.print_snapshot(job_id, snapshot, progress, show_output),
            OutputWriter::Json(output) => output.print_snapshot(job_id, snapshot, progress, show_output),
            OutputWriter::Silent => {}
        }
    }

    pub fn print_parsed(&self, log: &ParsedLog) {
        match self {
            OutputWriter::Text(output) => output.print_parsed(log),
            OutputWriter::Json(output) => output.print_parsed(log),
            OutputWriter::Silent => {}
        }
    }

    pub fn print_progress(&self, progress: u8, log: &ParsedLog) {
        match self {
            OutputWriter::Text(output) => output.print_progress(progress, log),
            OutputWriter::Json(output) => output.print_progress(progress, log),
            OutputWriter::Silent => {}
        }
    }

    pub fn print_cancelled(&self, job_id: &str, accepted: bool) {
        match self {
            OutputWriter::Text(output) => output.print_cancelled(job_id, accepted),
            OutputWriter::Json(output) => output.print_cancelled(job_id, accepted),
            OutputWriter::Silent => {}
        }
    }

    pub fn print_summary(&self, summary: &RunSummary) {
        match self {
            OutputWriter::Text(output) => output.print_summary(summary),
            OutputWriter::Json(output) => output.print_summary(summary),
            OutputWriter::Silent => {}
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        match self {
            OutputWriter::Text(output) => output.multi_progress(),
            OutputWriter::Json(_) | OutputWriter::Silent => &NO_OP_MULTI_PROGRESS,
        }
    }

    /// Hand the writer over to the job supervisor as an observer
    pub fn into_observer(self) -> Option<Box<dyn JobObserver>> {
        match self {
            OutputWriter::Text(output) => Some(Box::new(output)),
            OutputWriter::Json(output) => Some(Box::new(output)),
            OutputWriter::Silent => None,
        }
    }
}

// Static no-op multi-progress for JSON and TUI modes
static NO_OP_MULTI_PROGRESS: Lazy<MultiProgress> = Lazy::new(MultiProgress::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("TEXT".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_silent_writer_has_no_observer() {
        assert!(OutputWriter::silent().into_observer().is_none());
        let json = OutputWriter::new(OutputFormat::Json, false, true);
        assert_eq!(json.into_observer().map(|o| o.name().to_string()).as_deref(), Some("ndjson"));
    }
}
