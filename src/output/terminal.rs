// Rich terminal output for playdeck

use std::collections::HashMap;
use std::io::IsTerminal;
use std::time::Duration;

use async_trait::async_trait;
use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;

use crate::api::{HostMap, JobSnapshot, JobStatus, PlaybookInfo};
use crate::executor::{JobHandle, JobOutcome, JobUpdate, PollError, RunSummary};
use crate::parser::grammar::{classify, LineKind};
use crate::parser::{
    format_recap_row, format_result, LogNode, ParsedLog, RecapRow, ResultLine, ResultStatus,
    StatusCounts,
};
use crate::plugins::JobObserver;

/// Terminal output manager.
///
/// Each job gets one progress card, created on first sight and updated in
/// place afterwards. Log lines are printed above the cards.
pub struct TerminalOutput {
    multi_progress: MultiProgress,
    cards: Mutex<HashMap<String, ProgressBar>>,
    groups: Mutex<HashMap<String, ProgressBar>>,
    verbose: bool,
    quiet: bool,
    is_tty: bool,
    stream: bool,
    show_output: bool,
}

impl TerminalOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let is_tty = std::io::stdout().is_terminal();

        // Respect NO_COLOR environment variable (https://no-color.org/)
        // Also disable colors if not a TTY
        if std::env::var("NO_COLOR").is_ok() || !is_tty {
            colored::control::set_override(false);
        }

        TerminalOutput {
            multi_progress: MultiProgress::new(),
            cards: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            verbose,
            quiet,
            is_tty,
            stream: false,
            show_output: false,
        }
    }

    /// Print new log lines as they arrive, and/or the parsed log at the end
    pub fn with_log_display(mut self, stream: bool, show_output: bool) -> Self {
        self.stream = stream;
        self.show_output = show_output;
        self
    }

    fn card_style(&self) -> ProgressStyle {
        let template = if self.is_tty {
            "{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}"
        } else {
            "{prefix} {pos:>3}% {msg}"
        };
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }

    /// The card for a job, created on first use
    pub fn card(&self, job: &JobHandle) -> ProgressBar {
        let mut cards = self.cards.lock();
        cards
            .entry(job.job_id.clone())
            .or_insert_with(|| {
                let pb = self.multi_progress.add(ProgressBar::new(100));
                pb.set_style(self.card_style());
                pb.set_prefix(job.label.clone());
                pb.set_message(JobStatus::Running.to_string());
                pb.enable_steady_tick(Duration::from_millis(250));
                pb
            })
            .clone()
    }

    fn group_card(&self, group: &str, jobs: usize) -> ProgressBar {
        let mut groups = self.groups.lock();
        groups
            .entry(group.to_string())
            .or_insert_with(|| {
                let pb = self.multi_progress.add(ProgressBar::new(100));
                pb.set_style(self.card_style());
                pb.set_prefix(format!("{} [{} hosts]", group, jobs));
                pb
            })
            .clone()
    }

    /// Print above the cards without tearing them
    fn print_line(&self, line: &str) {
        self.multi_progress.suspend(|| println!("{}", line));
    }

    fn stream_output(&self, job: &JobHandle, update: &JobUpdate) {
        if update.output_reset && update.sequence > 1 {
            self.print_line(&format!("[{}] {}", job.label, "(output restarted)".dimmed()));
        }
        let prefix = format!("[{}]", job.label).dimmed();
        for line in update.new_output.lines() {
            if line.trim().is_empty() {
                continue;
            }
            self.print_line(&format!("{} {}", prefix, colorize_line(line)));
        }
    }

    pub fn print_hosts(&self, hosts: &HostMap, valid_only: bool) {
        let width = hosts.keys().map(|h| h.len()).max().unwrap_or(4).max(4);
        println!(
            "{:<width$}  {:<7}  {:<24}  {:<15}  {}",
            "HOST".bold(),
            "STATE".bold(),
            "SYSTEM".bold(),
            "PRIVATE IP".bold(),
            "PUBLIC IP".bold(),
            width = width
        );

        for (name, entry) in hosts {
            if valid_only && !entry.valid {
                continue;
            }
            let state = if entry.valid {
                format!("{:<7}", "online").green()
            } else {
                format!("{:<7}", "offline").red()
            };
            println!(
                "{:<width$}  {}  {:<24}  {:<15}  {}",
                name,
                state,
                entry.facts.system,
                entry.facts.private_ip,
                entry.facts.public_ip,
                width = width
            );
        }
    }

    pub fn print_playbooks(&self, playbooks: &[PlaybookInfo]) {
        let mut current: Option<(&str, &str)> = None;
        for playbook in playbooks {
            let section = (playbook.os.as_str(), playbook.category.as_str());
            if current != Some(section) {
                println!();
                println!(
                    "{} {}",
                    section.0.to_uppercase().cyan().bold(),
                    section.1.dimmed()
                );
                current = Some(section);
            }
            if playbook.description.is_empty() || self.quiet {
                println!("  {}", playbook.name);
            } else {
                println!("  {:<40} {}", playbook.name, playbook.description.dimmed());
            }
            if self.verbose && !playbook.path.is_empty() {
                println!("    {}", playbook.path.dimmed());
            }
        }
    }

    pub fn print_snapshot(&self, job_id: &str, snapshot: &JobSnapshot, progress: u8, show_output: bool) {
        println!(
            "{} {}  {}  {}%",
            "JOB".bold(),
            job_id.cyan(),
            colorize_status(snapshot.status),
            progress
        );
        if show_output {
            print!("{}", render_colored(&crate::parser::parse_output(&snapshot.output)));
        }
    }

    pub fn print_parsed(&self, log: &ParsedLog) {
        print!("{}", render_colored(log));
        if !self.quiet {
            print_counts(&log.status_counts());
        }
    }

    pub fn print_progress(&self, progress: u8, log: &ParsedLog) {
        println!(
            "{} {}%  ({} tasks, {} results)",
            "PROGRESS".bold(),
            progress,
            log.task_count(),
            log.result_count()
        );
    }

    pub fn print_cancelled(&self, job_id: &str, accepted: bool) {
        if accepted {
            println!("{} {}", "CANCELLED".yellow().bold(), job_id);
        } else {
            println!("{} {} (backend refused)", "NOT CANCELLED".red().bold(), job_id);
        }
    }

    pub fn print_summary(&self, summary: &RunSummary) {
        if summary.outcomes.is_empty() && summary.launch_failures.is_empty() {
            return;
        }

        println!();
        println!("{}", "RUN SUMMARY".green().bold());
        println!("{}", "─".repeat(60).dimmed());

        for failure in &summary.launch_failures {
            println!(
                "{:<30} {}  {}",
                failure.plan.label.white().bold(),
                "not started".red().bold(),
                failure.error
            );
        }

        for outcome in &summary.outcomes {
            if self.quiet && !outcome.is_failure() {
                continue;
            }
            let status = match outcome.status() {
                Some(status) => colorize_status(status),
                None => "no response".red(),
            };
            let counts = &outcome.counts;
            println!(
                "{:<30} {:<10} ok={} changed={} failed={} skipped={} unreachable={}  {}",
                outcome.handle.label.white().bold(),
                status,
                counts.ok,
                counts.changed,
                counts.failed,
                counts.skipped,
                counts.unreachable,
                outcome.handle.job_id.dimmed()
            );
            if let Some(error) = &outcome.error {
                println!("  {}", error.red());
            }
        }

        println!();
        println!(
            "{} succeeded, {} failed{}",
            summary.succeeded(),
            summary.failed(),
            if summary.interrupted { ", interrupted" } else { "" }
        );
    }

    /// Get the multi-progress bar for concurrent operations
    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }
}

#[async_trait]
impl JobObserver for TerminalOutput {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn on_start(&self, job: &JobHandle) {
        if self.quiet {
            return;
        }
        let pb = self.card(job);
        if self.verbose {
            pb.set_message(format!("running on {}", job.hosts.join(", ")));
        }
    }

    async fn on_update(&self, job: &JobHandle, update: &JobUpdate) {
        if self.stream && !self.quiet {
            self.stream_output(job, update);
        }
        if self.quiet {
            return;
        }

        let pb = self.card(job);
        pb.set_position(update.progress as u64);
        let log = crate::parser::parse_output(&update.snapshot.output);
        let message = match log.tasks().last() {
            Some(task) if !update.is_terminal() => task.name.clone(),
            _ => update.snapshot.status.to_string(),
        };
        pb.set_message(message);
    }

    async fn on_poll_error(&self, job: &JobHandle, error: &PollError) {
        if self.quiet {
            return;
        }
        self.card(job)
            .set_message(format!("retrying ({} failed polls)", error.consecutive));
    }

    async fn on_group_progress(&self, group: &str, progress: u8, jobs: usize) {
        if self.quiet {
            return;
        }
        let pb = self.group_card(group, jobs);
        pb.set_position(progress as u64);
        if progress >= 100 {
            pb.finish_with_message("done");
        }
    }

    async fn on_complete(&self, outcome: &JobOutcome) {
        if !self.quiet {
            let pb = self.card(&outcome.handle);
            let status = match outcome.status() {
                Some(status) => status.to_string(),
                None => "no response".to_string(),
            };
            if outcome.is_finished() {
                pb.set_position(100);
            }
            let message = if outcome.is_failure() {
                format!("{} ({} failed)", status, outcome.counts.failed + outcome.counts.unreachable)
            } else {
                status
            };
            pb.finish_with_message(message);
        }

        if self.show_output {
            if let Some(update) = &outcome.last {
                let log = crate::parser::parse_output(&update.snapshot.output);
                let header = format!("{} {}", "OUTPUT".bold(), outcome.handle.label.cyan());
                let body = render_colored(&log);
                self.multi_progress.suspend(|| {
                    println!();
                    println!("{}", header);
                    print!("{}", body);
                });
            }
        }
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        self.print_summary(summary);
    }
}

fn colorize_status(status: JobStatus) -> ColoredString {
    match status {
        JobStatus::Completed | JobStatus::Success => status.as_str().green(),
        JobStatus::Failed | JobStatus::NotFound => status.as_str().red().bold(),
        JobStatus::Cancelled => status.as_str().yellow(),
        JobStatus::Running | JobStatus::Unknown => status.as_str().cyan(),
    }
}

fn colorize_result_status(text: &str, status: ResultStatus) -> ColoredString {
    match status {
        ResultStatus::Ok => text.green(),
        ResultStatus::Changed => text.yellow(),
        ResultStatus::Failed => text.red().bold(),
        ResultStatus::Skipped => text.cyan(),
        ResultStatus::Unreachable => text.magenta().bold(),
    }
}

/// Colour one raw output line by what it is
pub fn colorize_line(line: &str) -> String {
    match classify(line) {
        LineKind::Play(_) => line.green().bold().to_string(),
        LineKind::Task(_) => line.yellow().bold().to_string(),
        LineKind::Result { status, .. } => colorize_result_status(line, status).to_string(),
        LineKind::Recap => line.bold().to_string(),
        LineKind::RecapRow(row) => colorize_result_status(line, row.status()).to_string(),
        LineKind::Blank | LineKind::Text(_) => line.to_string(),
    }
}

fn colored_result(result: &ResultLine) -> String {
    colorize_result_status(&format_result(result), result.status).to_string()
}

fn colored_recap_row(row: &RecapRow, width: usize) -> String {
    colorize_result_status(&format_recap_row(row, width), row.status()).to_string()
}

/// Coloured counterpart of `render_plain`, same layout
pub fn render_colored(log: &ParsedLog) -> String {
    let mut out = String::new();
    for node in &log.nodes {
        match node {
            LogNode::Text { lines } => {
                for line in lines {
                    out.push_str(&format!("{}\n", line.dimmed()));
                }
            }
            LogNode::Play(play) => {
                if !play.implicit {
                    out.push_str(&format!("{}\n", format!("PLAY [{}]", play.name).green().bold()));
                }
                for note in &play.notes {
                    out.push_str(&format!("  {}\n", note.dimmed()));
                }
                for task in &play.tasks {
                    if !task.implicit {
                        out.push_str(&format!(
                            "  {}\n",
                            format!("TASK [{}]", task.name).yellow().bold()
                        ));
                    }
                    for result in &task.results {
                        out.push_str(&format!("    {}\n", colored_result(result)));
                    }
                    for note in &task.notes {
                        out.push_str(&format!("      {}\n", note.dimmed()));
                    }
                }
            }
            LogNode::Recap(recap) => {
                out.push_str(&format!("{}\n", "PLAY RECAP".bold()));
                let width = recap.rows.iter().map(|r| r.host.len()).max().unwrap_or(0);
                for row in &recap.rows {
                    out.push_str(&format!("  {}\n", colored_recap_row(row, width)));
                }
                for note in &recap.notes {
                    out.push_str(&format!("  {}\n", note.dimmed()));
                }
            }
        }
    }
    out
}

fn print_counts(counts: &StatusCounts) {
    println!();
    println!(
        "{}  {}  {}  {}  {}",
        format!("ok={}", counts.ok).green(),
        format!("changed={}", counts.changed).yellow(),
        format!("failed={}", counts.failed).red(),
        format!("skipped={}", counts.skipped).cyan(),
        format!("unreachable={}", counts.unreachable).magenta()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_output, render_plain};
    use pretty_assertions::assert_eq;

    const RUN: &str = "\
PLAY [site] ****
TASK [install] ****
ok: [h1]
fatal: [h2]: FAILED! => {\"msg\": \"no package\"}
PLAY RECAP ****
h1 : ok=1 changed=0 unreachable=0 failed=0 skipped=0
h2 : ok=0 changed=0 unreachable=0 failed=1 skipped=0
";

    #[test]
    fn test_render_colored_matches_plain_layout() {
        let log = parse_output(RUN);
        let colored = render_colored(&log);
        let stripped = console::strip_ansi_codes(&colored).to_string();
        assert_eq!(stripped, render_plain(&log));
    }

    #[test]
    fn test_colorize_line_keeps_text() {
        for line in RUN.lines() {
            let colored = colorize_line(line);
            assert_eq!(console::strip_ansi_codes(&colored), line);
        }
    }

    #[test]
    fn test_cards_are_created_once_per_job() {
        let output = TerminalOutput::new(false, false);
        let job = JobHandle::existing("job-1");

        let first = output.card(&job);
        first.set_position(40);
        let again = output.card(&job);
        assert_eq!(again.position(), 40);
        assert_eq!(output.cards.lock().len(), 1);

        output.card(&JobHandle::existing("job-2"));
        assert_eq!(output.cards.lock().len(), 2);
    }

    #[test]
    fn test_card_prefix_is_job_label() {
        let job = JobHandle {
            job_id: "job-1".to_string(),
            playbook: "baseline.yml".to_string(),
            label: "baseline (web01)".to_string(),
            hosts: vec!["web01".to_string()],
            group: Some("baseline".to_string()),
        };
        let output = TerminalOutput::new(false, false);
        let pb = output.card(&job);
        assert_eq!(console::measure_text_width(&pb.prefix()), 16);
    }
}
