// Structured view of an ansible-playbook run log

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a task on a single host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Changed,
    Failed,
    Skipped,
    Unreachable,
}

impl ResultStatus {
    pub const ALL: [ResultStatus; 5] = [
        ResultStatus::Ok,
        ResultStatus::Changed,
        ResultStatus::Failed,
        ResultStatus::Skipped,
        ResultStatus::Unreachable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Ok => "ok",
            ResultStatus::Changed => "changed",
            ResultStatus::Failed => "failed",
            ResultStatus::Skipped => "skipped",
            ResultStatus::Unreachable => "unreachable",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ResultStatus::Failed | ResultStatus::Unreachable)
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-host result line inside a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLine {
    pub status: ResultStatus,
    pub host: String,
    /// Text after `=>` on the same line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub name: String,
    /// Opened because a result arrived with no task header before it
    #[serde(default)]
    pub implicit: bool,
    pub results: Vec<ResultLine>,
    /// Free-text lines that followed the task header
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl TaskNode {
    pub fn new(name: impl Into<String>) -> Self {
        TaskNode {
            name: name.into(),
            implicit: false,
            results: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn implicit() -> Self {
        TaskNode {
            implicit: true,
            ..TaskNode::new("")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayNode {
    pub name: String,
    /// Opened because a task arrived with no play header before it
    #[serde(default)]
    pub implicit: bool,
    pub tasks: Vec<TaskNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl PlayNode {
    pub fn new(name: impl Into<String>) -> Self {
        PlayNode {
            name: name.into(),
            implicit: false,
            tasks: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn implicit() -> Self {
        PlayNode {
            implicit: true,
            ..PlayNode::new("")
        }
    }
}

/// One row of the PLAY RECAP table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecapRow {
    pub host: String,
    pub ok: u64,
    pub changed: u64,
    pub unreachable: u64,
    pub failed: u64,
    pub skipped: u64,
    #[serde(default)]
    pub rescued: u64,
    #[serde(default)]
    pub ignored: u64,
}

impl RecapRow {
    /// Overall outcome for the host: failed beats changed beats ok
    pub fn status(&self) -> ResultStatus {
        if self.failed > 0 || self.unreachable > 0 {
            ResultStatus::Failed
        } else if self.changed > 0 {
            ResultStatus::Changed
        } else {
            ResultStatus::Ok
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecapNode {
    pub rows: Vec<RecapRow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl RecapNode {
    pub fn row(&self, host: &str) -> Option<&RecapRow> {
        self.rows.iter().find(|r| r.host == host)
    }

    pub fn has_failures(&self) -> bool {
        self.rows.iter().any(|r| r.status() == ResultStatus::Failed)
    }

    /// Worst row status, `None` when the table is empty
    pub fn overall_status(&self) -> Option<ResultStatus> {
        let mut overall = None;
        for row in &self.rows {
            overall = match (overall, row.status()) {
                (_, ResultStatus::Failed) => return Some(ResultStatus::Failed),
                (Some(ResultStatus::Changed), _) => Some(ResultStatus::Changed),
                (_, status) => Some(status),
            };
        }
        overall
    }
}

/// Top-level node of a parsed log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogNode {
    /// Lines seen before any play, task or recap opened
    Text { lines: Vec<String> },
    Play(PlayNode),
    Recap(RecapNode),
}

/// Count of result lines per status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusCounts {
    pub ok: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unreachable: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: ResultStatus) {
        match status {
            ResultStatus::Ok => self.ok += 1,
            ResultStatus::Changed => self.changed += 1,
            ResultStatus::Failed => self.failed += 1,
            ResultStatus::Skipped => self.skipped += 1,
            ResultStatus::Unreachable => self.unreachable += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.ok + self.changed + self.failed + self.skipped + self.unreachable
    }
}

/// A whole run log, in output order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedLog {
    pub nodes: Vec<LogNode>,
}

impl ParsedLog {
    pub fn plays(&self) -> impl Iterator<Item = &PlayNode> {
        self.nodes.iter().filter_map(|n| match n {
            LogNode::Play(play) => Some(play),
            _ => None,
        })
    }

    pub fn recaps(&self) -> impl Iterator<Item = &RecapNode> {
        self.nodes.iter().filter_map(|n| match n {
            LogNode::Recap(recap) => Some(recap),
            _ => None,
        })
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskNode> {
        self.plays().flat_map(|p| p.tasks.iter())
    }

    pub fn results(&self) -> impl Iterator<Item = &ResultLine> {
        self.tasks().flat_map(|t| t.results.iter())
    }

    pub fn task_count(&self) -> usize {
        self.tasks().count()
    }

    pub fn result_count(&self) -> usize {
        self.results().count()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for result in self.results() {
            counts.record(result.status);
        }
        counts
    }

    /// The last recap in the log, which summarises the final play
    pub fn final_recap(&self) -> Option<&RecapNode> {
        self.recaps().last()
    }

    pub fn has_failures(&self) -> bool {
        self.recaps().any(RecapNode::has_failures) || self.results().any(|r| r.status.is_failure())
    }
}
