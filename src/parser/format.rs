// Plain-text rendering of a parsed log

use std::fmt::Write;

use super::ast::{LogNode, ParsedLog, PlayNode, RecapNode, RecapRow, ResultLine, TaskNode};

/// Render a parsed log as indented plain text.
///
/// Every result line in the tree is written exactly once, so the output can
/// be re-parsed without losing results.
pub fn render_plain(log: &ParsedLog) -> String {
    let mut out = String::new();
    for node in &log.nodes {
        match node {
            LogNode::Text { lines } => {
                for line in lines {
                    let _ = writeln!(out, "{}", line);
                }
            }
            LogNode::Play(play) => render_play(&mut out, play),
            LogNode::Recap(recap) => render_recap(&mut out, recap),
        }
    }
    out
}

fn render_play(out: &mut String, play: &PlayNode) {
    if !play.implicit {
        let _ = writeln!(out, "PLAY [{}]", play.name);
    }
    for note in &play.notes {
        let _ = writeln!(out, "  {}", note);
    }
    for task in &play.tasks {
        render_task(out, task);
    }
}

fn render_task(out: &mut String, task: &TaskNode) {
    if !task.implicit {
        let _ = writeln!(out, "  TASK [{}]", task.name);
    }
    for result in &task.results {
        let _ = writeln!(out, "    {}", format_result(result));
    }
    for note in &task.notes {
        let _ = writeln!(out, "      {}", note);
    }
}

fn render_recap(out: &mut String, recap: &RecapNode) {
    let _ = writeln!(out, "PLAY RECAP");
    let width = recap.rows.iter().map(|r| r.host.len()).max().unwrap_or(0);
    for row in &recap.rows {
        let _ = writeln!(out, "  {}", format_recap_row(row, width));
    }
    for note in &recap.notes {
        let _ = writeln!(out, "  {}", note);
    }
}

/// `status: [host] => detail`
pub fn format_result(result: &ResultLine) -> String {
    match &result.detail {
        Some(detail) => format!("{}: [{}] => {}", result.status, result.host, detail),
        None => format!("{}: [{}]", result.status, result.host),
    }
}

/// Recap row padded so the host column lines up
pub fn format_recap_row(row: &RecapRow, host_width: usize) -> String {
    format!(
        "{:<width$} : ok={} changed={} unreachable={} failed={} skipped={} rescued={} ignored={}",
        row.host,
        row.ok,
        row.changed,
        row.unreachable,
        row.failed,
        row.skipped,
        row.rescued,
        row.ignored,
        width = host_width
    )
}
