// Parser turning raw ansible-playbook output into a `ParsedLog`

use super::ast::{LogNode, ParsedLog, PlayNode, RecapNode, ResultLine, TaskNode};
use super::grammar::{classify, LineKind};

/// Parse a complete (or partial) run log.
///
/// Parsing is total: every line ends up somewhere in the tree. Lines that
/// match no known form are kept as notes on the innermost open node.
pub fn parse_output(output: &str) -> ParsedLog {
    let mut builder = LogBuilder::default();
    for line in output.lines() {
        builder.feed(line);
    }
    builder.finish()
}

#[derive(Default)]
struct LogBuilder {
    nodes: Vec<LogNode>,
    play: Option<PlayNode>,
    task_open: bool,
    recap: Option<RecapNode>,
}

impl LogBuilder {
    fn feed(&mut self, line: &str) {
        match classify(line) {
            LineKind::Blank => {}
            LineKind::Recap => {
                self.close_play();
                self.close_recap();
                self.recap = Some(RecapNode::default());
            }
            LineKind::Play(name) => {
                self.close_recap();
                self.close_play();
                self.play = Some(PlayNode::new(name));
            }
            LineKind::Task(name) => {
                self.close_recap();
                self.current_play().tasks.push(TaskNode::new(name));
                self.task_open = true;
            }
            LineKind::Result {
                status,
                host,
                detail,
            } => {
                self.close_recap();
                self.current_task().results.push(ResultLine {
                    status,
                    host: host.to_string(),
                    detail: detail.map(str::to_string),
                });
            }
            LineKind::RecapRow(row) => match self.recap.as_mut() {
                Some(recap) => recap.rows.push(row),
                None => self.note(line),
            },
            LineKind::Text(text) => self.note(text),
        }
    }

    fn current_play(&mut self) -> &mut PlayNode {
        self.play.get_or_insert_with(PlayNode::implicit)
    }

    fn current_task(&mut self) -> &mut TaskNode {
        if !self.task_open {
            self.current_play().tasks.push(TaskNode::implicit());
            self.task_open = true;
        }
        let play = self.current_play();
        if play.tasks.is_empty() {
            play.tasks.push(TaskNode::implicit());
        }
        let last = play.tasks.len() - 1;
        &mut play.tasks[last]
    }

    fn note(&mut self, line: &str) {
        let line = line.trim_end().to_string();

        if let Some(recap) = self.recap.as_mut() {
            recap.notes.push(line);
            return;
        }

        if let Some(play) = self.play.as_mut() {
            match play.tasks.last_mut() {
                Some(task) if self.task_open => task.notes.push(line),
                _ => play.notes.push(line),
            }
            return;
        }

        match self.nodes.last_mut() {
            Some(LogNode::Text { lines }) => lines.push(line),
            _ => self.nodes.push(LogNode::Text { lines: vec![line] }),
        }
    }

    fn close_play(&mut self) {
        self.task_open = false;
        if let Some(play) = self.play.take() {
            self.nodes.push(LogNode::Play(play));
        }
    }

    fn close_recap(&mut self) {
        if let Some(recap) = self.recap.take() {
            self.nodes.push(LogNode::Recap(recap));
        }
    }

    fn finish(mut self) -> ParsedLog {
        self.close_play();
        self.close_recap();
        ParsedLog { nodes: self.nodes }
    }
}
