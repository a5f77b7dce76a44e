// Terminal UI for following jobs live

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{self, stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tokio::sync::mpsc;

use super::events::DashboardEvent;
use crate::api::JobStatus;
use crate::output::DashError;
use crate::parser::grammar::{classify, LineKind};
use crate::parser::{RecapNode, ResultStatus};

/// State of a single job
#[derive(Debug, Clone)]
pub struct JobState {
    pub job_id: String,
    pub label: String,
    pub hosts: Vec<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub current_task: Option<String>,
    pub failed: bool,
    pub done: bool,
    pub last_error: Option<String>,
    pub recap: Option<RecapNode>,
    pub lines: VecDeque<String>,
}

impl JobState {
    pub fn new(job_id: String, label: String, hosts: Vec<String>) -> Self {
        JobState {
            job_id,
            label,
            hosts,
            status: JobStatus::Running,
            progress: 0,
            current_task: None,
            failed: false,
            done: false,
            last_error: None,
            recap: None,
            lines: VecDeque::new(),
        }
    }

    pub fn status_symbol(&self) -> &str {
        if !self.done {
            "⟳"
        } else if self.failed {
            "✗"
        } else {
            "✓"
        }
    }

    pub fn status_color(&self) -> Color {
        if !self.done {
            Color::Yellow
        } else if self.failed {
            Color::Red
        } else {
            Color::Green
        }
    }
}

/// State of the TUI application
pub struct TuiState {
    pub start_time: Instant,
    pub final_elapsed: Option<Duration>,
    pub jobs: HashMap<String, JobState>,
    pub job_order: Vec<String>,
    pub groups: BTreeMap<String, (u8, usize)>,
    pub selected: usize,
    pub log_scroll: usize,
    pub max_lines: usize,
    pub summary: Option<(usize, usize, bool)>,
}

impl Default for TuiState {
    fn default() -> Self {
        Self::new()
    }
}

impl TuiState {
    pub fn new() -> Self {
        TuiState {
            start_time: Instant::now(),
            final_elapsed: None,
            jobs: HashMap::new(),
            job_order: Vec::new(),
            groups: BTreeMap::new(),
            selected: 0,
            log_scroll: 0,
            max_lines: 2000,
            summary: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.summary.is_some()
    }

    pub fn handle_event(&mut self, event: DashboardEvent) {
        match event {
            DashboardEvent::JobStart {
                job_id,
                label,
                hosts,
                ..
            } => {
                if !self.jobs.contains_key(&job_id) {
                    self.job_order.push(job_id.clone());
                }
                self.jobs
                    .entry(job_id.clone())
                    .or_insert_with(|| JobState::new(job_id, label, hosts));
            }
            DashboardEvent::JobUpdate {
                job_id,
                status,
                progress,
                new_output,
                output_reset,
            } => {
                let max_lines = self.max_lines;
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.status = status;
                    job.progress = job.progress.max(progress);
                    job.last_error = None;
                    if output_reset {
                        job.lines.clear();
                    }
                    for line in new_output.lines() {
                        if let LineKind::Task(name) = classify(line) {
                            job.current_task = Some(name.to_string());
                        }
                        job.lines.push_back(line.to_string());
                    }
                    while job.lines.len() > max_lines {
                        job.lines.pop_front();
                    }
                }
            }
            DashboardEvent::PollError { job_id, message } => {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.last_error = Some(message);
                }
            }
            DashboardEvent::GroupProgress {
                group,
                progress,
                jobs,
            } => {
                self.groups.insert(group, (progress, jobs));
            }
            DashboardEvent::JobComplete {
                job_id,
                status,
                failed,
                recap,
            } => {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    if let Some(status) = status {
                        job.status = status;
                    }
                    // Finished or given up on, either way no longer followed
                    job.done = true;
                    job.failed = failed;
                    job.recap = recap;
                    job.current_task = None;
                }
            }
            DashboardEvent::RunComplete {
                succeeded,
                failed,
                interrupted,
            } => {
                self.summary = Some((succeeded, failed, interrupted));
                self.final_elapsed = Some(self.start_time.elapsed());
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.final_elapsed
            .unwrap_or_else(|| self.start_time.elapsed())
    }

    pub fn selected_job(&self) -> Option<&JobState> {
        self.job_order
            .get(self.selected)
            .and_then(|id| self.jobs.get(id))
    }

    pub fn select_next(&mut self) {
        if !self.job_order.is_empty() {
            self.selected = (self.selected + 1) % self.job_order.len();
            self.log_scroll = 0;
        }
    }

    pub fn select_previous(&mut self) {
        if !self.job_order.is_empty() {
            self.selected = (self.selected + self.job_order.len() - 1) % self.job_order.len();
            self.log_scroll = 0;
        }
    }

    /// Scroll back through the selected job's log
    pub fn scroll_up(&mut self) {
        let max_scroll = self.selected_job().map_or(0, |j| j.lines.len());
        if self.log_scroll < max_scroll {
            self.log_scroll += 1;
        }
    }

    pub fn scroll_down(&mut self) {
        self.log_scroll = self.log_scroll.saturating_sub(1);
    }

    /// Render the UI
    pub fn render(&self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(8),    // Main content
                Constraint::Length(1), // Footer
            ])
            .split(f.area());

        self.render_header(f, chunks[0]);
        self.render_main(f, chunks[1]);
        self.render_footer(f, chunks[2]);
    }

    fn render_header(&self, f: &mut Frame, area: Rect) {
        let elapsed = self.elapsed();
        let time_str = format!(
            "[{:02}:{:02}:{:02}]",
            elapsed.as_secs() / 3600,
            (elapsed.as_secs() % 3600) / 60,
            elapsed.as_secs() % 60
        );

        let title = match self.summary {
            Some((succeeded, failed, _)) => format!(
                "playdeck - {} jobs - COMPLETE ({} ok, {} failed)",
                self.job_order.len(),
                succeeded,
                failed
            ),
            None => format!("playdeck - {} jobs", self.job_order.len()),
        };

        // Inner width excludes the two border columns
        let inner_width = area.width.saturating_sub(2) as usize;
        let padding = inner_width
            .saturating_sub(title.chars().count() + time_str.len())
            .max(1);

        let header = Paragraph::new(Line::from(vec![
            Span::styled(
                title,
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(" ".repeat(padding)),
            Span::styled(time_str, Style::default().fg(Color::Yellow)),
        ]))
        .block(Block::default().borders(Borders::ALL));

        f.render_widget(header, area);
    }

    fn render_main(&self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(35), // Jobs panel
                Constraint::Percentage(65), // Selected job
            ])
            .split(area);

        self.render_jobs(f, chunks[0]);
        self.render_selected(f, chunks[1]);
    }

    fn render_jobs(&self, f: &mut Frame, area: Rect) {
        let mut items: Vec<ListItem> = self
            .job_order
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                self.jobs.get(id).map(|job| {
                    let color = job.status_color();
                    let label_style = if i == self.selected {
                        Style::default()
                            .fg(Color::White)
                            .add_modifier(Modifier::BOLD | Modifier::REVERSED)
                    } else {
                        Style::default().fg(Color::White)
                    };

                    ListItem::new(Line::from(vec![
                        Span::styled(
                            job.status_symbol(),
                            Style::default().fg(color).add_modifier(Modifier::BOLD),
                        ),
                        Span::raw(" "),
                        Span::styled(job.label.as_str(), label_style),
                        Span::raw("  "),
                        Span::styled(format!("{:>3}%", job.progress), Style::default().fg(color)),
                    ]))
                })
            })
            .collect();

        for (group, (progress, jobs)) in &self.groups {
            items.push(ListItem::new(Line::from(vec![
                Span::styled("Σ ", Style::default().fg(Color::Cyan)),
                Span::styled(
                    format!("{} [{} hosts]", group, jobs),
                    Style::default().fg(Color::Cyan),
                ),
                Span::raw("  "),
                Span::styled(format!("{:>3}%", progress), Style::default().fg(Color::Cyan)),
            ])));
        }

        let list = List::new(items).block(Block::default().title("Jobs").borders(Borders::ALL));
        f.render_widget(list, area);
    }

    fn render_selected(&self, f: &mut Frame, area: Rect) {
        let Some(job) = self.selected_job() else {
            let waiting = Paragraph::new("Waiting for jobs...")
                .style(Style::default().fg(Color::Gray))
                .block(Block::default().borders(Borders::ALL));
            f.render_widget(waiting, area);
            return;
        };

        let recap_height = job
            .recap
            .as_ref()
            .map_or(0, |r| (r.rows.len() as u16).saturating_add(2));

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(5),            // Progress panel
                Constraint::Length(recap_height), // Recap panel
                Constraint::Min(5),               // Logs panel
            ])
            .split(area);

        self.render_progress(f, chunks[0], job);
        if let Some(recap) = &job.recap {
            render_recap(f, chunks[1], recap);
        }
        self.render_logs(f, chunks[2], job);
    }

    fn render_progress(&self, f: &mut Frame, area: Rect, job: &JobState) {
        let block = Block::default()
            .title(format!("{} ({})", job.label, job.job_id))
            .borders(Borders::ALL);
        let inner = block.inner(area);
        f.render_widget(block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Length(1)])
            .split(inner);

        let task = match (&job.last_error, &job.current_task) {
            (Some(error), _) => Paragraph::new(format!("Retrying: {}", error))
                .style(Style::default().fg(Color::Red)),
            (None, Some(task)) => Paragraph::new(format!("Current Task: {}", task))
                .style(Style::default().fg(Color::Cyan)),
            (None, None) => Paragraph::new(format!("Status: {}", job.status))
                .style(Style::default().fg(Color::Gray)),
        };
        f.render_widget(task, chunks[0]);

        let hosts = Paragraph::new(format!("Hosts: {}", job.hosts.join(", ")))
            .style(Style::default().fg(Color::Gray));
        f.render_widget(hosts, chunks[1]);

        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(job.status_color()))
            .percent(job.progress.min(100) as u16)
            .label(format!("{}%", job.progress));
        f.render_widget(gauge, chunks[2]);
    }

    fn render_logs(&self, f: &mut Frame, area: Rect, job: &JobState) {
        let block = Block::default()
            .title("Log Output (PgUp/PgDn to scroll)")
            .borders(Borders::ALL);
        let visible_height = block.inner(area).height as usize;

        // Follow the tail unless scrolled back
        let end = job.lines.len().saturating_sub(self.log_scroll);
        let start = end.saturating_sub(visible_height);

        let lines: Vec<ListItem> = job
            .lines
            .iter()
            .skip(start)
            .take(end - start)
            .map(|line| ListItem::new(Span::styled(line.as_str(), line_style(line))))
            .collect();

        f.render_widget(List::new(lines).block(block), area);
    }

    fn render_footer(&self, f: &mut Frame, area: Rect) {
        let footer = if self.is_complete() {
            Paragraph::new("Press 'q' or ESC to exit | ↑/↓ select job")
                .style(Style::default().fg(Color::Green))
                .alignment(Alignment::Center)
        } else {
            Paragraph::new(
                "Press 'q' to quit (jobs keep running on the server) | ↑/↓ select job | PgUp/PgDn scroll",
            )
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center)
        };

        f.render_widget(footer, area);
    }
}

fn result_color(status: ResultStatus) -> Color {
    match status {
        ResultStatus::Ok => Color::Green,
        ResultStatus::Changed => Color::Yellow,
        ResultStatus::Failed => Color::Red,
        ResultStatus::Skipped => Color::Cyan,
        ResultStatus::Unreachable => Color::Magenta,
    }
}

fn line_style(line: &str) -> Style {
    match classify(line) {
        LineKind::Play(_) => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        LineKind::Task(_) => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        LineKind::Result { status, .. } => Style::default().fg(result_color(status)),
        LineKind::Recap => Style::default().add_modifier(Modifier::BOLD),
        LineKind::RecapRow(row) => Style::default().fg(result_color(row.status())),
        LineKind::Blank | LineKind::Text(_) => Style::default().fg(Color::Gray),
    }
}

fn render_recap(f: &mut Frame, area: Rect, recap: &RecapNode) {
    let width = recap.rows.iter().map(|r| r.host.len()).max().unwrap_or(0);
    let items: Vec<ListItem> = recap
        .rows
        .iter()
        .map(|row| {
            let failed_style = if row.failed > 0 || row.unreachable > 0 {
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            let changed_style = if row.changed > 0 {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::White)
            };

            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<width$}", row.host, width = width),
                    Style::default()
                        .fg(Color::White)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(" : "),
                Span::styled(format!("ok={:<3}", row.ok), Style::default().fg(Color::Green)),
                Span::raw("  "),
                Span::styled(format!("changed={:<3}", row.changed), changed_style),
                Span::raw("  "),
                Span::styled(format!("unreachable={:<3}", row.unreachable), failed_style),
                Span::raw("  "),
                Span::styled(format!("failed={:<3}", row.failed), failed_style),
                Span::raw("  "),
                Span::styled(
                    format!("skipped={}", row.skipped),
                    Style::default().fg(Color::Cyan),
                ),
            ]))
        })
        .collect();

    let list = List::new(items).block(Block::default().title("PLAY RECAP").borders(Borders::ALL));
    f.render_widget(list, area);
}

/// TUI Application
pub struct TuiApp {
    state: TuiState,
    rx: mpsc::UnboundedReceiver<DashboardEvent>,
    interrupted: Arc<AtomicBool>,
}

impl TuiApp {
    pub fn new(rx: mpsc::UnboundedReceiver<DashboardEvent>) -> Self {
        TuiApp {
            state: TuiState::new(),
            rx,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raw mode swallows SIGINT; Ctrl-C in the dashboard sets this flag
    pub fn with_interrupt_flag(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = interrupted;
        self
    }

    /// Apply a key press. Returns true when the dashboard should close.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.interrupted.store(true, Ordering::SeqCst);
                return true;
            }
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Up | KeyCode::Char('k') => self.state.select_previous(),
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => self.state.select_next(),
            KeyCode::PageUp => self.state.scroll_up(),
            KeyCode::PageDown => self.state.scroll_down(),
            _ => {}
        }
        false
    }

    /// Run the TUI until the user quits
    pub async fn run(&mut self) -> Result<(), DashError> {
        enable_raw_mode().map_err(|e| terminal_error("Failed to enable raw mode", e))?;

        let mut stdout = stdout();
        execute!(stdout, EnterAlternateScreen)
            .map_err(|e| terminal_error("Failed to enter alternate screen", e))?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal =
            Terminal::new(backend).map_err(|e| terminal_error("Failed to create terminal", e))?;

        let result = self.run_loop(&mut terminal).await;

        // Restore terminal
        disable_raw_mode().ok();
        execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
        terminal.show_cursor().ok();

        result
    }

    async fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> Result<(), DashError> {
        loop {
            terminal
                .draw(|f| self.state.render(f))
                .map_err(|e| terminal_error("Failed to draw terminal", e))?;

            while let Ok(event) = self.rx.try_recv() {
                self.state.handle_event(event);
            }

            // crossterm polling blocks, so keep it off the runtime's workers
            let key = tokio::task::block_in_place(|| -> io::Result<Option<KeyEvent>> {
                if event::poll(Duration::from_millis(100))? {
                    if let Event::Key(key) = event::read()? {
                        return Ok(Some(key));
                    }
                }
                Ok(None)
            })
            .map_err(|e| terminal_error("Failed to read terminal input", e))?;

            if let Some(key) = key {
                if self.handle_key(key) {
                    break;
                }
            }
        }

        Ok(())
    }
}

fn terminal_error(context: &str, e: io::Error) -> DashError {
    DashError::Terminal {
        message: format!("{}: {}", context, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    fn start(state: &mut TuiState, id: &str) {
        state.handle_event(DashboardEvent::JobStart {
            job_id: id.to_string(),
            label: format!("label-{}", id),
            hosts: vec!["h1".to_string()],
            group: None,
        });
    }

    fn update(state: &mut TuiState, id: &str, progress: u8, output: &str, reset: bool) {
        state.handle_event(DashboardEvent::JobUpdate {
            job_id: id.to_string(),
            status: JobStatus::Running,
            progress,
            new_output: output.to_string(),
            output_reset: reset,
        });
    }

    #[test]
    fn test_updates_accumulate_log_and_task() {
        let mut state = TuiState::new();
        start(&mut state, "job-1");
        start(&mut state, "job-1");
        assert_eq!(state.job_order.len(), 1);

        update(&mut state, "job-1", 20, "PLAY [x]\nTASK [install]\n", false);
        update(&mut state, "job-1", 10, "ok: [h1]\n", false);

        let job = state.selected_job().unwrap();
        assert_eq!(job.progress, 20);
        assert_eq!(job.lines.len(), 3);
        assert_eq!(job.current_task.as_deref(), Some("install"));

        update(&mut state, "job-1", 30, "PLAY [y]\n", true);
        assert_eq!(state.selected_job().unwrap().lines.len(), 1);
    }

    #[test]
    fn test_completion_and_selection() {
        let mut state = TuiState::new();
        start(&mut state, "job-1");
        start(&mut state, "job-2");

        state.handle_event(DashboardEvent::JobComplete {
            job_id: "job-2".to_string(),
            status: Some(JobStatus::Failed),
            failed: true,
            recap: None,
        });
        state.select_next();
        let job = state.selected_job().unwrap();
        assert_eq!(job.job_id, "job-2");
        assert!(job.done && job.failed);
        assert_eq!(job.status_symbol(), "✗");

        state.select_next();
        assert_eq!(state.selected_job().unwrap().job_id, "job-1");
        state.select_previous();
        assert_eq!(state.selected_job().unwrap().job_id, "job-2");

        assert!(!state.is_complete());
        state.handle_event(DashboardEvent::RunComplete {
            succeeded: 0,
            failed: 1,
            interrupted: false,
        });
        assert!(state.is_complete());
    }

    #[test]
    fn test_ctrl_c_sets_interrupt_flag() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let flag = Arc::new(AtomicBool::new(false));
        let mut app = TuiApp::new(rx).with_interrupt_flag(Arc::clone(&flag));

        assert!(!app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE)));
        assert!(!flag.load(Ordering::SeqCst));

        assert!(app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_quit_keys_leave_flag_clear() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let flag = Arc::new(AtomicBool::new(false));
        let mut app = TuiApp::new(rx).with_interrupt_flag(Arc::clone(&flag));

        assert!(app.handle_key(KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(app.handle_key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_render_does_not_panic() {
        let mut state = TuiState::new();
        let backend = TestBackend::new(100, 30);
        let mut terminal = Terminal::new(backend).unwrap();

        // Empty dashboard
        terminal.draw(|f| state.render(f)).unwrap();

        start(&mut state, "job-1");
        update(&mut state, "job-1", 50, "PLAY [x]\nTASK [a]\nok: [h1]\n", false);
        state.handle_event(DashboardEvent::GroupProgress {
            group: "baseline".to_string(),
            progress: 50,
            jobs: 2,
        });
        state.handle_event(DashboardEvent::JobComplete {
            job_id: "job-1".to_string(),
            status: Some(JobStatus::Success),
            failed: false,
            recap: Some(crate::parser::parse_output(
                "PLAY RECAP\nh1 : ok=1 changed=0 unreachable=0 failed=0 skipped=0\n",
            )
            .final_recap()
            .cloned()
            .unwrap()),
        });
        terminal.draw(|f| state.render(f)).unwrap();

        // Tiny terminals must not panic either
        let mut tiny = Terminal::new(TestBackend::new(10, 4)).unwrap();
        tiny.draw(|f| state.render(f)).unwrap();
    }
}
