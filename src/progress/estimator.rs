// Completion estimate derived from free-text job output

use crate::parser::grammar::{classify, mentions_gathering_facts, LineKind};

/// Lowest value ever reported for a job that has been launched
pub const PROGRESS_FLOOR: u8 = 5;
/// Floor once fact gathering has been seen
pub const FACTS_FLOOR: u8 = 10;
/// Highest value reported while a job is still running
pub const RUNNING_CEILING: u8 = 95;
pub const COMPLETE: u8 = 100;

const TASK_SPAN: f64 = 85.0;
const PLAY_BASE: u8 = 15;
const PLAY_STEP: usize = 15;
const PLAY_SPAN: usize = 50;

/// Structural markers counted in a log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCounts {
    pub plays: usize,
    pub tasks: usize,
    pub results: usize,
    pub recap: bool,
    pub gathering_facts: bool,
}

impl LogCounts {
    pub fn scan(output: &str) -> Self {
        let mut counts = LogCounts {
            gathering_facts: mentions_gathering_facts(output),
            ..Default::default()
        };

        for line in output.lines() {
            match classify(line) {
                LineKind::Play(_) => counts.plays += 1,
                LineKind::Task(_) => counts.tasks += 1,
                LineKind::Result { .. } => counts.results += 1,
                LineKind::Recap => counts.recap = true,
                _ => {}
            }
        }

        counts
    }
}

/// Estimate completion of a run from its output alone.
///
/// Returns 100 once a `PLAY RECAP` is present, otherwise a value in
/// `[PROGRESS_FLOOR, RUNNING_CEILING]`.
pub fn estimate_progress(output: Option<&str>) -> u8 {
    let output = match output {
        Some(o) if !o.trim().is_empty() => o,
        _ => return PROGRESS_FLOOR,
    };

    let counts = LogCounts::scan(output);
    if counts.recap {
        return COMPLETE;
    }

    running_estimate(&counts)
}

fn running_estimate(counts: &LogCounts) -> u8 {
    let mut progress = if counts.tasks > 0 {
        let ratio = counts.results as f64 / counts.tasks as f64;
        PROGRESS_FLOOR + (ratio * TASK_SPAN).min(TASK_SPAN).floor() as u8
    } else if counts.plays > 0 {
        PLAY_BASE + counts.plays.saturating_mul(PLAY_STEP).min(PLAY_SPAN) as u8
    } else {
        PROGRESS_FLOOR
    };

    if counts.gathering_facts {
        progress = progress.max(FACTS_FLOOR);
    }

    progress.clamp(PROGRESS_FLOOR, RUNNING_CEILING)
}

/// Estimate for a polled job, combining the backend's own progress figure
/// (when it sends one) with the output-based estimate.
pub fn effective_progress(output: Option<&str>, native: Option<f64>, terminal: bool) -> u8 {
    if terminal {
        return COMPLETE;
    }

    let estimated = estimate_progress(output);
    if estimated == COMPLETE {
        return COMPLETE;
    }

    let native = native
        .filter(|p| p.is_finite())
        .map(|p| p.clamp(0.0, RUNNING_CEILING as f64) as u8)
        .unwrap_or(0);

    estimated.max(native).clamp(PROGRESS_FLOOR, RUNNING_CEILING)
}

/// Single figure for a group of jobs: the mean of their progress
pub fn aggregate_progress(values: &[u8]) -> u8 {
    if values.is_empty() {
        return PROGRESS_FLOOR;
    }
    let total: u32 = values.iter().map(|&v| v.min(COMPLETE) as u32).sum();
    (total / values.len() as u32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_output_is_floor() {
        assert_eq!(estimate_progress(None), 5);
        assert_eq!(estimate_progress(Some("")), 5);
        assert_eq!(estimate_progress(Some("\n  \n")), 5);
    }

    #[test]
    fn test_recap_is_complete() {
        assert_eq!(estimate_progress(Some("PLAY RECAP ****")), 100);
        assert_eq!(
            estimate_progress(Some("PLAY [a]\nTASK [b]\nPLAY RECAP\nh : ok=1 changed=0 unreachable=0 failed=0\n")),
            100
        );
        // The first recap of a multi-play run already finalises
        assert_eq!(
            estimate_progress(Some("PLAY [a]\nPLAY RECAP\nPLAY [b]\nTASK [c]\n")),
            100
        );
    }

    #[test]
    fn test_task_ratio() {
        assert_eq!(
            estimate_progress(Some("TASK [a]\nok: [h1]\nTASK [b]\nfailed: [h1]\n")),
            90
        );
        // 1 of 4 tasks reported: 5 + 21.25
        assert_eq!(
            estimate_progress(Some("TASK [a]\nok: [h1]\nTASK [b]\nTASK [c]\nTASK [d]\n")),
            26
        );
        // Many hosts per task cap at the task span
        assert_eq!(
            estimate_progress(Some("TASK [a]\nok: [h1]\nok: [h2]\nok: [h3]\n")),
            90
        );
    }

    #[test]
    fn test_play_only_output() {
        assert_eq!(estimate_progress(Some("PLAY [a]\n")), 30);
        assert_eq!(estimate_progress(Some("PLAY [a]\nPLAY [b]\n")), 45);
        assert_eq!(
            estimate_progress(Some("PLAY [a]\nPLAY [b]\nPLAY [c]\nPLAY [d]\nPLAY [e]\n")),
            65
        );
    }

    #[test]
    fn test_gathering_facts_floor() {
        assert_eq!(estimate_progress(Some("GATHERING FACTS\n")), 10);
        // Only a task header, no results yet
        assert_eq!(estimate_progress(Some("TASK [Gathering Facts]\n")), 10);
    }

    #[test]
    fn test_effective_progress() {
        assert_eq!(effective_progress(None, None, true), 100);
        assert_eq!(effective_progress(Some("PLAY [a]\n"), Some(60.0), false), 60);
        assert_eq!(effective_progress(Some("PLAY [a]\n"), Some(10.0), false), 30);
        // The backend's figure never pushes a running job to 100
        assert_eq!(effective_progress(None, Some(100.0), false), 95);
        assert_eq!(effective_progress(None, Some(f64::NAN), false), 5);
        assert_eq!(effective_progress(Some("PLAY RECAP\n"), None, false), 100);
    }

    #[test]
    fn test_aggregate_progress() {
        assert_eq!(aggregate_progress(&[]), 5);
        assert_eq!(aggregate_progress(&[100, 50]), 75);
        assert_eq!(aggregate_progress(&[5, 5, 100]), 36);
    }
}
