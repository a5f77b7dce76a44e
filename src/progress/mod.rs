// Progress estimation and per-job monotonic tracking

use dashmap::DashMap;

pub mod estimator;

pub use estimator::{
    aggregate_progress, effective_progress, estimate_progress, LogCounts, COMPLETE, FACTS_FLOOR,
    PROGRESS_FLOOR, RUNNING_CEILING,
};

/// Last reported progress per job.
///
/// This is the only state shared between job pollers; it exists so that a
/// job's bar never moves backwards.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    jobs: DashMap<String, u8>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        ProgressRegistry {
            jobs: DashMap::new(),
        }
    }

    /// Record a new estimate and return the value to display,
    /// which is never lower than anything recorded before.
    pub fn record(&self, job_id: &str, estimate: u8) -> u8 {
        let estimate = estimate.min(COMPLETE);
        let mut entry = self.jobs.entry(job_id.to_string()).or_insert(0);
        let next = (*entry).max(estimate);
        *entry = next;
        next
    }

    pub fn get(&self, job_id: &str) -> Option<u8> {
        self.jobs.get(job_id).map(|p| *p)
    }

    pub fn forget(&self, job_id: &str) {
        self.jobs.remove(job_id);
    }

    /// Mean progress of a set of jobs; unknown jobs count as the floor
    pub fn aggregate<S: AsRef<str>>(&self, job_ids: &[S]) -> u8 {
        let values: Vec<u8> = job_ids
            .iter()
            .map(|id| self.get(id.as_ref()).unwrap_or(PROGRESS_FLOOR))
            .collect();
        aggregate_progress(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_never_decreases() {
        let registry = ProgressRegistry::new();
        assert_eq!(registry.record("job", 30), 30);
        assert_eq!(registry.record("job", 20), 30);
        assert_eq!(registry.record("job", 45), 45);
        assert_eq!(registry.record("job", 5), 45);
        assert_eq!(registry.get("job"), Some(45));
    }

    #[test]
    fn test_jobs_are_independent() {
        let registry = ProgressRegistry::new();
        registry.record("a", 80);
        assert_eq!(registry.record("b", 10), 10);
        registry.forget("a");
        assert_eq!(registry.get("a"), None);
    }

    #[test]
    fn test_monotonic_over_growing_output() {
        // Output grows, but a later snapshot can look "less done" to the
        // estimator when new task headers arrive before their results
        let snapshots = [
            "",
            "PLAY [site]\n",
            "PLAY [site]\nTASK [a]\nok: [h1]\n",
            "PLAY [site]\nTASK [a]\nok: [h1]\nTASK [b]\nTASK [c]\n",
            "PLAY [site]\nTASK [a]\nok: [h1]\nTASK [b]\nTASK [c]\nok: [h1]\n",
            "PLAY [site]\nTASK [a]\nok: [h1]\nTASK [b]\nTASK [c]\nok: [h1]\nPLAY RECAP\n",
        ];

        let registry = ProgressRegistry::new();
        let mut previous = 0;
        for output in snapshots {
            let shown = registry.record("job", estimate_progress(Some(output)));
            assert!(shown >= previous, "{} < {}", shown, previous);
            previous = shown;
        }
        assert_eq!(previous, 100);
    }

    #[test]
    fn test_aggregate_uses_floor_for_unknown_jobs() {
        let registry = ProgressRegistry::new();
        registry.record("a", 95);
        assert_eq!(registry.aggregate(&["a", "missing"]), 50);
    }
}
