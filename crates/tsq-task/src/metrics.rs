use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// Outcome label values of `task_runs_total`.
pub mod outcome {
    pub const SUCCESS: &str = "success";
    /// The query ran and reported an error.
    pub const QUERY_ERROR: &str = "query_error";
    /// No result: canceled, timed out or the query could not be submitted.
    pub const RUN_ERROR: &str = "run_error";
}

/// Run counters shared by every promise of an executor.
#[derive(Clone)]
pub struct RunMetrics {
    runs_total: IntCounterVec,
    runs_active: IntGauge,
}

impl RunMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let runs_total = IntCounterVec::new(
            Opts::new("task_runs_total", "Finished task runs by outcome"),
            &["outcome"],
        )?;
        let runs_active = IntGauge::new("task_runs_active", "Task runs in progress")?;
        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(runs_active.clone()))?;
        Ok(Self {
            runs_total,
            runs_active,
        })
    }

    pub(crate) fn started(&self) {
        self.runs_active.inc();
    }

    pub(crate) fn finished(&self, outcome: &str) {
        self.runs_active.dec();
        self.runs_total.with_label_values(&[outcome]).inc();
    }

    pub fn total(&self, outcome: &str) -> u64 {
        self.runs_total.with_label_values(&[outcome]).get()
    }

    pub fn active(&self) -> i64 {
        self.runs_active.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_outcomes() {
        let registry = Registry::new();
        let m = RunMetrics::new(&registry).unwrap();
        m.started();
        m.started();
        assert_eq!(m.active(), 2);
        m.finished(outcome::SUCCESS);
        m.finished(outcome::RUN_ERROR);
        assert_eq!(m.active(), 0);
        assert_eq!(m.total(outcome::SUCCESS), 1);
        assert_eq!(m.total(outcome::QUERY_ERROR), 0);

        let names: Vec<String> = registry.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert_eq!(names, ["task_runs_active", "task_runs_total"]);
    }

    #[test]
    fn test_registering_twice_fails() {
        let registry = Registry::new();
        RunMetrics::new(&registry).unwrap();
        assert!(RunMetrics::new(&registry).is_err());
    }
}
