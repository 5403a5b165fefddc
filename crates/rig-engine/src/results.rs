//! Measurement results of one execution.
//!
//! The running phase pushes samples into a shared sink; the manager reads
//! the finished set back out as JSON for the caller. Results survive until
//! the next execution replaces them.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use rig_core::measurement::Measurement;

/// Collected samples plus their average, serialised for the caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExperimentResults {
    pub execution_id: String,
    pub setup_id: String,
    pub samples: Vec<Measurement>,
    /// Arithmetic mean over `samples`; absent when no sample was taken.
    pub average: Option<Measurement>,
}

/// Shared handle the running phase writes into.
#[derive(Clone, Default)]
pub struct ResultsSink {
    inner: Arc<Mutex<ExperimentResults>>,
}

impl ResultsSink {
    pub fn new(execution_id: impl Into<String>, setup_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ExperimentResults {
                execution_id: execution_id.into(),
                setup_id: setup_id.into(),
                samples: Vec::new(),
                average: None,
            })),
        }
    }

    /// Append one sample.
    pub fn push(&self, sample: Measurement) {
        self.inner.lock().samples.push(sample);
    }

    /// Compute and store the average over everything pushed so far.
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        inner.average = Measurement::average(&inner.samples);
    }

    /// Number of samples collected so far.
    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot copy of the collected results.
    pub fn snapshot(&self) -> ExperimentResults {
        self.inner.lock().clone()
    }

    /// Results as a JSON document for the remote caller.
    pub fn to_json(&self) -> serde_json::Value {
        // ExperimentResults has no non-serialisable field.
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_reflects_pushed_samples() {
        let sink = ResultsSink::new("exec-1", "sync_speed_1");
        for rpm in [1400.0, 1420.0] {
            sink.push(Measurement {
                speed_rpm: rpm,
                ..Measurement::default()
            });
        }
        sink.finish();

        let results = sink.snapshot();
        assert_eq!(results.samples.len(), 2);
        let avg = results.average.unwrap();
        assert!((avg.speed_rpm - 1410.0).abs() < 1e-9);
    }

    #[test]
    fn empty_run_has_no_average() {
        let sink = ResultsSink::new("exec-2", "sync_speed_1");
        sink.finish();
        assert!(sink.snapshot().average.is_none());

        let json = sink.to_json();
        assert_eq!(json["execution_id"], "exec-2");
        assert!(json["average"].is_null());
    }
}
