//! Duration histograms
//!
//! `DurationHistogram` is the seam lock instrumentation records through. It is
//! implemented for the OpenTelemetry `Histogram<f64>` and for the in-memory
//! [`Histogram`] used by tests and demos.

use opentelemetry::KeyValue;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Sink for duration samples
pub trait DurationHistogram: Send + Sync {
    /// Record one sample
    fn record_duration(&self, elapsed: Duration, attributes: &[KeyValue]);
}

impl DurationHistogram for opentelemetry::metrics::Histogram<f64> {
    fn record_duration(&self, elapsed: Duration, attributes: &[KeyValue]) {
        self.record(elapsed.as_secs_f64(), attributes);
    }
}

/// Histogram metric for tracking distributions
///
/// Keeps every observation in memory, in seconds.
#[derive(Debug, Clone)]
pub struct Histogram {
    name: String,
    values: Arc<RwLock<Vec<f64>>>,
}

impl Histogram {
    /// Create a new histogram
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observe a value
    pub fn observe(&self, value: f64) {
        self.values.write().push(value);
    }

    /// Observe a duration
    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    /// Snapshot of all observations in recording order
    pub fn values(&self) -> Vec<f64> {
        self.values.read().clone()
    }

    /// Get count of observations
    pub fn count(&self) -> usize {
        self.values.read().len()
    }

    /// Get sum of all values
    pub fn sum(&self) -> f64 {
        self.values.read().iter().sum()
    }

    /// Get average value
    pub fn avg(&self) -> f64 {
        let values = self.values.read();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    pub fn max(&self) -> Option<f64> {
        self.values.read().iter().copied().reduce(f64::max)
    }

    /// Get percentile (0-100)
    pub fn percentile(&self, p: f64) -> f64 {
        let mut values = self.values();
        if values.is_empty() {
            return 0.0;
        }

        values.sort_by(f64::total_cmp);
        let index = ((p.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f64).round() as usize;
        values[index]
    }

    /// Reset the histogram
    pub fn reset(&self) {
        self.values.write().clear();
    }
}

impl DurationHistogram for Histogram {
    fn record_duration(&self, elapsed: Duration, _attributes: &[KeyValue]) {
        self.observe_duration(elapsed);
    }
}
