//! Per-model inference metrics.
//!
//! Samples are appended, never mutated, and retained in a bounded rolling
//! window per model. Success/failure totals are cumulative so accounting
//! stays exact after old samples roll off. No side effects on cache state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

/// One recorded inference call.
#[derive(Debug, Clone)]
pub struct MetricSample {
    /// Model the call ran against.
    pub model_id: String,
    /// Wall-clock latency of the call, including acquisition.
    pub latency: Duration,
    /// Whether the call succeeded.
    pub success: bool,
    /// When the sample was recorded.
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ModelMetrics {
    samples: VecDeque<MetricSample>,
    total_success: u64,
    total_failure: u64,
}

/// Aggregate view of one model's recent calls.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    /// Cumulative successful calls.
    pub success_count: u64,
    /// Cumulative failed calls.
    pub failure_count: u64,
    /// Failures as a fraction of all calls, 0.0 to 1.0.
    pub error_rate: f64,
    /// Mean latency over the retained window, in milliseconds.
    pub avg_latency_ms: f64,
    /// Worst latency over the retained window, in milliseconds.
    pub max_latency_ms: u64,
    /// Number of samples currently retained.
    pub window_len: usize,
}

/// Records latency and outcome per model.
#[derive(Debug)]
pub struct MetricsCollector {
    window: usize,
    inner: RwLock<HashMap<String, ModelMetrics>>,
}

impl MetricsCollector {
    /// Creates a collector retaining up to `window` samples per model.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self { window, inner: RwLock::new(HashMap::new()) }
    }

    /// Records a successful call.
    pub fn record_success(&self, model_id: &str, latency: Duration) {
        self.record(model_id, latency, true);
    }

    /// Records a failed call.
    pub fn record_failure(&self, model_id: &str, latency: Duration) {
        self.record(model_id, latency, false);
    }

    fn record(&self, model_id: &str, latency: Duration, success: bool) {
        let mut inner = self.inner.write().expect("Metrics lock poisoned");
        let metrics = inner.entry(model_id.to_string()).or_default();

        if success {
            metrics.total_success += 1;
        } else {
            metrics.total_failure += 1;
        }

        metrics.samples.push_back(MetricSample {
            model_id: model_id.to_string(),
            latency,
            success,
            recorded_at: Utc::now(),
        });
        while metrics.samples.len() > self.window {
            metrics.samples.pop_front();
        }
    }

    /// Aggregate view for one model, if any call was recorded.
    #[must_use]
    pub fn summary(&self, model_id: &str) -> Option<MetricsSummary> {
        let inner = self.inner.read().expect("Metrics lock poisoned");
        inner.get(model_id).map(Self::summarize)
    }

    /// Aggregate views for every model with recorded calls.
    #[must_use]
    pub fn all(&self) -> HashMap<String, MetricsSummary> {
        let inner = self.inner.read().expect("Metrics lock poisoned");
        inner
            .iter()
            .map(|(id, metrics)| (id.clone(), Self::summarize(metrics)))
            .collect()
    }

    fn summarize(metrics: &ModelMetrics) -> MetricsSummary {
        let total = metrics.total_success + metrics.total_failure;
        let error_rate = if total == 0 {
            0.0
        } else {
            metrics.total_failure as f64 / total as f64
        };

        let window_len = metrics.samples.len();
        let avg_latency_ms = if window_len == 0 {
            0.0
        } else {
            let sum: f64 = metrics.samples.iter().map(|s| s.latency.as_secs_f64()).sum();
            sum * 1000.0 / window_len as f64
        };
        let max_latency_ms = metrics
            .samples
            .iter()
            .map(|s| s.latency.as_millis() as u64)
            .max()
            .unwrap_or(0);

        MetricsSummary {
            success_count: metrics.total_success,
            failure_count: metrics.total_failure,
            error_rate,
            avg_latency_ms,
            max_latency_ms,
            window_len,
        }
    }
}
