use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Observations kept per histogram for percentile computation.
const HISTOGRAM_WINDOW: usize = 4096;

/// Type of metric.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// A metric value at a point in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub value: f64,
    pub labels: Option<String>,
    pub metric_type: MetricType,
}

/// Monotonically increasing counter.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge stored as `f64` bits.
struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
        }
    }
    fn set(&self, v: f64) {
        self.bits.store(v.to_bits(), Ordering::Relaxed);
    }
    fn increment(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Histogram with exact count/sum and a sliding window for percentiles.
struct Histogram {
    inner: Mutex<HistogramState>,
}

#[derive(Default)]
struct HistogramState {
    count: u64,
    sum: f64,
    window: VecDeque<f64>,
}

impl Histogram {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HistogramState::default()),
        }
    }
    fn observe(&self, value: f64) {
        let mut state = self.inner.lock();
        state.count += 1;
        state.sum += value;
        if state.window.len() == HISTOGRAM_WINDOW {
            let _ = state.window.pop_front();
        }
        state.window.push_back(value);
    }
    fn summary(&self) -> HistogramSummary {
        let state = self.inner.lock();
        if state.window.is_empty() {
            return HistogramSummary::default();
        }
        let mut obs: Vec<f64> = state.window.iter().copied().collect();
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = obs.len();
        let at = |q: f64| obs[((n as f64 * q) as usize).min(n - 1)];
        HistogramSummary {
            count: state.count,
            sum: state.sum,
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

/// Summary statistics from a histogram.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Metric key: name + sorted labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: impl Into<String>, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.into(),
            labels: sorted,
        }
    }

    fn labels_json(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        let map: HashMap<&str, &str> = self
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        serde_json::to_string(&map).ok()
    }
}

/// Thread-safe in-process metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        if let Some(c) = self.counters.read().get(&key) {
            c.increment(n);
            return;
        }
        self.counters
            .write()
            .entry(key)
            .or_insert_with(Counter::new)
            .increment(n);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(g) = self.gauges.read().get(&key) {
            g.set(value);
            return;
        }
        self.gauges
            .write()
            .entry(key)
            .or_insert_with(Gauge::new)
            .set(value);
    }

    /// Increment/decrement a gauge by delta.
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(g) = self.gauges.read().get(&key) {
            g.increment(delta);
            return;
        }
        self.gauges
            .write()
            .entry(key)
            .or_insert_with(Gauge::new)
            .increment(delta);
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(h) = self.histograms.read().get(&key) {
            h.observe(value);
            return;
        }
        self.histograms
            .write()
            .entry(key)
            .or_insert_with(Histogram::new)
            .observe(value);
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(Histogram::summary)
            .unwrap_or_default()
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters.read().get(&key).map_or(0, Counter::get)
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.gauges.read().get(&key).map_or(0.0, Gauge::get)
    }

    /// Capture every metric's current value. Histograms report their p50.
    pub fn snapshot(&self) -> Vec<MetricsSnapshot> {
        let now = Utc::now();
        let mut out = Vec::new();

        for (key, counter) in self.counters.read().iter() {
            out.push(MetricsSnapshot {
                timestamp: now,
                name: key.name.clone(),
                value: counter.get() as f64,
                labels: key.labels_json(),
                metric_type: MetricType::Counter,
            });
        }
        for (key, gauge) in self.gauges.read().iter() {
            out.push(MetricsSnapshot {
                timestamp: now,
                name: key.name.clone(),
                value: gauge.get(),
                labels: key.labels_json(),
                metric_type: MetricType::Gauge,
            });
        }
        for (key, histogram) in self.histograms.read().iter() {
            out.push(MetricsSnapshot {
                timestamp: now,
                name: key.name.clone(),
                value: histogram.summary().p50,
                labels: key.labels_json(),
                metric_type: MetricType::Histogram,
            });
        }

        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

/// Log a metrics snapshot every `interval` until `cancel` fires.
pub fn spawn_metrics_logger(
    recorder: Arc<MetricsRecorder>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately.
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = recorder.snapshot();
                    if snapshot.is_empty() {
                        continue;
                    }
                    match serde_json::to_string(&snapshot) {
                        Ok(json) => tracing::info!(metrics = %json, "metrics snapshot"),
                        Err(e) => tracing::warn!(error = %e, "failed to encode metrics snapshot"),
                    }
                }
            }
        }
    })
}
