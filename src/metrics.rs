//! Metrics provider capability interface (§4.2/B). A single in-memory
//! implementation stores snapshots keyed by `name|sorted-label-pairs`; no
//! persistence is required and consumers may install a no-op.
//!
//! Grounded on the teacher's two metrics modules: `reasoning/metrics.rs`
//! (atomic counters, point-in-time `snapshot()`) for the storage shape, and
//! `metrics/mod.rs` (`MetricsExporter` trait, `MetricsConfig`) for the
//! capability-interface/trait-object pattern — generalized here into a
//! label-keyed counter/gauge/histogram trait rather than fixed named
//! fields, since §4.2 requires arbitrary metric names and label sets.

use dashmap::DashMap;

/// Label set as an ordered slice of `(key, value)` pairs. Implementations
/// sort by key before using the pair list as part of a storage key, per
/// spec §6 ("label keys sorted before serialization").
pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// Metrics sink consumed by every other subsystem. Implementations must be
/// `Send + Sync` since the runtime glue shares one instance across workers.
pub trait Metrics: Send + Sync {
    fn counter(&self, name: &str, delta: f64, labels: Labels);
    fn gauge(&self, name: &str, value: f64, labels: Labels);
    fn histogram(&self, name: &str, value: f64, labels: Labels);
}

fn storage_key(name: &str, labels: Labels) -> String {
    let mut sorted: Vec<&(&str, &str)> = labels.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    let label_part = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}|{label_part}")
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl HistogramSummary {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// In-memory metrics provider. Cheaply cloneable; all clones share the same
/// underlying maps (mirrors the teacher's `ReasoningMetrics` being an
/// `Arc`-backed `Clone`).
#[derive(Clone, Default)]
pub struct InMemoryMetrics {
    counters: std::sync::Arc<DashMap<String, f64>>,
    gauges: std::sync::Arc<DashMap<String, f64>>,
    histograms: std::sync::Arc<DashMap<String, HistogramSummary>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_value(&self, name: &str, labels: Labels) -> f64 {
        self.counters
            .get(&storage_key(name, labels))
            .map(|v| *v)
            .unwrap_or(0.0)
    }

    pub fn gauge_value(&self, name: &str, labels: Labels) -> f64 {
        self.gauges
            .get(&storage_key(name, labels))
            .map(|v| *v)
            .unwrap_or(0.0)
    }

    pub fn histogram_summary(&self, name: &str, labels: Labels) -> HistogramSummary {
        self.histograms
            .get(&storage_key(name, labels))
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

impl Metrics for InMemoryMetrics {
    fn counter(&self, name: &str, delta: f64, labels: Labels) {
        *self.counters.entry(storage_key(name, labels)).or_insert(0.0) += delta;
    }

    fn gauge(&self, name: &str, value: f64, labels: Labels) {
        self.gauges.insert(storage_key(name, labels), value);
    }

    fn histogram(&self, name: &str, value: f64, labels: Labels) {
        self.histograms
            .entry(storage_key(name, labels))
            .or_default()
            .record(value);
    }
}

/// A metrics sink that discards everything, for tests and bypass paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn counter(&self, _name: &str, _delta: f64, _labels: Labels) {}
    fn gauge(&self, _name: &str, _value: f64, _labels: Labels) {}
    fn histogram(&self, _name: &str, _value: f64, _labels: Labels) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let m = InMemoryMetrics::new();
        m.counter("agenc.verifier.checks", 1.0, &[("tier", "high")]);
        m.counter("agenc.verifier.checks", 1.0, &[("tier", "high")]);
        assert_eq!(m.counter_value("agenc.verifier.checks", &[("tier", "high")]), 2.0);
    }

    #[test]
    fn label_order_does_not_affect_storage_key() {
        let m = InMemoryMetrics::new();
        m.counter("x", 1.0, &[("a", "1"), ("b", "2")]);
        let v = m.counter_value("x", &[("b", "2"), ("a", "1")]);
        assert_eq!(v, 1.0);
    }

    #[test]
    fn gauge_overwrites() {
        let m = InMemoryMetrics::new();
        m.gauge("agenc.replay.lag", 3.0, &[]);
        m.gauge("agenc.replay.lag", 7.0, &[]);
        assert_eq!(m.gauge_value("agenc.replay.lag", &[]), 7.0);
    }

    #[test]
    fn histogram_tracks_min_max_mean() {
        let m = InMemoryMetrics::new();
        m.histogram("agenc.verifier.adaptive.risk_score", 0.2, &[("tier", "low")]);
        m.histogram("agenc.verifier.adaptive.risk_score", 0.8, &[("tier", "low")]);
        let summary = m.histogram_summary("agenc.verifier.adaptive.risk_score", &[("tier", "low")]);
        assert_eq!(summary.count, 2);
        assert!((summary.min - 0.2).abs() < f64::EPSILON);
        assert!((summary.max - 0.8).abs() < f64::EPSILON);
        assert!((summary.mean() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn noop_metrics_discards_everything() {
        let m = NoopMetrics;
        m.counter("x", 1.0, &[]);
        m.gauge("y", 1.0, &[]);
        m.histogram("z", 1.0, &[]);
    }

    #[test]
    fn different_labels_are_distinct_series() {
        let m = InMemoryMetrics::new();
        m.counter("agenc.verifier.checks", 1.0, &[("tier", "low")]);
        m.counter("agenc.verifier.checks", 1.0, &[("tier", "high")]);
        assert_eq!(m.counter_value("agenc.verifier.checks", &[("tier", "low")]), 1.0);
        assert_eq!(m.counter_value("agenc.verifier.checks", &[("tier", "high")]), 1.0);
    }
}
