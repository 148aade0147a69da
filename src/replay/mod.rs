//! Replay timeline store + backfill (§4.10–§4.12/L–N): event ingestion with
//! cursor persistence, duplicate detection, retention, and comparison
//! against a locally-observed trajectory.

pub mod backfill;
pub mod comparator;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::types::{DedupKey, ReplayCursor, ReplayTimelineRecord, TaskId};

impl ReplayTimelineRecord {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            slot: self.slot,
            signature: self.signature.clone(),
            source_event_type: self.source_event_type.clone(),
        }
    }

    pub fn cursor(&self) -> ReplayCursor {
        ReplayCursor {
            slot: self.slot,
            signature: self.signature.clone(),
            event_name: self.source_event_name.clone(),
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
        }
    }
}

/// Query filter for `ReplayStore::query` (§4.10).
#[derive(Debug, Clone, Default)]
pub struct ReplayFilter {
    pub task_id: Option<TaskId>,
    pub dispute_id: Option<String>,
    pub from_slot: Option<u64>,
    pub to_slot: Option<u64>,
    pub from_timestamp_ms: Option<u64>,
    pub to_timestamp_ms: Option<u64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ReplayFilter {
    fn matches(&self, record: &ReplayTimelineRecord) -> bool {
        if let Some(task_id) = self.task_id {
            if record.task_id != task_id {
                return false;
            }
        }
        if let Some(dispute_id) = &self.dispute_id {
            if record.dispute_id.as_deref() != Some(dispute_id.as_str()) {
                return false;
            }
        }
        if let Some(from) = self.from_slot {
            if record.slot < from {
                return false;
            }
        }
        if let Some(to) = self.to_slot {
            if record.slot > to {
                return false;
            }
        }
        if let Some(from) = self.from_timestamp_ms {
            if record.timestamp_ms < from {
                return false;
            }
        }
        if let Some(to) = self.to_timestamp_ms {
            if record.timestamp_ms > to {
                return false;
            }
        }
        true
    }
}

/// Result of one `save` call (§4.10/§4.11). `duplicate_keys` is capped at
/// `store::DUPLICATE_KEY_REPORT_LIMIT`; `duplicates` still counts every
/// skipped record even once the list stops growing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveResult {
    pub inserted: usize,
    pub duplicates: usize,
    pub duplicate_keys: Vec<DedupKey>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub ttl_ms: u64,
    pub max_events_per_task: usize,
    pub max_events_per_dispute: usize,
    pub max_events_total: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            ttl_ms: u64::MAX,
            max_events_per_task: usize::MAX,
            max_events_per_dispute: usize::MAX,
            max_events_total: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompactionConfig {
    pub enabled: bool,
    pub compact_after_writes: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        CompactionConfig {
            enabled: false,
            compact_after_writes: 1000,
        }
    }
}

/// Applies the four-stage retention policy in order (§4.10). Shared by every
/// store implementation so eviction order is identical across backends.
pub(crate) fn apply_retention(
    records: &mut Vec<ReplayTimelineRecord>,
    retention: &RetentionConfig,
    now_ms: u64,
) {
    use std::collections::HashMap;

    let floor = now_ms.saturating_sub(retention.ttl_ms);
    records.retain(|r| r.timestamp_ms >= floor);

    if retention.max_events_per_task != usize::MAX {
        let mut per_task: HashMap<TaskId, Vec<usize>> = HashMap::new();
        for (idx, r) in records.iter().enumerate() {
            per_task.entry(r.task_id).or_default().push(idx);
        }
        let mut keep = vec![true; records.len()];
        for indices in per_task.values() {
            if indices.len() <= retention.max_events_per_task {
                continue;
            }
            let mut sorted = indices.clone();
            sorted.sort_by_key(|&i| std::cmp::Reverse((records[i].slot, records[i].seq)));
            for &i in sorted.iter().skip(retention.max_events_per_task) {
                keep[i] = false;
            }
        }
        let mut idx = 0;
        records.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
    }

    if retention.max_events_per_dispute != usize::MAX {
        let mut per_dispute: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, r) in records.iter().enumerate() {
            if let Some(d) = &r.dispute_id {
                per_dispute.entry(d.clone()).or_default().push(idx);
            }
        }
        let mut keep = vec![true; records.len()];
        for indices in per_dispute.values() {
            if indices.len() <= retention.max_events_per_dispute {
                continue;
            }
            let mut sorted = indices.clone();
            sorted.sort_by_key(|&i| std::cmp::Reverse((records[i].slot, records[i].seq)));
            for &i in sorted.iter().skip(retention.max_events_per_dispute) {
                keep[i] = false;
            }
        }
        let mut idx = 0;
        records.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
    }

    if records.len() > retention.max_events_total {
        records.sort_by_key(|r| std::cmp::Reverse((r.slot, r.seq)));
        records.truncate(retention.max_events_total);
        records.sort_by_key(|r| (r.slot, r.seq));
    }
}

pub(crate) fn sort_for_output(records: &mut [ReplayTimelineRecord]) {
    records.sort_by_key(|r| (r.slot, r.source_event_sequence.unwrap_or(r.seq)));
}

/// Alert schema v1 (§6). Required fields are enforced by construction
/// rather than left implicit — every alert carries a schema version so
/// downstream consumers can evolve independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ReplayAnomalyRepeat,
    ReplayHashMismatch,
    ReplayIngestionLag,
    TransitionValidation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub schema_version: u32,
    pub code: String,
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub task_id: Option<TaskId>,
    pub dispute_id: Option<String>,
    pub anomalies_hash: Option<String>,
    pub timestamp_ms: u64,
    pub metadata: serde_json::Value,
}

impl Alert {
    pub fn new(code: impl Into<String>, severity: AlertSeverity, kind: AlertKind, timestamp_ms: u64) -> Self {
        Alert {
            schema_version: 1,
            code: code.into(),
            severity,
            kind,
            task_id: None,
            dispute_id: None,
            anomalies_hash: None,
            timestamp_ms,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Alert sink, injected rather than a global singleton (§5).
pub trait AlertDispatcher: Send + Sync {
    fn dispatch(&self, alert: Alert);
}

/// Collects alerts in memory, for tests and for runtime glue that wants to
/// inspect what fired.
#[derive(Default)]
pub struct CollectingAlertDispatcher {
    alerts: std::sync::Mutex<Vec<Alert>>,
}

impl CollectingAlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl AlertDispatcher for CollectingAlertDispatcher {
    fn dispatch(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAlertDispatcher;

impl AlertDispatcher for NoopAlertDispatcher {
    fn dispatch(&self, _alert: Alert) {}
}
