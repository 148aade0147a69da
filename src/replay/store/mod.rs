//! Replay store trait and shared save/dedup/retention mechanics (§4.10/L).
//!
//! Grounded on the teacher's `scheduler/job_store.rs` `JobStore` trait
//! (async CRUD behind a single trait, three concrete backends sharing one
//! schema) — generalized from cron-job persistence to replay-event
//! ingestion, and from one backend to three (memory, file, SQLite).

pub mod file;
pub mod memory;
#[cfg(feature = "sql-store")]
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;

use super::{apply_retention, sort_for_output, CompactionConfig, ReplayFilter, RetentionConfig, SaveResult};
use crate::canonical::sha256_hex;
use crate::error::StoreError;
use crate::types::{DedupKey, ReplayCursor, ReplayTimelineRecord};

/// Cap on how many duplicate composite keys a single `save` call reports
/// (§4.11: "count + deterministic list of duplicate composite keys (first
/// K)"). `duplicates` itself is never capped, only the key list.
pub const DUPLICATE_KEY_REPORT_LIMIT: usize = 20;

/// Builds the composite object `projectionHash` is defined over (§3):
/// `{slot, signature, sourceEventName, sourceEventSequence, payload, seq,
/// taskId, timestampMs, type}`. `seq` is passed in explicitly since it's
/// assigned by the caller before this is built.
fn projection_hash_input(record: &ReplayTimelineRecord, seq: u64) -> serde_json::Value {
    serde_json::json!({
        "slot": record.slot,
        "signature": record.signature,
        "sourceEventName": record.source_event_name,
        "sourceEventSequence": record.source_event_sequence,
        "payload": record.payload,
        "seq": seq,
        "taskId": record.task_id.to_string(),
        "timestampMs": record.timestamp_ms,
        "type": record.source_event_type,
    })
}

/// Shared async contract for every replay persistence backend.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    async fn save(&self, records: Vec<ReplayTimelineRecord>) -> Result<SaveResult, StoreError>;
    async fn query(&self, filter: &ReplayFilter) -> Result<Vec<ReplayTimelineRecord>, StoreError>;
    async fn get_cursor(&self) -> Result<Option<ReplayCursor>, StoreError>;
    async fn save_cursor(&self, cursor: ReplayCursor) -> Result<(), StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;

    /// Only meaningful for buffered backends (file); a no-op elsewhere.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-process ingestion state shared by the memory and file backends (both
/// keep the full record set resident); SQLite does the equivalent work with
/// a UNIQUE constraint and SQL aggregates instead of this helper.
pub(crate) struct IngestState {
    pub records: Vec<ReplayTimelineRecord>,
    pub dedup: HashSet<DedupKey>,
    pub next_seq: u64,
    pub writes_since_compaction: u64,
}

impl IngestState {
    pub fn new() -> Self {
        IngestState {
            records: Vec::new(),
            dedup: HashSet::new(),
            next_seq: 1,
            writes_since_compaction: 0,
        }
    }

    pub fn rebuild_dedup(&mut self) {
        self.dedup = self.records.iter().map(|r| r.dedup_key()).collect();
        self.next_seq = self.records.iter().map(|r| r.seq).max().unwrap_or(0) + 1;
    }

    /// Applies save semantics (§4.10/§4.11): dedup, seq assignment,
    /// projection hash recompute-or-validate, retention, then optional
    /// compaction.
    pub fn ingest(
        &mut self,
        incoming: Vec<ReplayTimelineRecord>,
        retention: &RetentionConfig,
        compaction: &CompactionConfig,
        now_ms: u64,
    ) -> Result<SaveResult, StoreError> {
        let mut inserted = 0usize;
        let mut duplicates = 0usize;
        let mut duplicate_keys = Vec::new();

        for mut record in incoming {
            let key = record.dedup_key();
            if self.dedup.contains(&key) {
                duplicates += 1;
                if duplicate_keys.len() < DUPLICATE_KEY_REPORT_LIMIT {
                    duplicate_keys.push(key);
                }
                continue;
            }

            let seq = self.next_seq;
            let recomputed = sha256_hex(&projection_hash_input(&record, seq));
            if record.projection_hash.is_empty() {
                record.projection_hash = recomputed;
            } else if record.projection_hash != recomputed {
                return Err(StoreError::ProjectionHashMismatch { seq });
            }

            record.seq = seq;
            self.next_seq += 1;
            self.dedup.insert(key);
            self.records.push(record);
            inserted += 1;
        }

        if inserted > 0 {
            apply_retention(&mut self.records, retention, now_ms);
            self.rebuild_dedup();
            sort_for_output(&mut self.records);
            self.writes_since_compaction += 1;

            if compaction.enabled && self.writes_since_compaction >= compaction.compact_after_writes {
                self.writes_since_compaction = 0;
            }
        }

        Ok(SaveResult { inserted, duplicates, duplicate_keys })
    }

    pub fn query(&self, filter: &ReplayFilter) -> Vec<ReplayTimelineRecord> {
        let mut matched: Vec<ReplayTimelineRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_for_output(&mut matched);
        let offset = filter.offset.unwrap_or(0);
        let matched: Vec<_> = matched.into_iter().skip(offset).collect();
        match filter.limit {
            Some(limit) => matched.into_iter().take(limit).collect(),
            None => matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskId;

    fn record(seq: u64, slot: u64, signature: &str, task_id: TaskId, ts: u64) -> ReplayTimelineRecord {
        ReplayTimelineRecord {
            seq,
            source_event_name: "taskCreated".to_string(),
            source_event_type: "task_created".to_string(),
            source_event_sequence: None,
            task_id,
            timestamp_ms: ts,
            slot,
            signature: signature.to_string(),
            payload: serde_json::json!({"slot": slot}),
            projection_hash: String::new(),
            dispute_id: None,
            trace_id: None,
            span_id: None,
        }
    }

    #[test]
    fn duplicate_composite_key_is_not_reinserted() {
        let mut state = IngestState::new();
        let task_id = TaskId([1u8; 32]);
        let r1 = record(0, 1, "sig-a", task_id, 0);
        let r2 = r1.clone();
        let result = state
            .ingest(vec![r1, r2], &RetentionConfig::default(), &CompactionConfig::default(), 0)
            .unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(result.duplicates, 1);
        assert_eq!(result.duplicate_keys, vec![DedupKey { slot: 1, signature: "sig-a".to_string(), source_event_type: "task_created".to_string() }]);
    }

    #[test]
    fn projection_hash_covers_seq_not_just_payload() {
        let mut state = IngestState::new();
        let task_id = TaskId([1u8; 32]);
        let a = state
            .ingest(
                vec![record(0, 1, "sig-a", task_id, 0)],
                &RetentionConfig::default(),
                &CompactionConfig::default(),
                0,
            )
            .unwrap();
        let mut other = IngestState::new();
        other.next_seq = 5;
        let b = other
            .ingest(
                vec![record(0, 1, "sig-a", task_id, 0)],
                &RetentionConfig::default(),
                &CompactionConfig::default(),
                0,
            )
            .unwrap();
        assert_eq!(a.inserted, 1);
        assert_eq!(b.inserted, 1);
        assert_ne!(state.records[0].projection_hash, other.records[0].projection_hash);
    }

    #[test]
    fn sequence_numbers_are_monotone_from_one() {
        let mut state = IngestState::new();
        let task_id = TaskId([1u8; 32]);
        let records = vec![
            record(0, 1, "sig-a", task_id, 0),
            record(0, 2, "sig-b", task_id, 0),
        ];
        state
            .ingest(records, &RetentionConfig::default(), &CompactionConfig::default(), 0)
            .unwrap();
        assert_eq!(state.records[0].seq, 1);
        assert_eq!(state.records[1].seq, 2);
    }

    #[test]
    fn absent_projection_hash_is_computed_on_insert() {
        let mut state = IngestState::new();
        let task_id = TaskId([1u8; 32]);
        state
            .ingest(
                vec![record(0, 1, "sig-a", task_id, 0)],
                &RetentionConfig::default(),
                &CompactionConfig::default(),
                0,
            )
            .unwrap();
        assert!(!state.records[0].projection_hash.is_empty());
    }

    #[test]
    fn mismatched_projection_hash_is_rejected() {
        let mut state = IngestState::new();
        let task_id = TaskId([1u8; 32]);
        let mut r = record(0, 1, "sig-a", task_id, 0);
        r.projection_hash = "not-the-real-hash".to_string();
        let err = state
            .ingest(vec![r], &RetentionConfig::default(), &CompactionConfig::default(), 0)
            .unwrap_err();
        assert!(matches!(err, StoreError::ProjectionHashMismatch { .. }));
    }

    #[test]
    fn retention_keeps_only_newest_per_task() {
        let mut state = IngestState::new();
        let task_id = TaskId([1u8; 32]);
        let records = vec![
            record(0, 1, "sig-a", task_id, 0),
            record(0, 2, "sig-b", task_id, 0),
            record(0, 3, "sig-c", task_id, 0),
        ];
        let retention = RetentionConfig {
            max_events_per_task: 2,
            ..RetentionConfig::default()
        };
        state
            .ingest(records, &retention, &CompactionConfig::default(), 0)
            .unwrap();
        assert_eq!(state.records.len(), 2);
        assert_eq!(state.records[0].slot, 2);
        assert_eq!(state.records[1].slot, 3);
    }

    #[test]
    fn query_results_are_sorted_by_slot_then_source_sequence() {
        let mut state = IngestState::new();
        let task_id = TaskId([1u8; 32]);
        let records = vec![
            record(0, 2, "sig-b", task_id, 0),
            record(0, 1, "sig-a", task_id, 0),
        ];
        state
            .ingest(records, &RetentionConfig::default(), &CompactionConfig::default(), 0)
            .unwrap();
        let result = state.query(&ReplayFilter::default());
        assert_eq!(result[0].slot, 1);
        assert_eq!(result[1].slot, 2);
    }
}
