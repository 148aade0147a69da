//! End-to-end scenarios from spec §8 not already covered as unit tests
//! alongside their owning modules (S1-S3 live in `verifier_lane.rs`).

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;

use agenc_runtime::audit::AuditTrail;
use agenc_runtime::canonical;
use agenc_runtime::error::{BackfillError, FetcherError};
use agenc_runtime::replay::backfill::{BackfillConfig, BackfillService, EventProjector, FetchPage, Fetcher, RawEvent};
use agenc_runtime::replay::store::memory::InMemoryReplayStore;
use agenc_runtime::replay::store::ReplayStore;
use agenc_runtime::replay::{CompactionConfig, NoopAlertDispatcher, ReplayFilter, RetentionConfig};
use agenc_runtime::types::{AuditEntry, ReplayCursor, ReplayTimelineRecord, TaskId};
use agenc_runtime::metrics::NoopMetrics;

struct TaskCreatedProjector;

impl EventProjector for TaskCreatedProjector {
    fn project(&self, raw: &RawEvent) -> Option<ReplayTimelineRecord> {
        if raw.event_name != "taskCreated" {
            return None;
        }
        Some(ReplayTimelineRecord {
            seq: 0,
            source_event_name: raw.event_name.clone(),
            source_event_type: "task_created".to_string(),
            source_event_sequence: raw.source_event_sequence,
            task_id: TaskId([7u8; 32]),
            timestamp_ms: raw.timestamp_ms.unwrap_or(0),
            slot: raw.slot,
            signature: raw.signature.clone(),
            payload: raw.event.clone(),
            projection_hash: String::new(),
            dispute_id: None,
            trace_id: raw.trace_id.clone(),
            span_id: raw.span_id.clone(),
        })
    }
}

fn raw_event(slot: u64, sig: &str) -> RawEvent {
    RawEvent {
        event_name: "taskCreated".to_string(),
        slot,
        signature: sig.to_string(),
        event: serde_json::json!({"slot": slot, "sig": sig}),
        timestamp_ms: Some(slot * 1000),
        source_event_sequence: None,
        trace_id: None,
        span_id: None,
    }
}

fn cursor(slot: u64, sig: &str) -> ReplayCursor {
    ReplayCursor {
        slot,
        signature: sig.to_string(),
        event_name: "taskCreated".to_string(),
        trace_id: None,
        span_id: None,
    }
}

/// Page script: one page per `fetch_page` call, where a page may be a
/// fetcher-level failure instead of data (§8/S4: "page 2 throws").
enum ScriptedPage {
    Data(FetchPage),
    Throws,
}

struct CrashableFetcher {
    pages: StdMutex<Vec<ScriptedPage>>,
}

#[async_trait]
impl Fetcher for CrashableFetcher {
    async fn fetch_page(&self, _cursor: Option<&ReplayCursor>, _to_slot: u64, _page_size: u32) -> Result<FetchPage, FetcherError> {
        let mut pages = self.pages.lock().unwrap();
        if pages.is_empty() {
            return Ok(FetchPage { events: vec![], next_cursor: None, done: true });
        }
        match pages.remove(0) {
            ScriptedPage::Data(page) => Ok(page),
            ScriptedPage::Throws => Err(FetcherError::FetchFailed("upstream unavailable".to_string())),
        }
    }
}

#[tokio::test]
async fn s4_backfill_resumes_after_crash() {
    let store = InMemoryReplayStore::new(RetentionConfig::default(), CompactionConfig::default());
    let projector = TaskCreatedProjector;
    let metrics = NoopMetrics;
    let alerts = NoopAlertDispatcher;

    let fetcher = CrashableFetcher {
        pages: StdMutex::new(vec![
            ScriptedPage::Data(FetchPage {
                events: vec![raw_event(1, "A")],
                next_cursor: Some(cursor(1, "A")),
                done: false,
            }),
            ScriptedPage::Throws,
        ]),
    };

    let service = BackfillService::new(&store, &fetcher, &projector, &metrics, &alerts);
    let config = BackfillConfig { to_slot: 100, page_size: 10, strict_unknown_events: false };

    let first_run = service.run(config, false, 0).await;
    assert!(matches!(first_run, Err(BackfillError::Fetcher(_))));

    let saved_cursor = store.get_cursor().await.unwrap().expect("cursor persisted before the crash");
    assert_eq!(saved_cursor.stable_string(), "1:A:taskCreated");

    let fetcher = CrashableFetcher {
        pages: StdMutex::new(vec![ScriptedPage::Data(FetchPage {
            events: vec![raw_event(2, "B")],
            next_cursor: Some(cursor(2, "B")),
            done: true,
        })]),
    };
    let service = BackfillService::new(&store, &fetcher, &projector, &metrics, &alerts);
    let second_run = service.run(config, true, 1).await.unwrap();
    assert_eq!(second_run.processed, 1);
    assert_eq!(second_run.duplicates, 0);

    let records = store.query(&ReplayFilter::default()).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn s5_retention_keeps_only_the_newest_two_events() {
    let store = InMemoryReplayStore::new(
        RetentionConfig { max_events_per_task: 2, ..RetentionConfig::default() },
        CompactionConfig::default(),
    );
    let task_id = TaskId([3u8; 32]);

    for (slot, sig) in [(1u64, "A"), (2, "B"), (3, "C"), (4, "D")] {
        store
            .save(vec![ReplayTimelineRecord {
                seq: 0,
                source_event_name: "taskCreated".to_string(),
                source_event_type: "task_created".to_string(),
                source_event_sequence: None,
                task_id,
                timestamp_ms: slot * 1000,
                slot,
                signature: sig.to_string(),
                payload: serde_json::json!({}),
                projection_hash: String::new(),
                dispute_id: None,
                trace_id: None,
                span_id: None,
            }])
            .await
            .unwrap();
    }

    let records = store.query(&ReplayFilter::default()).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records.iter().map(|r| r.signature.as_str()).collect::<Vec<_>>(), vec!["C", "D"]);
    assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![3, 4]);
}

#[tokio::test]
async fn s6_tampering_with_a_serialized_entry_is_detected_on_reload() {
    let trail = AuditTrail::new();
    for i in 0..3u64 {
        trail.append(AuditEntry {
            seq: 0,
            actor: "alice".to_string(),
            role: "execute".to_string(),
            action: format!("replay.compare.{i}"),
            permission: "allow".to_string(),
            timestamp_ms: i,
            input_hash: canonical::sha256_hex(&serde_json::json!({"i": i})),
            output_hash: canonical::sha256_hex(&serde_json::json!({"ok": true})),
            prev_hash: String::new(),
            entry_hash: String::new(),
            metadata: None,
        });
    }

    let serialized = serde_json::to_string(&trail.entries()).unwrap();
    let mut entries: Vec<AuditEntry> = serde_json::from_str(&serialized).unwrap();
    entries[1].action = "replay.backfill.tampered".to_string();

    let reloaded = AuditTrail::from_entries(entries);
    let report = reloaded.verify();
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| matches!(e, agenc_runtime::error::AuditError::ChainIntegrity { seq, .. } if *seq == 2)));
}
