//! Backfill service (§4.11/M): fetch-project-save loop with cursor
//! persistence, stall detection, and crash-safe resume.
//!
//! Grounded on the teacher's `scheduler/cron_scheduler.rs` tick loop (fetch
//! due work, run it, persist run-state, propagate failures without losing
//! the last good position) — generalized from a cron-job tick to a paged
//! event fetch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::store::ReplayStore;
use super::{Alert, AlertDispatcher, AlertKind, AlertSeverity};
use super::store::DUPLICATE_KEY_REPORT_LIMIT;
use crate::error::{BackfillError, FetcherError};
use crate::metrics::Metrics;
use crate::types::{DedupKey, ReplayCursor, ReplayTimelineRecord};

/// One untyped event as returned by the external fetcher (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_name: String,
    pub slot: u64,
    pub signature: String,
    pub event: serde_json::Value,
    pub timestamp_ms: Option<u64>,
    pub source_event_sequence: Option<u64>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchPage {
    pub events: Vec<RawEvent>,
    pub next_cursor: Option<ReplayCursor>,
    pub done: bool,
}

/// External fetcher collaborator (§6).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_page(
        &self,
        cursor: Option<&ReplayCursor>,
        to_slot: u64,
        page_size: u32,
    ) -> Result<FetchPage, FetcherError>;
}

/// Projects a raw event into a persisted record. Implementations dispatch
/// on `event_name`; an event name this projector doesn't recognize should
/// make `project` return `None` so the caller can route it to the
/// unknown-event telemetry list instead of failing the whole page.
pub trait EventProjector: Send + Sync {
    fn project(&self, raw: &RawEvent) -> Option<ReplayTimelineRecord>;
}

#[derive(Debug, Clone, Default)]
pub struct BackfillResult {
    pub processed: u64,
    pub duplicates: u64,
    /// Deterministic, capped at `DUPLICATE_KEY_REPORT_LIMIT` across the
    /// whole run, not per page (§4.11).
    pub duplicate_keys: Vec<DedupKey>,
    pub unknown_event_names: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct BackfillConfig {
    pub to_slot: u64,
    pub page_size: u32,
    pub strict_unknown_events: bool,
}

pub struct BackfillService<'a> {
    store: &'a dyn ReplayStore,
    fetcher: &'a dyn Fetcher,
    projector: &'a dyn EventProjector,
    metrics: &'a dyn Metrics,
    alerts: &'a dyn AlertDispatcher,
}

impl<'a> BackfillService<'a> {
    pub fn new(
        store: &'a dyn ReplayStore,
        fetcher: &'a dyn Fetcher,
        projector: &'a dyn EventProjector,
        metrics: &'a dyn Metrics,
        alerts: &'a dyn AlertDispatcher,
    ) -> Self {
        BackfillService {
            store,
            fetcher,
            projector,
            metrics,
            alerts,
        }
    }

    /// Runs one backfill pass to completion (`done == true` from the
    /// fetcher) or until a stall/error terminates it.
    pub async fn run(
        &self,
        config: BackfillConfig,
        resumed_after_failure: bool,
        now_ms: u64,
    ) -> Result<BackfillResult, BackfillError> {
        let mut cursor = self.store.get_cursor().await?;
        let mut result = BackfillResult::default();
        let mut first_save = true;
        let mut resumed_after_failure = resumed_after_failure;

        loop {
            let page = match self
                .fetcher
                .fetch_page(cursor.as_ref(), config.to_slot, config.page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => return Err(BackfillError::Fetcher(e)),
            };

            if resumed_after_failure {
                self.alerts.dispatch(
                    Alert::new("replay.backfill.resume_after_crash", AlertSeverity::Info, AlertKind::TransitionValidation, now_ms)
                        .with_metadata(serde_json::json!({"cursor": cursor.as_ref().map(|c| c.stable_string())})),
                );
                resumed_after_failure = false;
            }

            let page_non_empty = !page.events.is_empty();
            let mut records = Vec::with_capacity(page.events.len());
            for raw in &page.events {
                match self.projector.project(raw) {
                    Some(record) => records.push(record),
                    None if config.strict_unknown_events => {
                        return Err(BackfillError::UnknownEventStrict(raw.event_name.clone()));
                    }
                    None => result.unknown_event_names.push(raw.event_name.clone()),
                }
            }

            if first_save && page_non_empty {
                self.metrics.histogram("replay.backfill.page_size", page.events.len() as f64, &[]);
                first_save = false;
            }

            let save_result = match self.store.save(records).await {
                Ok(r) => r,
                Err(e) => {
                    self.metrics.counter("replay.backfill.store_write_failed", 1.0, &[]);
                    return Err(BackfillError::Store(e));
                }
            };
            result.processed += save_result.inserted as u64;
            result.duplicates += save_result.duplicates as u64;
            for key in save_result.duplicate_keys {
                if result.duplicate_keys.len() >= DUPLICATE_KEY_REPORT_LIMIT {
                    break;
                }
                result.duplicate_keys.push(key);
            }

            let cursor_unchanged = match (&cursor, &page.next_cursor) {
                (Some(prev), Some(next)) => prev.stall_eq(next),
                _ => false,
            };

            if cursor_unchanged && page_non_empty {
                let label = cursor.as_ref().map(|c| c.stable_string()).unwrap_or_default();
                self.alerts.dispatch(
                    Alert::new("replay.backfill.stalled", AlertSeverity::Error, AlertKind::ReplayIngestionLag, now_ms)
                        .with_metadata(serde_json::json!({"cursor": label})),
                );
                return Err(BackfillError::Stalled { cursor: label });
            }

            if let Some(next_cursor) = page.next_cursor.clone() {
                self.store.save_cursor(next_cursor.clone()).await?;
                cursor = Some(next_cursor);
            }

            if page.done {
                break;
            }
        }

        Ok(result)
    }
}
