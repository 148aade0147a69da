//! In-memory replay store. Suitable for tests and small, short-lived runs;
//! advisory cap ~1M records (§4.10).

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{IngestState, ReplayStore};
use crate::error::StoreError;
use crate::replay::{CompactionConfig, ReplayFilter, RetentionConfig, SaveResult};
use crate::types::ReplayCursor;

pub struct InMemoryReplayStore {
    state: Mutex<IngestState>,
    cursor: Mutex<Option<ReplayCursor>>,
    retention: RetentionConfig,
    compaction: CompactionConfig,
}

impl InMemoryReplayStore {
    pub fn new(retention: RetentionConfig, compaction: CompactionConfig) -> Self {
        InMemoryReplayStore {
            state: Mutex::new(IngestState::new()),
            cursor: Mutex::new(None),
            retention,
            compaction,
        }
    }
}

impl Default for InMemoryReplayStore {
    fn default() -> Self {
        Self::new(RetentionConfig::default(), CompactionConfig::default())
    }
}

#[async_trait]
impl ReplayStore for InMemoryReplayStore {
    async fn save(
        &self,
        records: Vec<crate::types::ReplayTimelineRecord>,
    ) -> Result<SaveResult, StoreError> {
        let now_ms = records.iter().map(|r| r.timestamp_ms).max().unwrap_or(0);
        let mut state = self.state.lock();
        state.ingest(records, &self.retention, &self.compaction, now_ms)
    }

    async fn query(
        &self,
        filter: &ReplayFilter,
    ) -> Result<Vec<crate::types::ReplayTimelineRecord>, StoreError> {
        Ok(self.state.lock().query(filter))
    }

    async fn get_cursor(&self) -> Result<Option<ReplayCursor>, StoreError> {
        Ok(self.cursor.lock().clone())
    }

    async fn save_cursor(&self, cursor: ReplayCursor) -> Result<(), StoreError> {
        *self.cursor.lock() = Some(cursor);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.state.lock() = IngestState::new();
        *self.cursor.lock() = None;
        Ok(())
    }
}
