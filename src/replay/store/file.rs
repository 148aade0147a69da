//! Whole-file JSON replay store: rewrites the entire snapshot on every
//! save, acceptable up to ~512 MiB (§4.10). Writes are atomic (tempfile +
//! rename), mirroring the teacher's `metrics/file.rs::FileExporter`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{IngestState, ReplayStore};
use crate::error::StoreError;
use crate::replay::{CompactionConfig, ReplayFilter, RetentionConfig, SaveResult};
use crate::types::{ReplayCursor, ReplayTimelineRecord};

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileSnapshot {
    records: Vec<ReplayTimelineRecord>,
    cursor: Option<ReplayCursor>,
}

pub struct FileReplayStore {
    path: PathBuf,
    state: Mutex<(IngestState, Option<ReplayCursor>)>,
    retention: RetentionConfig,
    compaction: CompactionConfig,
}

impl FileReplayStore {
    pub async fn open(
        path: impl Into<PathBuf>,
        retention: RetentionConfig,
        compaction: CompactionConfig,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot = Self::load(&path).await?;
        let mut ingest = IngestState::new();
        ingest.records = snapshot.records;
        ingest.rebuild_dedup();
        Ok(FileReplayStore {
            path,
            state: Mutex::new((ingest, snapshot.cursor)),
            retention,
            compaction,
        })
    }

    async fn load(path: &Path) -> Result<FileSnapshot, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) if content.trim().is_empty() => Ok(FileSnapshot::default()),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileSnapshot::default()),
            Err(e) => Err(StoreError::WriteFailed(e.to_string())),
        }
    }

    async fn persist(&self, ingest: &IngestState, cursor: &Option<ReplayCursor>) -> Result<(), StoreError> {
        let snapshot = FileSnapshot {
            records: ingest.records.clone(),
            cursor: cursor.clone(),
        };
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            use std::io::Write;
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(parent).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
            let mut tmp = tempfile::NamedTempFile::new_in(parent)
                .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
            tmp.write_all(json.as_bytes())
                .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
            tmp.flush().map_err(|e| StoreError::WriteFailed(e.to_string()))?;
            tmp.persist(&path)
                .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::WriteFailed(format!("blocking task panicked: {e}")))?
    }
}

#[async_trait]
impl ReplayStore for FileReplayStore {
    async fn save(&self, records: Vec<ReplayTimelineRecord>) -> Result<SaveResult, StoreError> {
        let now_ms = records.iter().map(|r| r.timestamp_ms).max().unwrap_or(0);
        let mut guard = self.state.lock().await;
        let result = guard.0.ingest(records, &self.retention, &self.compaction, now_ms)?;
        if result.inserted > 0 {
            self.persist(&guard.0, &guard.1).await?;
        }
        Ok(result)
    }

    async fn query(&self, filter: &ReplayFilter) -> Result<Vec<ReplayTimelineRecord>, StoreError> {
        Ok(self.state.lock().await.0.query(filter))
    }

    async fn get_cursor(&self) -> Result<Option<ReplayCursor>, StoreError> {
        Ok(self.state.lock().await.1.clone())
    }

    async fn save_cursor(&self, cursor: ReplayCursor) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        guard.1 = Some(cursor);
        self.persist(&guard.0, &guard.1).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        guard.0 = IngestState::new();
        guard.1 = None;
        self.persist(&guard.0, &guard.1).await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let guard = self.state.lock().await;
        self.persist(&guard.0, &guard.1).await
    }
}
