//! SQLite-backed replay store, feature-gated behind `sql-store`. Advisory
//! cap ~10 GiB (§4.10).
//!
//! Grounded directly on the teacher's `scheduler/job_store.rs::SqliteJobStore`:
//! same `tokio::sync::Mutex<rusqlite::Connection>` shape, WAL pragma on
//! open, schema created before the connection is wrapped in the mutex, and
//! row-mapping helper functions separate from the trait impl.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use super::{IngestState, ReplayStore};
use crate::canonical::sha256_hex;
use crate::error::StoreError;
use crate::replay::{sort_for_output, CompactionConfig, ReplayFilter, RetentionConfig, SaveResult};
use crate::types::{ReplayCursor, ReplayTimelineRecord, TaskId};

pub struct SqliteReplayStore {
    conn: Mutex<rusqlite::Connection>,
    retention: RetentionConfig,
    compaction: CompactionConfig,
}

impl SqliteReplayStore {
    pub fn open(
        path: &Path,
        retention: RetentionConfig,
        compaction: CompactionConfig,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        }
        let conn = rusqlite::Connection::open(path).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(SqliteReplayStore {
            conn: Mutex::new(conn),
            retention,
            compaction,
        })
    }

    pub fn open_in_memory(
        retention: RetentionConfig,
        compaction: CompactionConfig,
    ) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(SqliteReplayStore {
            conn: Mutex::new(conn),
            retention,
            compaction,
        })
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS replay_records (
                seq INTEGER PRIMARY KEY,
                source_event_name TEXT NOT NULL,
                source_event_type TEXT NOT NULL,
                source_event_sequence INTEGER,
                task_id TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                slot INTEGER NOT NULL,
                signature TEXT NOT NULL,
                payload TEXT NOT NULL,
                projection_hash TEXT NOT NULL,
                dispute_id TEXT,
                trace_id TEXT,
                span_id TEXT,
                UNIQUE(slot, signature, source_event_type)
            );
            CREATE TABLE IF NOT EXISTS replay_cursor (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                slot INTEGER NOT NULL,
                signature TEXT NOT NULL,
                event_name TEXT NOT NULL,
                trace_id TEXT,
                span_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_replay_records_task ON replay_records(task_id);
            CREATE INDEX IF NOT EXISTS idx_replay_records_dispute ON replay_records(dispute_id);",
        )
        .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    fn load_all(conn: &rusqlite::Connection) -> Result<Vec<ReplayTimelineRecord>, StoreError> {
        let mut stmt = conn
            .prepare(
                "SELECT seq, source_event_name, source_event_type, source_event_sequence,
                        task_id, timestamp_ms, slot, signature, payload, projection_hash,
                        dispute_id, trace_id, span_id
                 FROM replay_records",
            )
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| StoreError::WriteFailed(e.to_string()))??);
        }
        Ok(records)
    }

    fn rewrite_all(conn: &rusqlite::Connection, records: &[ReplayTimelineRecord]) -> Result<(), StoreError> {
        conn.execute("DELETE FROM replay_records", [])
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        for r in records {
            insert_record(conn, r)?;
        }
        Ok(())
    }
}

fn insert_record(conn: &rusqlite::Connection, r: &ReplayTimelineRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO replay_records
            (seq, source_event_name, source_event_type, source_event_sequence, task_id,
             timestamp_ms, slot, signature, payload, projection_hash, dispute_id, trace_id, span_id)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
        params![
            r.seq,
            r.source_event_name,
            r.source_event_type,
            r.source_event_sequence,
            r.task_id.to_string(),
            r.timestamp_ms,
            r.slot,
            r.signature,
            serde_json::to_string(&r.payload).map_err(|e| StoreError::WriteFailed(e.to_string()))?,
            r.projection_hash,
            r.dispute_id,
            r.trace_id,
            r.span_id,
        ],
    )
    .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ReplayTimelineRecord, StoreError>> {
    let seq: u64 = row.get(0)?;
    let source_event_name: String = row.get(1)?;
    let source_event_type: String = row.get(2)?;
    let source_event_sequence: Option<u64> = row.get(3)?;
    let task_id_str: String = row.get(4)?;
    let timestamp_ms: u64 = row.get(5)?;
    let slot: u64 = row.get(6)?;
    let signature: String = row.get(7)?;
    let payload_str: String = row.get(8)?;
    let projection_hash: String = row.get(9)?;
    let dispute_id: Option<String> = row.get(10)?;
    let trace_id: Option<String> = row.get(11)?;
    let span_id: Option<String> = row.get(12)?;

    Ok((|| -> Result<ReplayTimelineRecord, StoreError> {
        let task_id = TaskId::from_hex(&task_id_str)
            .ok_or_else(|| StoreError::Corrupt(format!("bad task_id hex: {task_id_str}")))?;
        let payload = serde_json::from_str(&payload_str)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(ReplayTimelineRecord {
            seq,
            source_event_name,
            source_event_type,
            source_event_sequence,
            task_id,
            timestamp_ms,
            slot,
            signature,
            payload,
            projection_hash,
            dispute_id,
            trace_id,
            span_id,
        })
    })())
}

#[async_trait]
impl ReplayStore for SqliteReplayStore {
    async fn save(&self, records: Vec<ReplayTimelineRecord>) -> Result<SaveResult, StoreError> {
        let now_ms = records.iter().map(|r| r.timestamp_ms).max().unwrap_or(0);
        let conn = self.conn.lock().await;

        let mut existing = Self::load_all(&conn)?;
        let mut ingest = IngestState::new();
        ingest.records = std::mem::take(&mut existing);
        ingest.rebuild_dedup();

        let result = ingest.ingest(records, &self.retention, &self.compaction, now_ms)?;
        if result.inserted > 0 {
            Self::rewrite_all(&conn, &ingest.records)?;
        }
        Ok(result)
    }

    async fn query(&self, filter: &ReplayFilter) -> Result<Vec<ReplayTimelineRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut records = Self::load_all(&conn)?;
        sort_for_output(&mut records);
        let mut ingest = IngestState::new();
        ingest.records = records;
        Ok(ingest.query(filter))
    }

    async fn get_cursor(&self) -> Result<Option<ReplayCursor>, StoreError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                "SELECT slot, signature, event_name, trace_id, span_id FROM replay_cursor WHERE id = 0",
                [],
                |row| {
                    Ok(ReplayCursor {
                        slot: row.get(0)?,
                        signature: row.get(1)?,
                        event_name: row.get(2)?,
                        trace_id: row.get(3)?,
                        span_id: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Ok(result)
    }

    async fn save_cursor(&self, cursor: ReplayCursor) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO replay_cursor (id, slot, signature, event_name, trace_id, span_id)
             VALUES (0, ?1, ?2, ?3, ?4, ?5)",
            params![cursor.slot, cursor.signature, cursor.event_name, cursor.trace_id, cursor.span_id],
        )
        .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM replay_records", [])
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        conn.execute("DELETE FROM replay_cursor", [])
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}
