//! Incident case builder (§4.16/R): turns a projected timeline plus
//! optional anomalies into a deterministic, stable-stringified case record.
//!
//! Grounded on `reasoning/critic_audit.rs`'s pattern of deriving a stable
//! identifier from hashed content (there, chain hashes over entry fields;
//! here, a case id hashed from the trace window and task id) and on this
//! crate's own `canonical` module for the stable serialization the teacher
//! achieves via string-formatted fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::canonical::sha256_hex;
use crate::replay::comparator::Anomaly;
use crate::types::{ReplayTimelineRecord, TaskId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraceWindow {
    pub from_slot: u64,
    pub to_slot: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorInfo {
    pub actor: String,
    pub first_seen_slot: u64,
    pub last_seen_slot: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub seq: u64,
    pub slot: u64,
    pub event_type: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// No error-severity anomalies observed.
    Clean,
    /// At least one error-severity anomaly is attached.
    NeedsReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentCase {
    pub schema_version: u32,
    pub case_id: String,
    pub trace_window: TraceWindow,
    pub transitions: Vec<TransitionEntry>,
    pub actor_map: HashMap<String, ActorInfo>,
    pub anomaly_refs: Vec<Anomaly>,
    pub evidence_hash: String,
    pub case_status: CaseStatus,
}

/// Payload keys scanned for actor identities. Order matters only for
/// which key wins when a payload has more than one (first match kept).
const ACTOR_PAYLOAD_KEYS: &[&str] = &["creator", "worker", "actor"];

pub fn build_case(task_id: TaskId, timeline: &[ReplayTimelineRecord], anomalies: &[Anomaly]) -> IncidentCase {
    let mut ordered: Vec<&ReplayTimelineRecord> = timeline.iter().collect();
    ordered.sort_by_key(|r| (r.slot, r.seq));

    let from_slot = ordered.first().map(|r| r.slot).unwrap_or(0);
    let to_slot = ordered.last().map(|r| r.slot).unwrap_or(0);
    let trace_window = TraceWindow { from_slot, to_slot };

    let mut transitions = Vec::with_capacity(ordered.len());
    let mut actor_map: HashMap<String, ActorInfo> = HashMap::new();

    for record in &ordered {
        transitions.push(TransitionEntry {
            seq: record.seq,
            slot: record.slot,
            event_type: record.source_event_type.clone(),
            status: record.payload.get("status").and_then(|v| v.as_str()).map(|s| s.to_string()),
        });

        for key in ACTOR_PAYLOAD_KEYS {
            if let Some(actor) = record.payload.get(*key).and_then(|v| v.as_str()) {
                actor_map
                    .entry(actor.to_string())
                    .and_modify(|info| {
                        info.first_seen_slot = info.first_seen_slot.min(record.slot);
                        info.last_seen_slot = info.last_seen_slot.max(record.slot);
                    })
                    .or_insert_with(|| ActorInfo {
                        actor: actor.to_string(),
                        first_seen_slot: record.slot,
                        last_seen_slot: record.slot,
                    });
            }
        }
    }

    let mut anomaly_refs = anomalies.to_vec();
    anomaly_refs.sort_by_key(|a| (a.seq, a.code));

    let case_id_input = serde_json::json!({
        "traceWindow": {"fromSlot": trace_window.from_slot, "toSlot": trace_window.to_slot},
        "taskId": task_id.to_string(),
    });
    let case_id = sha256_hex(&case_id_input);

    let evidence_input = serde_json::json!({
        "transitions": transitions,
        "anomalyRefs": anomaly_refs,
    });
    let evidence_hash = sha256_hex(&evidence_input);

    let case_status = if anomaly_refs.iter().any(|a| a.severity == crate::replay::comparator::AnomalySeverity::Error) {
        CaseStatus::NeedsReview
    } else {
        CaseStatus::Clean
    };

    IncidentCase {
        schema_version: 1,
        case_id,
        trace_window,
        transitions,
        actor_map,
        anomaly_refs,
        evidence_hash,
        case_status,
    }
}
