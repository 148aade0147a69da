//! Core value types shared across the verifier lane, arbitration, replay,
//! policy, and audit subsystems. All entities here are value types; the
//! owning subsystem is responsible for any mutation (see DESIGN.md).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable 32-byte task identifier, hex-encoded when displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub [u8; 32]);

impl TaskId {
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Some(TaskId(arr))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A candidate identifier, `cand-{attempt}` by convention (see §4.5/G).
pub type CandidateId = String;

/// A 256-bit unsigned integer, the unit of a candidate's output sequence.
/// Stored as four little-endian `u64` limbs. Only equality, hashing, and
/// canonical (decimal-string) serialization are needed — candidate output
/// values are opaque to this crate, produced and compared by the executor
/// and verifier collaborators, never arithmetically combined here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct U256(pub [u64; 4]);

impl U256 {
    pub fn from_u64(v: u64) -> Self {
        U256([v, 0, 0, 0])
    }

    /// Decimal string representation, used by canonical JSON (§4.1/A).
    pub fn to_decimal_string(&self) -> String {
        let mut limbs = self.0;
        if limbs.iter().all(|&l| l == 0) {
            return "0".to_string();
        }
        let mut digits = Vec::new();
        while limbs.iter().any(|&l| l != 0) {
            let mut remainder: u128 = 0;
            for limb in limbs.iter_mut().rev() {
                let acc = (remainder << 64) | (*limb as u128);
                *limb = (acc / 10) as u64;
                remainder = acc % 10;
            }
            digits.push(b'0' + remainder as u8);
        }
        digits.reverse();
        String::from_utf8(digits).expect("ascii digits")
    }
}

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut limbs = [0u64; 4];
        for c in s.chars() {
            let digit = c.to_digit(10).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid decimal digit in U256: {c}"))
            })? as u128;
            let mut carry = digit;
            for limb in limbs.iter_mut() {
                let acc = (*limb as u128) * 10 + carry;
                *limb = acc as u64;
                carry = acc >> 64;
            }
        }
        Ok(U256(limbs))
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

/// Required-capability bitmask, matching the coordination substrate's
/// existing capability constants (compute, inference, storage, …). Plain
/// constants rather than a bitflags type: this crate never combines or
/// tests capability bits itself, only carries the mask on `Task`.
pub mod capability {
    pub const COMPUTE: u64 = 1 << 0;
    pub const INFERENCE: u64 = 1 << 1;
    pub const STORAGE: u64 = 1 << 2;
    pub const NETWORK: u64 = 1 << 3;
    pub const SENSOR: u64 = 1 << 4;
    pub const ACTUATOR: u64 = 1 << 5;
    pub const COORDINATOR: u64 = 1 << 6;
    pub const ARBITER: u64 = 1 << 7;
    pub const VALIDATOR: u64 = 1 << 8;
    pub const AGGREGATOR: u64 = 1 << 9;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Exclusive,
    Collaborative,
    Competitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    PendingValidation,
    Completed,
    Cancelled,
    Disputed,
}

/// External work item. Immutable within a verifier-lane invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub creator: String,
    pub required_capabilities: u64,
    pub reward_lamports: u64,
    /// Seconds; 0 means no deadline.
    pub deadline_secs: u64,
    pub max_workers: u32,
    pub current_claims: u32,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub constraint_hash: Option<[u8; 32]>,
}

/// Six scalars in [0,1], derived from a `Task` + runtime context. Never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFeatureVector {
    pub reward: f64,
    pub deadline_pressure: f64,
    pub claim_pressure: f64,
    pub task_type_intrinsic_risk: f64,
    pub historical_verifier_disagreement_rate: f64,
    pub historical_rollback_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

/// Derived from risk tier, guardrails, and policy (§4.4/F).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationBudget {
    pub max_retries: u32,
    pub max_duration_ms: u64,
    pub min_confidence: f64,
}

/// One attempt's output plus provenance metadata (§4.5/G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub attempt_index: u32,
    pub output: Vec<U256>,
    pub fingerprint: String,
    pub novelty_score: f64,
    pub token_estimate: u64,
    pub cumulative_cost_lamports: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementReason {
    LengthMismatch,
    ValueMismatch,
    SemanticDistance,
}

/// An unordered pair of candidates that disagree (§4.6/H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disagreement {
    pub candidate_a: CandidateId,
    pub candidate_b: CandidateId,
    pub semantic_distance: f64,
    pub reasons: Vec<DisagreementReason>,
    pub provenance_edge_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    NoCandidates,
    DisagreementThreshold,
}

/// Ranking entry: candidate id plus its arbitration score, in descending
/// score order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingEntry {
    pub candidate_id: CandidateId,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArbitrationMetadata {
    pub total_pairs: usize,
    pub total_disagreements: usize,
    pub disagreement_rate: f64,
}

/// Discriminated union result of arbitration (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum ArbitrationDecision {
    Selected {
        candidate: Candidate,
        ranking: Vec<RankingEntry>,
        metadata: ArbitrationMetadata,
    },
    Escalate {
        reason: EscalationReason,
        ranking: Vec<RankingEntry>,
        metadata: ArbitrationMetadata,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    NeedsRevision,
}

/// Produced by the external verifier collaborator (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierOutcome {
    pub verdict: Verdict,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

impl VerifierOutcome {
    /// Confidence outside [0,1] is clamped, per §6.
    pub fn clamped(verdict: Verdict, confidence: f64, reasons: Vec<String>) -> Self {
        VerifierOutcome {
            verdict,
            confidence: confidence.clamp(0.0, 1.0),
            reasons,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStateKind {
    Pass,
    Retry,
    Revise,
    Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReasonCode {
    RetryAllowed,
    NeedsRevision,
    RetriesExhausted,
    RevisionUnavailable,
    DisagreementThreshold,
    Timeout,
    PolicyDenied,
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    pub state: EscalationStateKind,
    pub reason: EscalationReasonCode,
}

/// `{slot, signature, sourceEventType}` composite dedup key (§4.10/L).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub slot: u64,
    pub signature: String,
    pub source_event_type: String,
}

/// One persisted replay event (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayTimelineRecord {
    pub seq: u64,
    pub source_event_name: String,
    pub source_event_type: String,
    pub source_event_sequence: Option<u64>,
    pub task_id: TaskId,
    pub timestamp_ms: u64,
    pub slot: u64,
    pub signature: String,
    pub payload: serde_json::Value,
    pub projection_hash: String,
    pub dispute_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

/// `{slot, signature, eventName[, traceId, spanId]}` replay position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayCursor {
    pub slot: u64,
    pub signature: String,
    pub event_name: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl ReplayCursor {
    pub fn stable_string(&self) -> String {
        match (&self.trace_id, &self.span_id) {
            (Some(t), Some(s)) => {
                format!("{}:{}:{}:{}:{}", self.slot, self.signature, self.event_name, t, s)
            }
            _ => format!("{}:{}:{}", self.slot, self.signature, self.event_name),
        }
    }

    /// Equality used for stall detection: trace fields are ignored per the
    /// design notes (§9) — retained to avoid false-positive stalls on
    /// trace-id drift.
    pub fn stall_eq(&self, other: &ReplayCursor) -> bool {
        self.slot == other.slot
            && self.signature == other.signature
            && self.event_name == other.event_name
    }
}

/// One append-only audit entry (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub actor: String,
    pub role: String,
    pub action: String,
    pub permission: String,
    pub timestamp_ms: u64,
    pub input_hash: String,
    pub output_hash: String,
    pub prev_hash: String,
    pub entry_hash: String,
    pub metadata: Option<serde_json::Value>,
}

/// `{actionKey, windowMs, timestamps[]}` sliding-window bucket (§4.13/O).
#[derive(Debug, Clone, Default)]
pub struct PolicyBucket {
    pub action_key: String,
    pub window_ms: u64,
    pub timestamps_ms: Vec<u64>,
}

impl PolicyBucket {
    pub fn new(action_key: impl Into<String>, window_ms: u64) -> Self {
        PolicyBucket {
            action_key: action_key.into(),
            window_ms,
            timestamps_ms: Vec::new(),
        }
    }

    /// Drop timestamps older than `now - windowMs`, lazily.
    pub fn prune(&mut self, now_ms: u64) {
        let floor = now_ms.saturating_sub(self.window_ms);
        self.timestamps_ms.retain(|&t| t >= floor);
    }
}
