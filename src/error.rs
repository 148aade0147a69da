//! Error taxonomy for the task-execution and verification pipeline.

use thiserror::Error;

use crate::types::{CandidateId, TaskId};

/// Top-level error type returned by any public entry point in this crate.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("verifier lane error: {0}")]
    VerifierLane(#[from] VerifierLaneError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("fetcher error: {0}")]
    Fetcher(#[from] FetcherError),

    #[error("backfill error: {0}")]
    Backfill(#[from] BackfillError),

    #[error("replay anomaly: {0}")]
    ReplayAnomaly(#[from] ReplayAnomalyError),

    #[error("chain client error: {0}")]
    ChainClient(#[from] ChainClientError),

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Malformed config or input. Surfaced immediately, never recoverable.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("field {field}: {reason}")]
    Field { field: String, reason: String },

    #[error("{0} validation error(s)")]
    Multiple(usize),
}

/// Quota or role check failed. Carries enough to reconstruct the refusal.
#[derive(Error, Debug, Clone)]
pub enum PolicyError {
    #[error("policy violation: actor={actor} action={action} rule={rule} remaining={remaining}")]
    Violation {
        actor: String,
        action: String,
        rule: String,
        remaining: i64,
    },

    #[error("circuit breaker open: mode={mode}")]
    CircuitOpen { mode: String },

    #[error("risk ceiling exceeded: score={score} max={max}")]
    RiskCeilingExceeded { score: f64, max: f64 },
}

/// Terminal non-pass outcome from the verifier lane.
#[derive(Error, Debug, Clone)]
pub enum VerifierLaneError {
    #[error("verifier lane escalated: reason={reason} attempts={attempts} revisions={revisions}")]
    Escalation {
        reason: String,
        attempts: u32,
        revisions: u32,
        details: String,
    },
}

/// I/O errors during replay persistence.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store write failed: {0}")]
    WriteFailed(String),

    #[error("store is corrupt: {0}")]
    Corrupt(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("projection hash mismatch for seq {seq}")]
    ProjectionHashMismatch { seq: u64 },
}

/// Errors surfaced by the external fetcher collaborator.
#[derive(Error, Debug, Clone)]
pub enum FetcherError {
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("unknown event name: {0}")]
    UnknownEventName(String),
}

/// Errors from the backfill loop (§4.11/M).
#[derive(Error, Debug, Clone)]
pub enum BackfillError {
    #[error("backfill stalled: cursor did not advance past {cursor}")]
    Stalled { cursor: String },

    #[error("unknown event name in strict mode: {0}")]
    UnknownEventStrict(String),

    #[error(transparent)]
    Fetcher(#[from] FetcherError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A detected replay anomaly, promoted to an error only when a caller opts
/// into strict-mode raising (normally a structured record, see §4.12/N).
#[derive(Error, Debug, Clone)]
pub enum ReplayAnomalyError {
    #[error("{count} anomal{plural} detected during comparison")]
    Detected { count: usize, plural: &'static str },
}

/// Errors from the external chain-client collaborator.
#[derive(Error, Debug, Clone)]
pub enum ChainClientError {
    #[error("chain client call failed: {0}")]
    CallFailed(String),

    #[error("chain client exhausted retries after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Audit-trail errors. Chain-integrity failures are never locally recovered.
#[derive(Error, Debug, Clone)]
pub enum AuditError {
    #[error("chain integrity violation at seq {seq}: {reason}")]
    ChainIntegrity { seq: u64, reason: String },

    #[error("audit append failed: {0}")]
    AppendFailed(String),
}

/// Result alias used throughout the crate.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl VerifierLaneError {
    pub fn escalation(reason: impl Into<String>, attempts: u32, revisions: u32) -> Self {
        VerifierLaneError::Escalation {
            reason: reason.into(),
            attempts,
            revisions,
            details: String::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        if let VerifierLaneError::Escalation { details: d, .. } = &mut self {
            *d = details.into();
        }
        self
    }
}

/// Helper to phrase a task/candidate pair into a stable diagnostic string,
/// used by several escalation and incident paths.
pub fn task_candidate_label(task_id: &TaskId, candidate_id: &CandidateId) -> String {
    format!("{task_id}/{candidate_id}")
}
