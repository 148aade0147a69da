//! Role matrix & audit trail (§4.15/Q): explicit per-(role, command) allow
//! table plus a hash-chained append-only audit log.
//!
//! Grounded on the teacher's `reasoning/critic_audit.rs::AuditChain` for the
//! chain shape (genesis hash, `prevHash`/`entryHash` per entry, forward
//! `verify()`) — dropped here is the Ed25519 signature, since §4.15 defines
//! integrity purely through the hash chain, not signing.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::canonical::sha256_hex;
use crate::error::AuditError;
use crate::types::AuditEntry;

/// Genesis `prevHash` for an empty chain: 64 hex zeros (§4.15).
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Read,
    Investigate,
    Execute,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandCategory {
    ReplayBackfill,
    ReplayCompare,
    ReplayIncident,
    ReplayExport,
    IncidentAnnotate,
    IncidentResolve,
    IncidentArchive,
    ConfigUpdate,
    PolicyUpdate,
}

/// Explicit (role, command) lookup table; no inheritance at call-time, so
/// every cell in the lattice is spelled out rather than derived from role
/// ordering.
pub struct RoleMatrix {
    allowed: HashMap<(Role, CommandCategory), bool>,
}

impl RoleMatrix {
    pub fn standard() -> Self {
        use CommandCategory::*;
        use Role::*;

        let read_only = [ReplayCompare];
        let investigate_only = [ReplayIncident, ReplayExport, IncidentAnnotate];
        let execute_only = [ReplayBackfill, IncidentResolve];

        let mut allowed = HashMap::new();
        let all_commands = [
            ReplayBackfill,
            ReplayCompare,
            ReplayIncident,
            ReplayExport,
            IncidentAnnotate,
            IncidentResolve,
            IncidentArchive,
            ConfigUpdate,
            PolicyUpdate,
        ];
        let all_roles = [Read, Investigate, Execute, Admin];

        for role in all_roles {
            for command in all_commands {
                let permitted = match role {
                    Read => read_only.contains(&command),
                    Investigate => read_only.contains(&command) || investigate_only.contains(&command),
                    Execute => {
                        read_only.contains(&command) || investigate_only.contains(&command) || execute_only.contains(&command)
                    }
                    Admin => true,
                };
                allowed.insert((role, command), permitted);
            }
        }

        RoleMatrix { allowed }
    }

    pub fn is_allowed(&self, role: Role, command: CommandCategory) -> bool {
        self.allowed.get(&(role, command)).copied().unwrap_or(false)
    }
}

/// Append-only, hash-chained audit trail (§4.15).
pub struct AuditTrail {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        AuditTrail {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Appends `entry`, filling in `seq`, `prevHash`, and `entryHash`.
    /// Caller supplies everything else.
    pub fn append(&self, mut entry: AuditEntry) -> AuditEntry {
        let mut entries = self.entries.lock();
        let seq = entries.len() as u64 + 1;
        let prev_hash = entries.last().map(|e| e.entry_hash.clone()).unwrap_or_else(|| GENESIS_HASH.to_string());

        entry.seq = seq;
        entry.prev_hash = prev_hash;
        entry.entry_hash = String::new();
        entry.entry_hash = entry_hash_of(&entry);

        entries.push(entry.clone());
        entry
    }

    /// Reconstructs a trail from previously-persisted entries, trusting
    /// their stored `prevHash`/`entryHash` rather than recomputing them —
    /// the counterpart to `entries()` for a process restart. Use `verify()`
    /// afterwards to detect tampering that happened while persisted.
    pub fn from_entries(entries: Vec<AuditEntry>) -> Self {
        AuditTrail {
            entries: Mutex::new(entries),
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Walks the chain forward, recomputing `prevHash`/`entryHash` at every
    /// step. Collects every discrepancy rather than stopping at the first.
    pub fn verify(&self) -> VerificationReport {
        let entries = self.entries.lock();
        let mut errors = Vec::new();
        let mut expected_prev = GENESIS_HASH.to_string();

        for entry in entries.iter() {
            if entry.prev_hash != expected_prev {
                errors.push(AuditError::ChainIntegrity {
                    seq: entry.seq,
                    reason: format!("expected prevHash {}, found {}", expected_prev, entry.prev_hash),
                });
            }
            let recomputed = entry_hash_of(entry);
            if entry.entry_hash != recomputed {
                errors.push(AuditError::ChainIntegrity {
                    seq: entry.seq,
                    reason: format!("expected entryHash {}, found {}", recomputed, entry.entry_hash),
                });
            }
            expected_prev = entry.entry_hash.clone();
        }

        VerificationReport {
            valid: errors.is_empty(),
            entries_verified: entries.len(),
            errors,
        }
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub valid: bool,
    pub errors: Vec<AuditError>,
    pub entries_verified: usize,
}

fn entry_hash_of(entry: &AuditEntry) -> String {
    let mut value = serde_json::to_value(entry).expect("AuditEntry always serializes");
    if let serde_json::Value::Object(map) = &mut value {
        map.remove("entry_hash");
    }
    sha256_hex(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(actor: &str, action: &str, ts: u64) -> AuditEntry {
        AuditEntry {
            seq: 0,
            actor: actor.to_string(),
            role: "execute".to_string(),
            action: action.to_string(),
            permission: "allow".to_string(),
            timestamp_ms: ts,
            input_hash: "ih".to_string(),
            output_hash: "oh".to_string(),
            prev_hash: String::new(),
            entry_hash: String::new(),
            metadata: None,
        }
    }

    #[test]
    fn first_entry_chains_to_genesis() {
        let trail = AuditTrail::new();
        let appended = trail.append(entry("alice", "replay.backfill", 0));
        assert_eq!(appended.seq, 1);
        assert_eq!(appended.prev_hash, GENESIS_HASH);
        assert!(!appended.entry_hash.is_empty());
    }

    #[test]
    fn second_entry_chains_to_first() {
        let trail = AuditTrail::new();
        let first = trail.append(entry("alice", "replay.backfill", 0));
        let second = trail.append(entry("bob", "replay.compare", 1));
        assert_eq!(second.seq, 2);
        assert_eq!(second.prev_hash, first.entry_hash);
    }

    #[test]
    fn from_entries_round_trips_through_verify() {
        let trail = AuditTrail::new();
        for i in 0..3 {
            trail.append(entry("alice", "replay.compare", i));
        }
        let reloaded = AuditTrail::from_entries(trail.entries());
        assert!(reloaded.verify().valid);
    }

    #[test]
    fn from_entries_detects_tampering_that_happened_while_persisted() {
        let trail = AuditTrail::new();
        for i in 0..3 {
            trail.append(entry("alice", "replay.compare", i));
        }
        let mut persisted = trail.entries();
        persisted[1].action = "tampered.action".to_string();

        let reloaded = AuditTrail::from_entries(persisted);
        let report = reloaded.verify();
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| matches!(e, AuditError::ChainIntegrity { seq, .. } if *seq == 2)));
    }

    #[test]
    fn verify_succeeds_on_untampered_chain() {
        let trail = AuditTrail::new();
        for i in 0..5 {
            trail.append(entry("alice", "replay.compare", i));
        }
        let report = trail.verify();
        assert!(report.valid);
        assert_eq!(report.entries_verified, 5);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn verify_detects_tampered_entry_hash() {
        let trail = AuditTrail::new();
        trail.append(entry("alice", "replay.compare", 0));
        trail.append(entry("bob", "replay.backfill", 1));
        {
            let mut entries = trail.entries.lock();
            entries[0].entry_hash = "tampered".to_string();
        }
        let report = trail.verify();
        assert!(!report.valid);
        assert!(!report.errors.is_empty());
    }

    #[test]
    fn empty_chain_verifies() {
        let trail = AuditTrail::new();
        let report = trail.verify();
        assert!(report.valid);
        assert_eq!(report.entries_verified, 0);
    }

    #[test]
    fn role_matrix_has_explicit_entries_for_every_pair_with_no_inheritance_surprise() {
        let matrix = RoleMatrix::standard();
        assert!(matrix.is_allowed(Role::Read, CommandCategory::ReplayCompare));
        assert!(!matrix.is_allowed(Role::Read, CommandCategory::ReplayBackfill));
        assert!(matrix.is_allowed(Role::Execute, CommandCategory::ReplayBackfill));
        assert!(!matrix.is_allowed(Role::Execute, CommandCategory::ConfigUpdate));
        assert!(matrix.is_allowed(Role::Admin, CommandCategory::ConfigUpdate));
    }
}
