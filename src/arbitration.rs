//! Arbitration (§4.7/I): weighted scoring over candidates with a
//! deterministic tie-break, escalating ahead of selection when candidates
//! disagree past a configured threshold.
//!
//! Grounded on the teacher's `scheduler/policy_gate.rs` priority-sorted
//! rule evaluation for the "compute a score per entity, then pick
//! deterministically" shape, and on `reasoning/circuit_breaker.rs` for the
//! "count against a threshold, flip to a terminal mode" escalation
//! precedence pattern.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::inconsistency::InconsistencyResult;
use crate::types::{ArbitrationDecision, ArbitrationMetadata, Candidate, EscalationReason, RankingEntry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArbitrationWeights {
    pub consistency: f64,
    pub diversity: f64,
    pub confidence: f64,
    pub recency: f64,
}

impl Default for ArbitrationWeights {
    fn default() -> Self {
        ArbitrationWeights {
            consistency: 0.55,
            diversity: 0.2,
            confidence: 0.2,
            recency: 0.05,
        }
    }
}

impl ArbitrationWeights {
    fn renormalized(&self) -> ArbitrationWeights {
        let total = self.consistency + self.diversity + self.confidence + self.recency;
        if total <= 0.0 {
            ArbitrationWeights {
                consistency: 1.0,
                diversity: 0.0,
                confidence: 0.0,
                recency: 0.0,
            }
        } else {
            ArbitrationWeights {
                consistency: self.consistency / total,
                diversity: self.diversity / total,
                confidence: self.confidence / total,
                recency: self.recency / total,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EscalationThresholds {
    pub max_pairwise_disagreements: f64,
    pub max_disagreement_rate: f64,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        EscalationThresholds {
            max_pairwise_disagreements: f64::INFINITY,
            max_disagreement_rate: 1.0,
        }
    }
}

/// FNV-1a 64-bit hash, used only for deterministic tie-breaking -- not a
/// cryptographic hash, and never used in place of `canonical::sha256_hex`.
fn fnv1a_64(s: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn tie_break_unit_float(seed: u64, candidate_id: &str) -> f64 {
    let hash = fnv1a_64(&format!("{seed}:{candidate_id}"));
    hash as f64 / u64::MAX as f64
}

fn disagreement_count_for(result: &InconsistencyResult, candidate_id: &str) -> usize {
    result
        .disagreements
        .iter()
        .filter(|d| d.candidate_a == candidate_id || d.candidate_b == candidate_id)
        .count()
}

/// Selects among `candidates`, or escalates, per §4.7.
pub fn arbitrate(
    candidates: &[Candidate],
    inconsistencies: &InconsistencyResult,
    confidences: &HashMap<String, f64>,
    weights: &ArbitrationWeights,
    thresholds: &EscalationThresholds,
    seed: u64,
) -> ArbitrationDecision {
    let metadata = ArbitrationMetadata {
        total_pairs: inconsistencies.total_pairs,
        total_disagreements: inconsistencies.total_disagreements,
        disagreement_rate: inconsistencies.disagreement_rate,
    };

    if candidates.is_empty() {
        return ArbitrationDecision::Escalate {
            reason: EscalationReason::NoCandidates,
            ranking: Vec::new(),
            metadata,
        };
    }

    let n = candidates.len();
    let weights = weights.renormalized();

    let mut scored: Vec<(f64, &Candidate)> = candidates
        .iter()
        .map(|c| {
            let disagreements = disagreement_count_for(inconsistencies, &c.id);
            let consistency = if n <= 1 {
                1.0
            } else {
                1.0 - (disagreements as f64 / (n - 1) as f64)
            };
            let diversity = c.novelty_score;
            let confidence = confidences.get(&c.id).copied().unwrap_or(0.5);
            let recency = 1.0 / (c.attempt_index.max(1) as f64);
            let score = consistency * weights.consistency
                + diversity * weights.diversity
                + confidence * weights.confidence
                + recency * weights.recency;
            (score, c)
        })
        .collect();

    scored.sort_by(|(score_a, cand_a), (score_b, cand_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let tie_a = tie_break_unit_float(seed, &cand_a.id);
                let tie_b = tie_break_unit_float(seed, &cand_b.id);
                tie_a.partial_cmp(&tie_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| cand_a.id.cmp(&cand_b.id))
    });

    let ranking: Vec<RankingEntry> = scored
        .iter()
        .map(|(score, c)| RankingEntry {
            candidate_id: c.id.clone(),
            score: *score,
        })
        .collect();

    let max_pairwise = thresholds.max_pairwise_disagreements.floor();
    let exceeds_pairwise = (inconsistencies.total_disagreements as f64) >= max_pairwise;
    let exceeds_rate = inconsistencies.disagreement_rate >= thresholds.max_disagreement_rate;

    if exceeds_pairwise || exceeds_rate {
        return ArbitrationDecision::Escalate {
            reason: EscalationReason::DisagreementThreshold,
            ranking,
            metadata,
        };
    }

    let selected = scored[0].1.clone();
    ArbitrationDecision::Selected {
        candidate: selected,
        ranking,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::U256;

    fn candidate(id: &str, attempt: u32, novelty: f64) -> Candidate {
        Candidate {
            id: id.to_string(),
            attempt_index: attempt,
            output: vec![U256::from_u64(1)],
            fingerprint: String::new(),
            novelty_score: novelty,
            token_estimate: 0,
            cumulative_cost_lamports: 0,
        }
    }

    fn empty_inconsistencies() -> InconsistencyResult {
        InconsistencyResult {
            total_pairs: 0,
            total_disagreements: 0,
            disagreement_rate: 0.0,
            disagreements: Vec::new(),
            provenance_links: Vec::new(),
        }
    }

    #[test]
    fn zero_candidates_escalates_no_candidates() {
        let decision = arbitrate(
            &[],
            &empty_inconsistencies(),
            &HashMap::new(),
            &ArbitrationWeights::default(),
            &EscalationThresholds::default(),
            1,
        );
        assert!(matches!(
            decision,
            ArbitrationDecision::Escalate {
                reason: EscalationReason::NoCandidates,
                ..
            }
        ));
    }

    #[test]
    fn single_candidate_is_selected_with_full_consistency() {
        let candidates = vec![candidate("a", 1, 0.5)];
        let decision = arbitrate(
            &candidates,
            &empty_inconsistencies(),
            &HashMap::new(),
            &ArbitrationWeights::default(),
            &EscalationThresholds::default(),
            1,
        );
        match decision {
            ArbitrationDecision::Selected {
                candidate, metadata, ..
            } => {
                assert_eq!(candidate.id, "a");
                assert_eq!(metadata.total_disagreements, 0);
            }
            other => panic!("expected Selected, got {other:?}"),
        }
    }

    #[test]
    fn escalates_when_disagreement_count_meets_threshold() {
        let candidates = vec![candidate("a", 1, 0.5), candidate("b", 1, 0.5)];
        let inconsistencies = InconsistencyResult {
            total_pairs: 1,
            total_disagreements: 1,
            disagreement_rate: 1.0,
            disagreements: vec![crate::inconsistency::Disagreement {
                candidate_a: "a".to_string(),
                candidate_b: "b".to_string(),
                semantic_distance: 1.0,
                reasons: vec![crate::types::DisagreementReason::ValueMismatch],
                provenance_edge_ids: vec![],
            }],
            provenance_links: vec![],
        };
        let thresholds = EscalationThresholds {
            max_pairwise_disagreements: 1.0,
            max_disagreement_rate: 2.0,
        };
        let decision = arbitrate(
            &candidates,
            &inconsistencies,
            &HashMap::new(),
            &ArbitrationWeights::default(),
            &thresholds,
            1,
        );
        assert!(matches!(
            decision,
            ArbitrationDecision::Escalate {
                reason: EscalationReason::DisagreementThreshold,
                ..
            }
        ));
    }

    #[test]
    fn decision_is_invariant_under_swapping_input_order() {
        let a = vec![candidate("a", 1, 0.7), candidate("b", 1, 0.3)];
        let b = vec![candidate("b", 1, 0.3), candidate("a", 1, 0.7)];
        let decision_a = arbitrate(
            &a,
            &empty_inconsistencies(),
            &HashMap::new(),
            &ArbitrationWeights::default(),
            &EscalationThresholds::default(),
            7,
        );
        let decision_b = arbitrate(
            &b,
            &empty_inconsistencies(),
            &HashMap::new(),
            &ArbitrationWeights::default(),
            &EscalationThresholds::default(),
            7,
        );
        let id_a = match decision_a {
            ArbitrationDecision::Selected { candidate, .. } => candidate.id,
            _ => panic!("expected selection"),
        };
        let id_b = match decision_b {
            ArbitrationDecision::Selected { candidate, .. } => candidate.id,
            _ => panic!("expected selection"),
        };
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn tie_break_is_deterministic_across_runs() {
        let candidates = vec![candidate("a", 1, 0.5), candidate("b", 1, 0.5)];
        let decision_1 = arbitrate(
            &candidates,
            &empty_inconsistencies(),
            &HashMap::new(),
            &ArbitrationWeights::default(),
            &EscalationThresholds::default(),
            42,
        );
        let decision_2 = arbitrate(
            &candidates,
            &empty_inconsistencies(),
            &HashMap::new(),
            &ArbitrationWeights::default(),
            &EscalationThresholds::default(),
            42,
        );
        let id_1 = match decision_1 {
            ArbitrationDecision::Selected { candidate, .. } => candidate.id,
            _ => panic!("expected selection"),
        };
        let id_2 = match decision_2 {
            ArbitrationDecision::Selected { candidate, .. } => candidate.id,
            _ => panic!("expected selection"),
        };
        assert_eq!(id_1, id_2);
    }

    #[test]
    fn zero_weight_sum_falls_back_to_pure_consistency() {
        let weights = ArbitrationWeights {
            consistency: 0.0,
            diversity: 0.0,
            confidence: 0.0,
            recency: 0.0,
        };
        let renormalized = weights.renormalized();
        assert_eq!(renormalized.consistency, 1.0);
        assert_eq!(renormalized.diversity, 0.0);
    }
}
