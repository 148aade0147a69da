//! Inconsistency detector (§4.6/H): pairwise structural and semantic
//! distance between candidates, plus the provenance graph that links
//! disagreeing candidates.
//!
//! Grounded on the teacher's `critic_audit.rs` chain-verification walk
//! (`verify_chain`), which is the closest teacher analog of "iterate a
//! structure pairwise/sequentially, accumulate a typed reason list, and
//! report a structured result" — generalized from a linear chain walk into
//! an all-pairs comparison. The provenance graph follows the design notes'
//! "adjacency lists keyed by scoped ids, edges hold ids not pointers" rule
//! directly (SPEC_FULL.md / spec §9).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Candidate, DisagreementReason, TaskId};

pub const DEFAULT_SEMANTIC_DISTANCE_THRESHOLD: f64 = 0.25;

/// One "contradicts" edge in the provenance graph. Edges hold candidate
/// node ids, never references to the candidates themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: &'static str,
}

/// Adjacency-list provenance graph relating candidates to each other.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceGraph {
    nodes: HashMap<String, Vec<String>>,
    edges: Vec<ProvenanceEdge>,
    next_edge_id: u64,
}

impl ProvenanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_id(task_id: &TaskId, candidate_id: &str) -> String {
        format!("candidate:{task_id}:{candidate_id}")
    }

    pub fn upsert_node(&mut self, node_id: &str) {
        self.nodes.entry(node_id.to_string()).or_default();
    }

    /// Adds a "contradicts" edge between two candidate nodes and returns
    /// its id.
    pub fn add_contradicts_edge(&mut self, from: &str, to: &str) -> String {
        self.upsert_node(from);
        self.upsert_node(to);
        let id = format!("edge-{}", self.next_edge_id);
        self.next_edge_id += 1;
        self.nodes.get_mut(from).unwrap().push(id.clone());
        self.edges.push(ProvenanceEdge {
            id: id.clone(),
            from: from.to_string(),
            to: to.to_string(),
            kind: "contradicts",
        });
        id
    }

    pub fn edges(&self) -> &[ProvenanceEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disagreement {
    pub candidate_a: String,
    pub candidate_b: String,
    pub semantic_distance: f64,
    pub reasons: Vec<DisagreementReason>,
    pub provenance_edge_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InconsistencyResult {
    pub total_pairs: usize,
    pub total_disagreements: usize,
    pub disagreement_rate: f64,
    pub disagreements: Vec<Disagreement>,
    pub provenance_links: Vec<String>,
}

fn mismatch_count(left: &[crate::types::U256], right: &[crate::types::U256]) -> usize {
    let len_diff = (left.len() as i64 - right.len() as i64).unsigned_abs() as usize;
    let shared = left.len().min(right.len());
    let value_mismatches = (0..shared).filter(|&i| left[i] != right[i]).count();
    len_diff + value_mismatches
}

/// Runs pairwise comparison over every unordered pair of `candidates`.
/// When `provenance` is provided, a "contradicts" edge is added per
/// disagreement and its id attached to the disagreement record.
pub fn detect(
    task_id: &TaskId,
    candidates: &[Candidate],
    threshold: f64,
    mut provenance: Option<&mut ProvenanceGraph>,
) -> InconsistencyResult {
    let n = candidates.len();
    let total_pairs = if n < 2 { 0 } else { n * (n - 1) / 2 };
    let mut disagreements = Vec::new();
    let mut provenance_links = Vec::new();

    for i in 0..n {
        for j in (i + 1)..n {
            let left = &candidates[i];
            let right = &candidates[j];
            let len_l = left.output.len();
            let len_r = right.output.len();
            let max_len = len_l.max(len_r);
            let mismatches = mismatch_count(&left.output, &right.output);
            let semantic_distance = if max_len == 0 {
                0.0
            } else {
                mismatches as f64 / max_len as f64
            };

            let mut reasons = Vec::new();
            if len_l != len_r {
                reasons.push(DisagreementReason::LengthMismatch);
            }
            if mismatches > 0 {
                reasons.push(DisagreementReason::ValueMismatch);
            }
            if semantic_distance >= threshold {
                reasons.push(DisagreementReason::SemanticDistance);
            }

            if reasons.is_empty() {
                continue;
            }

            let mut edge_ids = Vec::new();
            if let Some(graph) = provenance.as_deref_mut() {
                let from = ProvenanceGraph::node_id(task_id, &left.id);
                let to = ProvenanceGraph::node_id(task_id, &right.id);
                let edge_id = graph.add_contradicts_edge(&from, &to);
                provenance_links.push(edge_id.clone());
                edge_ids.push(edge_id);
            }

            disagreements.push(Disagreement {
                candidate_a: left.id.clone(),
                candidate_b: right.id.clone(),
                semantic_distance,
                reasons,
                provenance_edge_ids: edge_ids,
            });
        }
    }

    let total_disagreements = disagreements.len();
    let disagreement_rate = if total_pairs == 0 {
        0.0
    } else {
        total_disagreements as f64 / total_pairs as f64
    };

    InconsistencyResult {
        total_pairs,
        total_disagreements,
        disagreement_rate,
        disagreements,
        provenance_links,
    }
}
