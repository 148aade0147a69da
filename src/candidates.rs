//! Candidate generator (§4.5/G): a deterministic, bounded attempt sequence
//! driven by an external executor collaborator.
//!
//! Grounded on the teacher's `SagaOrchestrator::execute_inner`
//! (`reasoning/saga.rs`), which drives a strictly sequential series of
//! steps against an external `SagaAction`, tracking cumulative state and
//! stopping early on a budget condition — the same shape this generator
//! needs against an `Executor` collaborator instead of saga steps.

use async_trait::async_trait;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::canonical::sha256_hex;
use crate::types::{Candidate, Task, U256};

/// One execution attempt's raw result, before generator bookkeeping.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub output: Vec<U256>,
    pub token_estimate: u64,
    pub cost_lamports: u64,
}

/// External executor collaborator (§6). Must be idempotent for identical
/// inputs under a fixed seed.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &Task, seed: u64, attempt: u32) -> ExecutionResult;

    async fn revise(
        &self,
        task: &Task,
        previous_output: &[U256],
        reasons: &[String],
    ) -> ExecutionResult;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicyBudget {
    pub max_candidates: u32,
    pub max_execution_cost_lamports: u64,
}

impl Default for PolicyBudget {
    fn default() -> Self {
        PolicyBudget {
            max_candidates: 4,
            max_execution_cost_lamports: u64::MAX,
        }
    }
}

fn fingerprint(task: &Task, output: &[U256]) -> String {
    let value = serde_json::json!({
        "taskId": task.task_id.to_string(),
        "output": output.iter().map(|v| v.to_decimal_string()).collect::<Vec<_>>(),
    });
    sha256_hex(&value)
}

fn jaccard_distance(a: &HashSet<U256>, b: &HashSet<U256>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        1.0 - intersection / union
    }
}

/// Generates at most `min(policy.max_candidates, max_candidates)`
/// candidates for `task`, invoking `executor` sequentially and stopping
/// early if cumulative cost would exceed `policy.max_execution_cost_lamports`.
pub async fn generate(
    executor: &dyn Executor,
    task: &Task,
    seed: u64,
    max_candidates: u32,
    policy: &PolicyBudget,
) -> Vec<Candidate> {
    let limit = max_candidates.min(policy.max_candidates);
    let mut candidates = Vec::new();
    let mut seen_sets: Vec<HashSet<U256>> = Vec::new();
    let mut cumulative_cost: u64 = 0;

    for attempt in 1..=limit {
        let result = executor.execute(task, seed, attempt).await;
        let projected_cost = cumulative_cost.saturating_add(result.cost_lamports);
        if projected_cost > policy.max_execution_cost_lamports && !candidates.is_empty() {
            break;
        }
        cumulative_cost = projected_cost;

        let output_set: HashSet<U256> = result.output.iter().copied().collect();
        let novelty_score = if seen_sets.is_empty() {
            1.0
        } else {
            seen_sets
                .iter()
                .map(|s| jaccard_distance(&output_set, s))
                .fold(f64::INFINITY, f64::min)
        };
        seen_sets.push(output_set);

        candidates.push(Candidate {
            id: format!("cand-{attempt}"),
            attempt_index: attempt,
            fingerprint: fingerprint(task, &result.output),
            novelty_score,
            token_estimate: result.token_estimate,
            cumulative_cost_lamports: cumulative_cost,
            output: result.output,
        });

        if cumulative_cost >= policy.max_execution_cost_lamports {
            break;
        }
    }

    candidates
}
