//! Risk scorer (§4.3/E): feature-vector to score and tier, with explainable
//! per-feature contributions.
//!
//! Grounded on the teacher's weighted-condition evaluators
//! (`scheduler/policy_gate.rs`'s ordered-rule matching gave the "clamp,
//! weight, sum" shape its cousin) and on `risk`-flavoured fields already
//! present in `types/error.rs` (`ResourceError::EscalationRequired`) that
//! establish the vocabulary this crate's escalation path reuses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{RiskFeatureVector, RiskTier, Task, TaskType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskWeights {
    pub reward: f64,
    pub deadline: f64,
    pub claim_pressure: f64,
    pub task_type: f64,
    pub verifier_disagreement: f64,
    pub rollback: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        RiskWeights {
            reward: 0.22,
            deadline: 0.18,
            claim_pressure: 0.15,
            task_type: 0.2,
            verifier_disagreement: 0.15,
            rollback: 0.1,
        }
    }
}

impl RiskWeights {
    /// Negative weights are coerced to zero; everything else is preserved.
    fn coerced(&self) -> RiskWeights {
        let nn = |v: f64| v.max(0.0);
        RiskWeights {
            reward: nn(self.reward),
            deadline: nn(self.deadline),
            claim_pressure: nn(self.claim_pressure),
            task_type: nn(self.task_type),
            verifier_disagreement: nn(self.verifier_disagreement),
            rollback: nn(self.rollback),
        }
    }

    fn sum(&self) -> f64 {
        self.reward
            + self.deadline
            + self.claim_pressure
            + self.task_type
            + self.verifier_disagreement
            + self.rollback
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskTypeSignals {
    pub exclusive: f64,
    pub collaborative: f64,
    pub competitive: f64,
}

impl Default for TaskTypeSignals {
    fn default() -> Self {
        TaskTypeSignals {
            exclusive: 0.3,
            collaborative: 0.5,
            competitive: 0.75,
        }
    }
}

impl TaskTypeSignals {
    fn signal(&self, task_type: TaskType) -> f64 {
        match task_type {
            TaskType::Exclusive => self.exclusive,
            TaskType::Collaborative => self.collaborative,
            TaskType::Competitive => self.competitive,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        RiskThresholds {
            medium: 0.3,
            high: 0.5,
        }
    }
}

impl RiskThresholds {
    fn clamped(&self) -> RiskThresholds {
        RiskThresholds {
            medium: self.medium.clamp(0.0, 1.0),
            high: self.high.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct RiskScorerConfig {
    pub weights: RiskWeights,
    pub task_type_signals: TaskTypeSignals,
    pub thresholds: RiskThresholds,
}

/// Runtime context supplying the two externally-derived rates the task
/// itself doesn't carry.
#[derive(Debug, Clone, Copy)]
pub struct RiskContext {
    pub historical_verifier_disagreement_rate: f64,
    pub historical_rollback_rate: f64,
    pub now_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub tier: RiskTier,
    pub features: RiskFeatureVector,
    pub contributions: HashMap<String, f64>,
    pub thresholds: RiskThresholds,
}

pub fn score(task: &Task, ctx: &RiskContext, config: &RiskScorerConfig) -> RiskAssessment {
    let reward = (((task.reward_lamports as f64) + 1.0).log10() / 9.0).clamp(0.0, 1.0);

    let deadline_pressure = if task.deadline_secs == 0 {
        0.0
    } else if task.deadline_secs <= ctx.now_secs {
        1.0
    } else {
        let remaining = (task.deadline_secs - ctx.now_secs) as f64;
        (1.0 - remaining / 86400.0).clamp(0.0, 1.0)
    };

    let claim_pressure =
        (task.current_claims as f64 / (task.max_workers.max(1) as f64)).clamp(0.0, 1.0);

    let task_type_signal = config
        .task_type_signals
        .signal(task.task_type)
        .clamp(0.0, 1.0);

    let verifier_disagreement = ctx.historical_verifier_disagreement_rate.clamp(0.0, 1.0);
    let rollback = ctx.historical_rollback_rate.clamp(0.0, 1.0);

    let features = RiskFeatureVector {
        reward,
        deadline_pressure,
        claim_pressure,
        task_type_intrinsic_risk: task_type_signal,
        historical_verifier_disagreement_rate: verifier_disagreement,
        historical_rollback_rate: rollback,
    };

    let weights = config.weights.coerced();
    let weight_sum = weights.sum();

    let mut contributions = HashMap::new();
    contributions.insert("reward".to_string(), reward * weights.reward);
    contributions.insert("deadline".to_string(), deadline_pressure * weights.deadline);
    contributions.insert(
        "claimPressure".to_string(),
        claim_pressure * weights.claim_pressure,
    );
    contributions.insert("taskType".to_string(), task_type_signal * weights.task_type);
    contributions.insert(
        "verifierDisagreement".to_string(),
        verifier_disagreement * weights.verifier_disagreement,
    );
    contributions.insert("rollback".to_string(), rollback * weights.rollback);

    let score = if weight_sum <= 0.0 {
        0.0
    } else {
        contributions.values().sum::<f64>() / weight_sum
    };

    let thresholds = config.thresholds.clamped();
    let tier = if score >= thresholds.high {
        RiskTier::High
    } else if score >= thresholds.medium {
        RiskTier::Medium
    } else {
        RiskTier::Low
    };

    RiskAssessment {
        score,
        tier,
        features,
        contributions,
        thresholds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskId, TaskStatus};

    fn base_task() -> Task {
        Task {
            task_id: TaskId([0u8; 32]),
            creator: "alice".to_string(),
            required_capabilities: 0,
            reward_lamports: 10,
            deadline_secs: 0,
            max_workers: 1,
            current_claims: 0,
            task_type: TaskType::Exclusive,
            status: TaskStatus::Open,
            constraint_hash: None,
        }
    }

    fn base_ctx() -> RiskContext {
        RiskContext {
            historical_verifier_disagreement_rate: 0.0,
            historical_rollback_rate: 0.0,
            now_secs: 1_000_000,
        }
    }

    #[test]
    fn zero_weight_sum_yields_zero_score() {
        let task = base_task();
        let ctx = base_ctx();
        let config = RiskScorerConfig {
            weights: RiskWeights {
                reward: 0.0,
                deadline: 0.0,
                claim_pressure: 0.0,
                task_type: 0.0,
                verifier_disagreement: 0.0,
                rollback: 0.0,
            },
            ..Default::default()
        };
        let assessment = score(&task, &ctx, &config);
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.tier, RiskTier::Low);
    }

    #[test]
    fn negative_weights_are_coerced_to_zero() {
        let task = base_task();
        let ctx = base_ctx();
        let config = RiskScorerConfig {
            weights: RiskWeights {
                reward: -5.0,
                ..RiskWeights::default()
            },
            ..Default::default()
        };
        let assessment = score(&task, &ctx, &config);
        assert!(assessment.score.is_finite());
        assert!(assessment.score >= 0.0);
    }

    #[test]
    fn past_deadline_maxes_deadline_pressure() {
        let mut task = base_task();
        task.deadline_secs = 10;
        let mut ctx = base_ctx();
        ctx.now_secs = 20;
        let assessment = score(&task, &ctx, &RiskScorerConfig::default());
        assert_eq!(assessment.features.deadline_pressure, 1.0);
    }

    #[test]
    fn no_deadline_yields_zero_pressure() {
        let task = base_task();
        let ctx = base_ctx();
        let assessment = score(&task, &ctx, &RiskScorerConfig::default());
        assert_eq!(assessment.features.deadline_pressure, 0.0);
    }

    #[test]
    fn claim_pressure_clamped_to_one() {
        let mut task = base_task();
        task.current_claims = 10;
        task.max_workers = 2;
        let assessment = score(&task, &base_ctx(), &RiskScorerConfig::default());
        assert_eq!(assessment.features.claim_pressure, 1.0);
    }

    #[test]
    fn high_reward_competitive_task_tiers_high() {
        let mut task = base_task();
        task.reward_lamports = 10_000_000_000;
        task.task_type = TaskType::Competitive;
        task.current_claims = 5;
        task.max_workers = 1;
        let mut ctx = base_ctx();
        ctx.historical_verifier_disagreement_rate = 0.9;
        ctx.historical_rollback_rate = 0.9;
        let assessment = score(&task, &ctx, &RiskScorerConfig::default());
        assert_eq!(assessment.tier, RiskTier::High);
    }

    #[test]
    fn contributions_sum_consistently_with_score() {
        let task = base_task();
        let ctx = base_ctx();
        let config = RiskScorerConfig::default();
        let assessment = score(&task, &ctx, &config);
        let weight_sum = config.weights.coerced().sum();
        let contribution_sum: f64 = assessment.contributions.values().sum();
        assert!((assessment.score - contribution_sum / weight_sum).abs() < 1e-9);
    }
}
