//! Verification budget allocator (§4.4/F): risk tier + guardrails -> a
//! concrete retry/duration/confidence budget, with adaptive histograms
//! recorded through the injected `Metrics` collaborator.
//!
//! Grounded on the teacher's `LoopConfig` (`reasoning/loop_types.rs`), which
//! is the closest analog of "pick a tier/mode-specific override, else fall
//! back to a plain default, then clamp to a hard ceiling" — there expressed
//! as `max_iterations`/`max_total_tokens`/`timeout` defaults rather than a
//! risk-tiered table, generalized here into the per-tier override maps
//! §4.4 requires.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::metrics::Metrics;
use crate::types::{RiskTier, VerificationBudget};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlainBudgetDefaults {
    pub max_verification_retries: u32,
    pub max_verification_duration_ms: u64,
    pub min_confidence: f64,
}

impl Default for PlainBudgetDefaults {
    fn default() -> Self {
        PlainBudgetDefaults {
            max_verification_retries: 2,
            max_verification_duration_ms: 30_000,
            min_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveRiskConfig {
    pub enabled: bool,
    pub min_risk_score_to_verify: f64,
    pub max_verification_retries_by_risk: HashMap<RiskTier, u32>,
    pub max_verification_duration_ms_by_risk: HashMap<RiskTier, u64>,
    pub min_confidence_by_risk: HashMap<RiskTier, f64>,
    pub hard_max_verification_retries: u32,
    pub hard_max_verification_duration_ms: u64,
    pub hard_max_verification_cost_lamports: u64,
}

impl Default for AdaptiveRiskConfig {
    fn default() -> Self {
        AdaptiveRiskConfig {
            enabled: false,
            min_risk_score_to_verify: 0.0,
            max_verification_retries_by_risk: HashMap::new(),
            max_verification_duration_ms_by_risk: HashMap::new(),
            min_confidence_by_risk: HashMap::new(),
            hard_max_verification_retries: 10,
            hard_max_verification_duration_ms: 300_000,
            hard_max_verification_cost_lamports: u64::MAX,
        }
    }
}

fn tier_label(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Low => "low",
        RiskTier::Medium => "medium",
        RiskTier::High => "high",
    }
}

/// Allocates a verification budget for one task invocation, recording the
/// adaptive-mode histograms the spec names (`agenc.verifier.adaptive.*`)
/// regardless of whether adaptive mode is enabled -- the risk score itself
/// is computed upstream either way, and observing its distribution is
/// useful independent of whether it gates behavior.
pub fn allocate(
    tier: RiskTier,
    risk_score: f64,
    adaptive: &AdaptiveRiskConfig,
    plain: &PlainBudgetDefaults,
    metrics: &dyn Metrics,
) -> VerificationBudget {
    let label = tier_label(tier);

    let max_retries = adaptive
        .max_verification_retries_by_risk
        .get(&tier)
        .copied()
        .unwrap_or(plain.max_verification_retries)
        .min(adaptive.hard_max_verification_retries);

    let max_duration_ms = adaptive
        .max_verification_duration_ms_by_risk
        .get(&tier)
        .copied()
        .unwrap_or(plain.max_verification_duration_ms)
        .min(adaptive.hard_max_verification_duration_ms);

    let min_confidence = adaptive
        .min_confidence_by_risk
        .get(&tier)
        .copied()
        .unwrap_or(plain.min_confidence)
        .clamp(0.0, 1.0);

    metrics.histogram("agenc.verifier.adaptive.risk_score", risk_score, &[("tier", label)]);
    metrics.histogram(
        "agenc.verifier.adaptive.max_retries",
        max_retries as f64,
        &[("tier", label)],
    );
    metrics.histogram(
        "agenc.verifier.adaptive.max_duration_ms",
        max_duration_ms as f64,
        &[("tier", label)],
    );

    VerificationBudget {
        max_retries,
        max_duration_ms,
        min_confidence,
    }
}
