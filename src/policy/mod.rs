//! Policy engine (§4.13/O): action budgets, spend budgets, a risk ceiling,
//! and a circuit breaker that escalates repeated violations into a global
//! refusal mode.
//!
//! Grounded on the teacher's `reasoning/circuit_breaker.rs` (closed/open
//! cooldown state machine, generalized here from per-tool health to
//! whole-engine safe/degraded modes) and `scheduler/policy_gate.rs`
//! (ordered-rule-evaluation-with-default shape, reused for action budgets).

pub mod tool_policy;

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::types::PolicyBucket;

/// Matches a glob pattern against a key split on `sep`. `*` alone matches
/// everything; `prefix{sep}*` matches exactly one segment after `prefix`.
pub(crate) fn segment_glob_match(pattern: &str, text: &str, sep: char) -> bool {
    if pattern == "*" {
        return true;
    }
    let suffix = format!("{sep}*");
    if let Some(prefix) = pattern.strip_suffix(&suffix) {
        return text
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(sep))
            .map(|rest| !rest.contains(sep))
            .unwrap_or(false);
    }
    pattern == text
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionBudgetRule {
    pub pattern: String,
    pub limit: u32,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpendBudgetConfig {
    pub limit_lamports: u128,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitMode {
    SafeMode,
    Degraded,
}

impl CircuitMode {
    fn label(self) -> &'static str {
        match self {
            CircuitMode::SafeMode => "safe_mode",
            CircuitMode::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub threshold: u32,
    pub window_ms: u64,
    pub mode: CircuitMode,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            enabled: false,
            threshold: u32::MAX,
            window_ms: 0,
            mode: CircuitMode::SafeMode,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub enabled: bool,
    pub action_budgets: Vec<ActionBudgetRule>,
    pub spend_budget: Option<SpendBudgetConfig>,
    pub max_risk_score: Option<f64>,
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Whether an externally-observable action reads or writes state; the
/// circuit breaker's `degraded` mode allows reads through but blocks writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

struct CircuitBreakerState {
    violations: Vec<u64>,
    tripped: bool,
}

impl CircuitBreakerState {
    fn new() -> Self {
        CircuitBreakerState {
            violations: Vec::new(),
            tripped: false,
        }
    }

    fn record_violation(&mut self, now_ms: u64, config: &CircuitBreakerConfig) {
        if !config.enabled {
            return;
        }
        self.violations.push(now_ms);
        let floor = now_ms.saturating_sub(config.window_ms);
        self.violations.retain(|&t| t >= floor);
        if self.violations.len() as u32 >= config.threshold {
            self.tripped = true;
        }
    }

    fn maybe_cool_off(&mut self, now_ms: u64, config: &CircuitBreakerConfig) {
        if !self.tripped {
            return;
        }
        let last = self.violations.iter().max().copied();
        let cooled_off = match last {
            Some(last) => now_ms.saturating_sub(last) >= config.window_ms,
            None => true,
        };
        if cooled_off {
            self.tripped = false;
            self.violations.clear();
        }
    }

    fn check(&mut self, op: Operation, now_ms: u64, config: &CircuitBreakerConfig) -> Result<(), PolicyError> {
        if !config.enabled {
            return Ok(());
        }
        self.maybe_cool_off(now_ms, config);
        if !self.tripped {
            return Ok(());
        }
        match config.mode {
            CircuitMode::SafeMode => Err(PolicyError::CircuitOpen {
                mode: config.mode.label().to_string(),
            }),
            CircuitMode::Degraded if op == Operation::Write => Err(PolicyError::CircuitOpen {
                mode: config.mode.label().to_string(),
            }),
            CircuitMode::Degraded => Ok(()),
        }
    }
}

/// A single before-hook check spanning action budgets, spend budgets, the
/// risk ceiling, and the circuit breaker (§4.13/O). Any rejection counts as
/// a circuit-breaker violation.
pub struct PolicyEngine {
    config: PolicyConfig,
    action_buckets: Mutex<HashMap<String, PolicyBucket>>,
    spend_log: Mutex<Vec<(u64, u128)>>,
    circuit: Mutex<CircuitBreakerState>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyCheckContext<'a> {
    pub actor: &'a str,
    pub action_key: &'a str,
    pub spend_lamports: Option<u128>,
    pub risk_score: Option<f64>,
    pub operation: Operation,
}

impl Default for Operation {
    fn default() -> Self {
        Operation::Read
    }
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        PolicyEngine {
            config,
            action_buckets: Mutex::new(HashMap::new()),
            spend_log: Mutex::new(Vec::new()),
            circuit: Mutex::new(CircuitBreakerState::new()),
        }
    }

    /// Runs every configured check in order, recording a circuit-breaker
    /// violation and returning the first failure. Returns `Ok(())`
    /// unconditionally if the engine is disabled.
    pub fn check(&self, ctx: &PolicyCheckContext<'_>, now_ms: u64) -> Result<(), PolicyError> {
        if !self.config.enabled {
            return Ok(());
        }

        if let Err(e) = self.circuit.lock().check(ctx.operation, now_ms, &self.config.circuit_breaker) {
            return Err(e);
        }

        if let Some(score) = ctx.risk_score {
            if let Err(e) = self.check_risk(score) {
                self.circuit.lock().record_violation(now_ms, &self.config.circuit_breaker);
                return Err(e);
            }
        }

        if let Err(e) = self.check_action_budget(ctx.actor, ctx.action_key, now_ms) {
            self.circuit.lock().record_violation(now_ms, &self.config.circuit_breaker);
            return Err(e);
        }

        if let Some(amount) = ctx.spend_lamports {
            if let Err(e) = self.check_spend(ctx.actor, amount, now_ms) {
                self.circuit.lock().record_violation(now_ms, &self.config.circuit_breaker);
                return Err(e);
            }
        }

        Ok(())
    }

    fn check_risk(&self, score: f64) -> Result<(), PolicyError> {
        match self.config.max_risk_score {
            Some(max) if score > max => Err(PolicyError::RiskCeilingExceeded { score, max }),
            _ => Ok(()),
        }
    }

    fn matching_action_rule(&self, action_key: &str) -> Option<&ActionBudgetRule> {
        self.config
            .action_budgets
            .iter()
            .find(|rule| segment_glob_match(&rule.pattern, action_key, ':'))
    }

    fn check_action_budget(&self, actor: &str, action_key: &str, now_ms: u64) -> Result<(), PolicyError> {
        let Some(rule) = self.matching_action_rule(action_key) else {
            return Ok(());
        };
        let mut buckets = self.action_buckets.lock();
        let bucket = buckets
            .entry(action_key.to_string())
            .or_insert_with(|| PolicyBucket::new(action_key, rule.window_ms));
        bucket.prune(now_ms);
        if bucket.timestamps_ms.len() as u32 >= rule.limit {
            return Err(PolicyError::Violation {
                actor: actor.to_string(),
                action: action_key.to_string(),
                rule: rule.pattern.clone(),
                remaining: 0,
            });
        }
        bucket.timestamps_ms.push(now_ms);
        Ok(())
    }

    fn check_spend(&self, actor: &str, amount_lamports: u128, now_ms: u64) -> Result<(), PolicyError> {
        let Some(budget) = self.config.spend_budget else {
            return Ok(());
        };
        let mut log = self.spend_log.lock();
        let floor = now_ms.saturating_sub(budget.window_ms);
        log.retain(|&(t, _)| t >= floor);
        let spent: u128 = log.iter().map(|(_, l)| l).sum();
        if spent + amount_lamports > budget.limit_lamports {
            return Err(PolicyError::Violation {
                actor: actor.to_string(),
                action: "spend".to_string(),
                rule: "spend_budget".to_string(),
                remaining: (budget.limit_lamports.saturating_sub(spent)) as i64,
            });
        }
        log.push((now_ms, amount_lamports));
        Ok(())
    }
}
