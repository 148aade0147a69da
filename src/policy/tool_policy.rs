//! Tool-policy evaluator (§4.14/P): ordered allow/deny rules with AND'd
//! conditions, a per-tool 60-second rate limit on the selected rule, and a
//! default deny.
//!
//! Grounded on the teacher's `scheduler/policy_gate.rs` (`PolicyGate`:
//! ordered rules, first-match-wins, explicit default) — generalized from a
//! single decision enum to an allow/deny-with-conditions match plus a
//! trailing rate-limit check on whichever rule wins.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::segment_glob_match;
use crate::error::PolicyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPolicyEffect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicyConditions {
    pub heartbeat_only: bool,
    pub session_ids: Option<Vec<String>>,
    pub channels: Option<Vec<String>>,
    pub sandbox_only: bool,
}

impl ToolPolicyConditions {
    fn satisfied(&self, invocation: &ToolInvocation<'_>) -> bool {
        if self.heartbeat_only && !invocation.heartbeat {
            return false;
        }
        if let Some(ids) = &self.session_ids {
            if !invocation.session_id.is_some_and(|s| ids.iter().any(|i| i == s)) {
                return false;
            }
        }
        if let Some(channels) = &self.channels {
            if !invocation.channel.is_some_and(|c| channels.iter().any(|ch| ch == c)) {
                return false;
            }
        }
        if self.sandbox_only && !invocation.sandboxed {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicyRule {
    pub tool_glob: String,
    pub effect: ToolPolicyEffect,
    pub conditions: Option<ToolPolicyConditions>,
    pub rate_limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolInvocation<'a> {
    pub tool: &'a str,
    pub heartbeat: bool,
    pub session_id: Option<&'a str>,
    pub channel: Option<&'a str>,
    pub sandboxed: bool,
}

const RATE_LIMIT_WINDOW_MS: u64 = 60_000;

pub struct ToolPolicyEvaluator {
    rules: Mutex<Vec<ToolPolicyRule>>,
    rate_windows: Mutex<HashMap<String, Vec<u64>>>,
}

impl ToolPolicyEvaluator {
    pub fn new(rules: Vec<ToolPolicyRule>) -> Self {
        ToolPolicyEvaluator {
            rules: Mutex::new(rules),
            rate_windows: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the rule set and clears rate-limit counters (§4.14).
    pub fn reload(&self, rules: Vec<ToolPolicyRule>) {
        *self.rules.lock() = rules;
        self.rate_windows.lock().clear();
    }

    pub fn evaluate(&self, invocation: &ToolInvocation<'_>, now_ms: u64) -> Result<(), PolicyError> {
        let rules = self.rules.lock();
        let mut candidate: Option<ToolPolicyRule> = None;

        for rule in rules.iter() {
            if !segment_glob_match(&rule.tool_glob, invocation.tool, '.') {
                continue;
            }
            let satisfied = rule.conditions.as_ref().map_or(true, |c| c.satisfied(invocation));
            if !satisfied {
                continue;
            }
            match rule.effect {
                ToolPolicyEffect::Deny => {
                    return Err(PolicyError::Violation {
                        actor: invocation.tool.to_string(),
                        action: "tool_invoke".to_string(),
                        rule: rule.tool_glob.clone(),
                        remaining: 0,
                    });
                }
                ToolPolicyEffect::Allow if candidate.is_none() => {
                    candidate = Some(rule.clone());
                }
                ToolPolicyEffect::Allow => {}
            }
        }
        drop(rules);

        let Some(rule) = candidate else {
            return Err(PolicyError::Violation {
                actor: invocation.tool.to_string(),
                action: "tool_invoke".to_string(),
                rule: "default_deny".to_string(),
                remaining: 0,
            });
        };

        if let Some(limit) = rule.rate_limit {
            let mut windows = self.rate_windows.lock();
            let bucket = windows.entry(invocation.tool.to_string()).or_default();
            let floor = now_ms.saturating_sub(RATE_LIMIT_WINDOW_MS);
            bucket.retain(|&t| t >= floor);
            if bucket.len() as u32 >= limit {
                return Err(PolicyError::Violation {
                    actor: invocation.tool.to_string(),
                    action: "tool_invoke".to_string(),
                    rule: rule.tool_glob.clone(),
                    remaining: 0,
                });
            }
            bucket.push(now_ms);
        }

        Ok(())
    }
}
