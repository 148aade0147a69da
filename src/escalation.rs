//! Escalation graph (§4.8/J): a pure, total, side-effect-free transition
//! from the current verification context to the next loop state.
//!
//! Grounded on the teacher's `reasoning/loop_types.rs::TerminationReason`
//! and `LoopDecision` (Allow/Deny/Modify) enums, which establish the
//! "compute a decision as a value, never a side effect" idiom this
//! function follows exactly, generalized into the priority-ordered chain
//! of conditions §4.8 specifies.

use crate::types::{EscalationReasonCode, EscalationState, EscalationStateKind, Verdict};

/// Everything the escalation graph needs to decide the next state. Built
/// fresh by the verifier lane at each attempt; never retained between
/// calls.
#[derive(Debug, Clone, Copy)]
pub struct EscalationInput {
    pub policy_denied: bool,
    pub timed_out: bool,
    pub budget_exhausted: bool,
    pub verdict: Verdict,
    pub disagreements_exceeded: bool,
    pub attempts_exhausted: bool,
    pub revision_available: bool,
    pub re_execute_allowed: bool,
}

/// Maps `(verdict, attempts, policy)` — captured in `EscalationInput` — to
/// exactly one `(state, reason)` pair. Total: every input produces a
/// result, no input is rejected.
pub fn transition(input: &EscalationInput) -> EscalationState {
    use EscalationReasonCode as R;
    use EscalationStateKind as S;

    if input.policy_denied {
        return EscalationState {
            state: S::Escalate,
            reason: R::PolicyDenied,
        };
    }
    if input.timed_out {
        return EscalationState {
            state: S::Escalate,
            reason: R::Timeout,
        };
    }
    if input.budget_exhausted {
        return EscalationState {
            state: S::Escalate,
            reason: R::BudgetExhausted,
        };
    }
    if input.verdict == Verdict::Pass {
        return EscalationState {
            state: S::Pass,
            reason: R::RetryAllowed,
        };
    }
    if input.disagreements_exceeded {
        return EscalationState {
            state: S::Escalate,
            reason: R::DisagreementThreshold,
        };
    }
    if input.attempts_exhausted {
        return EscalationState {
            state: S::Escalate,
            reason: R::RetriesExhausted,
        };
    }
    if input.verdict == Verdict::NeedsRevision {
        if input.revision_available {
            return EscalationState {
                state: S::Revise,
                reason: R::NeedsRevision,
            };
        }
        if input.re_execute_allowed {
            return EscalationState {
                state: S::Retry,
                reason: R::NeedsRevision,
            };
        }
        return EscalationState {
            state: S::Escalate,
            reason: R::RevisionUnavailable,
        };
    }
    EscalationState {
        state: S::Retry,
        reason: R::RetryAllowed,
    }
}
