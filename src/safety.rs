//! Safety policy.
//!
//! The last gate before a proposal leaves the engine.  Every check runs
//! on every evaluation and every violation is reported — nothing
//! short-circuits, so the audit trail always shows the full set of
//! reasons a proposal was rejected, not just the first one.

use log::warn;

use crate::config::SafetyPolicyConfig;
use crate::model::ActionProposal;

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub allowed: bool,
    /// One token per fired check, in check order.
    pub reasons: Vec<String>,
}

/// Stateless guardrail evaluator.
pub struct SafetyPolicy;

impl SafetyPolicy {
    /// Check a proposal against the configured hard bounds.
    ///
    /// `data_fresh` and `actions_last_6h` come from the cycle context;
    /// the policy itself holds no state.
    pub fn evaluate(
        proposal: &ActionProposal,
        config: &SafetyPolicyConfig,
        data_fresh: bool,
        actions_last_6h: u32,
    ) -> SafetyVerdict {
        let mut reasons = Vec::new();

        if config.kill_switch {
            reasons.push("kill_switch".to_string());
        }
        if !data_fresh {
            reasons.push("stale_data".to_string());
        }
        if actions_last_6h >= config.max_actions_per_6h {
            reasons.push("rate_limit_6h".to_string());
        }
        if proposal.target_mmol < config.min_target_mmol
            || proposal.target_mmol > config.max_target_mmol
            || !proposal.target_mmol.is_finite()
        {
            reasons.push("target_out_of_bounds".to_string());
        }
        if proposal.duration_minutes < config.min_duration_minutes
            || proposal.duration_minutes > config.max_duration_minutes
        {
            reasons.push("duration_out_of_bounds".to_string());
        }

        let allowed = reasons.is_empty();
        if !allowed {
            warn!(
                "safety policy rejected proposal ({} mmol/L, {} min): {}",
                proposal.target_mmol,
                proposal.duration_minutes,
                reasons.join(",")
            );
        }
        SafetyVerdict { allowed, reasons }
    }
}
