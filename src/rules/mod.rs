//! Rule strategies and the closed registry.
//!
//! Each rule inspects the shared [`RuleContext`] and emits exactly one
//! [`RuleDecision`] per cycle.  The set is closed and config-driven:
//! rules are enumerated in a fixed registry (no dynamic discovery), and
//! the runtime config only enables, prioritises, or cools them down.

pub mod adaptive_target;
pub mod pattern_target;
pub mod post_hypo;
pub mod segment_profile;

use crate::context::RuleContext;
use crate::model::{RuleDecision, RuleId};

pub use adaptive_target::AdaptiveTargetControllerRule;
pub use pattern_target::PatternAdaptiveTargetRule;
pub use post_hypo::PostHypoReboundGuardRule;
pub use segment_profile::SegmentProfileGuardRule;

/// The shared rule contract.
///
/// `evaluate` must be total: absent data resolves to `NoMatch`/`Blocked`
/// with a reason token, never a panic or error.  `&mut self` exists for
/// the controller rule's integral accumulator; the other rules are
/// stateless.
pub trait Rule {
    fn id(&self) -> RuleId;
    fn evaluate(&mut self, ctx: &RuleContext) -> RuleDecision;
}

/// One entry of the closed registry.  Enum dispatch keeps the set
/// enumerable and avoids `dyn` at the engine's hot path.
pub enum RegisteredRule {
    AdaptiveTarget(AdaptiveTargetControllerRule),
    PostHypo(PostHypoReboundGuardRule),
    Pattern(PatternAdaptiveTargetRule),
    SegmentProfile(SegmentProfileGuardRule),
}

impl Rule for RegisteredRule {
    fn id(&self) -> RuleId {
        match self {
            Self::AdaptiveTarget(r) => r.id(),
            Self::PostHypo(r) => r.id(),
            Self::Pattern(r) => r.id(),
            Self::SegmentProfile(r) => r.id(),
        }
    }

    fn evaluate(&mut self, ctx: &RuleContext) -> RuleDecision {
        match self {
            Self::AdaptiveTarget(r) => r.evaluate(ctx),
            Self::PostHypo(r) => r.evaluate(ctx),
            Self::Pattern(r) => r.evaluate(ctx),
            Self::SegmentProfile(r) => r.evaluate(ctx),
        }
    }
}

/// The full rule set in registry order (the priority tie-break order).
pub fn default_registry() -> Vec<RegisteredRule> {
    vec![
        RegisteredRule::AdaptiveTarget(AdaptiveTargetControllerRule::new()),
        RegisteredRule::PostHypo(PostHypoReboundGuardRule),
        RegisteredRule::Pattern(PatternAdaptiveTargetRule),
        RegisteredRule::SegmentProfile(SegmentProfileGuardRule),
    ]
}

/// Staleness/sensor gate shared by the rules.
///
/// Every rule blocks on stale data; the rules that reason about the live
/// glucose stream additionally block during sensor data gaps.
pub(crate) fn context_block(
    rule_id: RuleId,
    ctx: &RuleContext,
    needs_sensor: bool,
) -> Option<RuleDecision> {
    if !ctx.data_fresh {
        return Some(RuleDecision::blocked(rule_id, "stale_data"));
    }
    if needs_sensor && ctx.sensor_blocked {
        return Some(RuleDecision::blocked(rule_id, "sensor_blocked"));
    }
    None
}
