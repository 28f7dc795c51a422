//! Pattern-driven adaptive target.
//!
//! The external pattern estimator aggregates weeks of history into
//! day-type × hour buckets and flags the ones with recurring excursions
//! as validated risk windows, each with a recommended target.  This rule
//! simply applies that recommendation when the current window is flagged
//! and the recommendation meaningfully differs from the base target.

use crate::context::RuleContext;
use crate::model::{ActionProposal, RuleDecision, RuleId};
use crate::rules::{Rule, context_block};

pub struct PatternAdaptiveTargetRule;

impl Rule for PatternAdaptiveTargetRule {
    fn id(&self) -> RuleId {
        RuleId::PatternAdaptiveTarget
    }

    fn evaluate(&mut self, ctx: &RuleContext) -> RuleDecision {
        if let Some(blocked) = context_block(self.id(), ctx, true) {
            return blocked;
        }

        let Some(window) = &ctx.pattern_window else {
            return RuleDecision::no_match(self.id(), "no_pattern_window");
        };
        if !window.risk_window {
            return RuleDecision::no_match(self.id(), "not_risk_window");
        }

        let delta = window.recommended_target_mmol - ctx.base_target_mmol;
        if delta.abs() < ctx.tuning.pattern_min_target_delta_mmol {
            return RuleDecision::no_match(self.id(), "target_delta_too_small");
        }

        if let Some(active) = &ctx.active_temp_target {
            if active.matches_target(window.recommended_target_mmol) {
                return RuleDecision::blocked(self.id(), "temp_target_already_active");
            }
        }

        RuleDecision::triggered(
            self.id(),
            vec!["validated_risk_window".to_string()],
            ActionProposal::temp_target(
                window.recommended_target_mmol,
                ctx.tuning.pattern_duration_minutes,
                "pattern_risk_window",
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayType, DecisionState, PatternWindow, TempTarget};

    fn window(risk: bool, recommended: f64) -> PatternWindow {
        PatternWindow {
            day_type: DayType::Weekday,
            hour_of_day: 7,
            sample_count: 240,
            active_days: 18,
            low_excursion_rate: 0.22,
            high_excursion_rate: 0.05,
            recommended_target_mmol: recommended,
            risk_window: risk,
        }
    }

    #[test]
    fn validated_risk_window_triggers() {
        let mut ctx = RuleContext::new(0, 5.5);
        ctx.pattern_window = Some(window(true, 6.2));
        let mut rule = PatternAdaptiveTargetRule;
        let d = rule.evaluate(&ctx);
        assert_eq!(d.state, DecisionState::Triggered);
        assert_eq!(d.reasons, vec!["validated_risk_window"]);
        let p = d.proposal.unwrap();
        assert!((p.target_mmol - 6.2).abs() < 1e-9);
        assert_eq!(p.duration_minutes, 60);
    }

    #[test]
    fn unflagged_window_is_no_match() {
        let mut ctx = RuleContext::new(0, 5.5);
        ctx.pattern_window = Some(window(false, 6.2));
        let mut rule = PatternAdaptiveTargetRule;
        let d = rule.evaluate(&ctx);
        assert_eq!(d.state, DecisionState::NoMatch);
        assert_eq!(d.reasons, vec!["not_risk_window"]);
    }

    #[test]
    fn near_base_recommendation_is_no_match() {
        let mut ctx = RuleContext::new(0, 5.5);
        ctx.pattern_window = Some(window(true, 5.6));
        let mut rule = PatternAdaptiveTargetRule;
        let d = rule.evaluate(&ctx);
        assert_eq!(d.state, DecisionState::NoMatch);
        assert_eq!(d.reasons, vec!["target_delta_too_small"]);
    }

    #[test]
    fn missing_window_is_no_match() {
        let ctx = RuleContext::new(0, 5.5);
        let mut rule = PatternAdaptiveTargetRule;
        let d = rule.evaluate(&ctx);
        assert_eq!(d.state, DecisionState::NoMatch);
        assert_eq!(d.reasons, vec!["no_pattern_window"]);
    }

    #[test]
    fn equal_active_target_blocks() {
        let mut ctx = RuleContext::new(0, 5.5);
        ctx.pattern_window = Some(window(true, 6.2));
        ctx.active_temp_target = Some(TempTarget {
            target_mmol: 6.2,
            duration_minutes: 60,
            started_ms: -600_000,
        });
        let mut rule = PatternAdaptiveTargetRule;
        let d = rule.evaluate(&ctx);
        assert_eq!(d.state, DecisionState::Blocked);
        assert_eq!(d.reasons, vec!["temp_target_already_active"]);
    }
}
