//! Rule engine: ordering, safety gating, arbitration.
//!
//! One call per automation cycle: evaluate every configured rule against
//! the context snapshot, vet each triggered proposal through the safety
//! policy, then keep at most one winner.  The returned list always has
//! exactly one entry per rule, in evaluation (priority) order, so the
//! host can persist it as the cycle's audit record.

use log::{debug, info};

use crate::config::{RuleRuntimeConfig, SafetyPolicyConfig};
use crate::context::RuleContext;
use crate::events::{DecisionEvent, DecisionSink, NullSink};
use crate::model::{DecisionState, RuleDecision, RuleId};
use crate::rules::{self, RegisteredRule, Rule};
use crate::safety::SafetyPolicy;

/// Priority-ordered rule evaluator with single-winner arbitration.
///
/// Owns the rule instances (and through them the controller's integral
/// accumulator), so one engine belongs to exactly one caller at a time;
/// never evaluate the same engine concurrently.
pub struct RuleEngine {
    rules: Vec<RegisteredRule>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    /// Engine with the full default registry.
    pub fn new() -> Self {
        Self {
            rules: rules::default_registry(),
        }
    }

    /// Engine with an explicit rule set (tests, partial deployments).
    pub fn with_rules(rules: Vec<RegisteredRule>) -> Self {
        Self { rules }
    }

    /// Engine with the controller's integral restored from persisted
    /// state.
    pub fn with_controller_integral(integral: f64) -> Self {
        let mut engine = Self::new();
        for rule in &mut engine.rules {
            if let RegisteredRule::AdaptiveTarget(r) = rule {
                *r = crate::rules::AdaptiveTargetControllerRule::with_integral(integral);
            }
        }
        engine
    }

    /// The adaptive controller's integral accumulator, for the host to
    /// persist between cycles.
    pub fn controller_integral(&self) -> Option<f64> {
        self.rules.iter().find_map(|r| match r {
            RegisteredRule::AdaptiveTarget(rule) => Some(rule.integral()),
            _ => None,
        })
    }

    /// Evaluate one cycle without audit events.
    pub fn evaluate(
        &mut self,
        ctx: &RuleContext,
        safety: &SafetyPolicyConfig,
        runtime: &RuleRuntimeConfig,
    ) -> Vec<RuleDecision> {
        self.evaluate_with_sink(ctx, safety, runtime, &mut NullSink)
    }

    /// Evaluate one cycle, emitting audit events into `sink`.
    pub fn evaluate_with_sink(
        &mut self,
        ctx: &RuleContext,
        safety: &SafetyPolicyConfig,
        runtime: &RuleRuntimeConfig,
        sink: &mut impl DecisionSink,
    ) -> Vec<RuleDecision> {
        // Descending priority; registry order breaks ties (stable sort).
        let mut order: Vec<usize> = (0..self.rules.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(runtime.priority_of(self.rules[i].id())));

        let mut decisions = Vec::with_capacity(self.rules.len());
        for i in order {
            let rule = &mut self.rules[i];
            let rule_id = rule.id();

            if !runtime.is_enabled(rule_id) {
                decisions.push(RuleDecision::no_match(rule_id, "rule_disabled"));
                continue;
            }

            let mut decision = rule.evaluate(ctx);
            debug!("{rule_id}: {:?} {:?}", decision.state, decision.reasons);

            if let Some(proposal) = &decision.proposal {
                let verdict =
                    SafetyPolicy::evaluate(proposal, safety, ctx.data_fresh, ctx.actions_last_6h);
                if !verdict.allowed {
                    sink.emit(&DecisionEvent::ProposalRejected {
                        rule_id,
                        reasons: verdict.reasons.clone(),
                    });
                    decision.downgrade_to_blocked(verdict.reasons);
                }
            }

            decisions.push(decision);
        }

        arbitrate(&mut decisions, sink);
        sink.emit(&DecisionEvent::CycleEvaluated {
            decisions: decisions.clone(),
        });
        decisions
    }
}

/// Keep the first (highest-priority) triggered decision; downgrade every
/// later one so at most one proposal survives the cycle.
fn arbitrate(decisions: &mut [RuleDecision], sink: &mut impl DecisionSink) {
    let mut winner: Option<RuleId> = None;
    for decision in decisions.iter_mut() {
        if decision.state != DecisionState::Triggered {
            continue;
        }
        match winner {
            None => {
                winner = Some(decision.rule_id);
                if let Some(proposal) = &decision.proposal {
                    info!(
                        "cycle winner: {} -> {} mmol/L for {} min",
                        decision.rule_id, proposal.target_mmol, proposal.duration_minutes
                    );
                    sink.emit(&DecisionEvent::ProposalAccepted {
                        rule_id: decision.rule_id,
                        proposal: proposal.clone(),
                    });
                }
            }
            Some(winner_id) => {
                decision.downgrade_to_blocked([format!(
                    "skipped_due_to_higher_priority:{winner_id}"
                )]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecSink;
    use crate::model::{ActionProposal, DayType, GlucosePoint, PatternWindow};

    /// Context in which both the post-hypo rule and the pattern rule
    /// trigger: a rebounding hypo trace plus a flagged risk window.
    fn dual_trigger_ctx() -> RuleContext {
        let now = 1_000_000_000;
        let step = 5 * 60_000;
        let mut ctx = RuleContext::new(now, 5.5);
        ctx.glucose = [4.5, 3.0, 3.3, 3.6, 4.0]
            .iter()
            .enumerate()
            .map(|(i, v)| GlucosePoint::new(now - step * (5 - i as i64), *v))
            .collect();
        ctx.pattern_window = Some(PatternWindow {
            day_type: DayType::Weekday,
            hour_of_day: 7,
            sample_count: 240,
            active_days: 18,
            low_excursion_rate: 0.22,
            high_excursion_rate: 0.05,
            recommended_target_mmol: 6.2,
            risk_window: true,
        });
        ctx
    }

    fn decision_for(decisions: &[RuleDecision], id: RuleId) -> &RuleDecision {
        decisions.iter().find(|d| d.rule_id == id).unwrap()
    }

    #[test]
    fn one_decision_per_rule() {
        let mut engine = RuleEngine::new();
        let ctx = RuleContext::new(0, 5.5);
        let decisions = engine.evaluate(
            &ctx,
            &SafetyPolicyConfig::default(),
            &RuleRuntimeConfig::default(),
        );
        assert_eq!(decisions.len(), RuleId::COUNT);
        for id in RuleId::ALL {
            assert_eq!(decisions.iter().filter(|d| d.rule_id == id).count(), 1);
        }
    }

    #[test]
    fn disabled_rule_yields_synthetic_no_match() {
        let mut engine = RuleEngine::new();
        let ctx = dual_trigger_ctx();
        let mut runtime = RuleRuntimeConfig::default();
        runtime.enabled.insert(RuleId::PostHypoReboundGuard, false);

        let decisions = engine.evaluate(&ctx, &SafetyPolicyConfig::default(), &runtime);
        let d = decision_for(&decisions, RuleId::PostHypoReboundGuard);
        assert_eq!(d.state, DecisionState::NoMatch);
        assert_eq!(d.reasons, vec!["rule_disabled"]);
    }

    #[test]
    fn priority_arbitration_keeps_highest() {
        let mut engine = RuleEngine::new();
        let ctx = dual_trigger_ctx();
        let mut runtime = RuleRuntimeConfig::default();
        runtime.priorities.insert(RuleId::PatternAdaptiveTarget, 100);
        runtime.priorities.insert(RuleId::PostHypoReboundGuard, 10);

        let decisions = engine.evaluate(&ctx, &SafetyPolicyConfig::default(), &runtime);

        let winner = decision_for(&decisions, RuleId::PatternAdaptiveTarget);
        assert_eq!(winner.state, DecisionState::Triggered);

        let loser = decision_for(&decisions, RuleId::PostHypoReboundGuard);
        assert_eq!(loser.state, DecisionState::Blocked);
        assert!(loser.reasons.iter().any(
            |r| r == "skipped_due_to_higher_priority:PatternAdaptiveTarget.v1"
        ));

        // Priority order flips the outcome.
        let mut runtime = RuleRuntimeConfig::default();
        runtime.priorities.insert(RuleId::PostHypoReboundGuard, 100);
        let decisions = engine.evaluate(&ctx, &SafetyPolicyConfig::default(), &runtime);
        let winner = decision_for(&decisions, RuleId::PostHypoReboundGuard);
        assert_eq!(winner.state, DecisionState::Triggered);
    }

    #[test]
    fn at_most_one_triggered_survives() {
        let mut engine = RuleEngine::new();
        let ctx = dual_trigger_ctx();
        let decisions = engine.evaluate(
            &ctx,
            &SafetyPolicyConfig::default(),
            &RuleRuntimeConfig::default(),
        );
        let triggered = decisions
            .iter()
            .filter(|d| d.state == DecisionState::Triggered)
            .count();
        assert_eq!(triggered, 1);
    }

    #[test]
    fn safety_rejection_downgrades_with_reasons() {
        let mut engine = RuleEngine::new();
        let ctx = dual_trigger_ctx();
        let mut safety = SafetyPolicyConfig::default();
        safety.kill_switch = true;

        let decisions = engine.evaluate(&ctx, &safety, &RuleRuntimeConfig::default());
        assert!(
            decisions
                .iter()
                .all(|d| d.state != DecisionState::Triggered)
        );
        let d = decision_for(&decisions, RuleId::PostHypoReboundGuard);
        assert_eq!(d.state, DecisionState::Blocked);
        assert!(d.reasons.iter().any(|r| r == "kill_switch"));
        // The rule's own reasons are preserved ahead of the policy's.
        assert_eq!(d.reasons[0], "hypo_plus_rising_trend");
    }

    #[test]
    fn sink_receives_accept_and_cycle_events() {
        let mut engine = RuleEngine::new();
        let ctx = dual_trigger_ctx();
        let mut sink = VecSink::default();
        let _ = engine.evaluate_with_sink(
            &ctx,
            &SafetyPolicyConfig::default(),
            &RuleRuntimeConfig::default(),
            &mut sink,
        );
        assert!(sink.events.iter().any(|e| matches!(
            e,
            DecisionEvent::ProposalAccepted { rule_id, .. }
                if *rule_id == RuleId::PostHypoReboundGuard
        )));
        assert!(
            sink.events
                .iter()
                .any(|e| matches!(e, DecisionEvent::CycleEvaluated { .. }))
        );
    }

    #[test]
    fn sink_receives_rejection_events() {
        let mut engine = RuleEngine::new();
        let ctx = dual_trigger_ctx();
        let mut safety = SafetyPolicyConfig::default();
        safety.max_actions_per_6h = 0;
        let mut sink = VecSink::default();
        let _ = engine.evaluate_with_sink(
            &ctx,
            &safety,
            &RuleRuntimeConfig::default(),
            &mut sink,
        );
        assert!(sink.events.iter().any(|e| matches!(
            e,
            DecisionEvent::ProposalRejected { reasons, .. }
                if reasons.iter().any(|r| r == "rate_limit_6h")
        )));
    }

    #[test]
    fn controller_integral_is_exposed() {
        let engine = RuleEngine::new();
        assert_eq!(engine.controller_integral(), Some(0.0));
    }

    #[test]
    fn arbitration_invariant_on_synthetic_decisions() {
        // Three triggered decisions in: only the first survives.
        let mut decisions = vec![
            RuleDecision::triggered(
                RuleId::AdaptiveTargetController,
                vec!["control_pi".into()],
                ActionProposal::temp_target(5.0, 30, "a"),
            ),
            RuleDecision::no_match(RuleId::PostHypoReboundGuard, "no_hypo"),
            RuleDecision::triggered(
                RuleId::PatternAdaptiveTarget,
                vec!["validated_risk_window".into()],
                ActionProposal::temp_target(6.0, 60, "b"),
            ),
            RuleDecision::triggered(
                RuleId::SegmentProfileGuard,
                vec!["segment_more_sensitive".into()],
                ActionProposal::temp_target(5.8, 60, "c"),
            ),
        ];
        arbitrate(&mut decisions, &mut NullSink);
        assert_eq!(decisions[0].state, DecisionState::Triggered);
        assert_eq!(decisions[2].state, DecisionState::Blocked);
        assert_eq!(decisions[3].state, DecisionState::Blocked);
        for d in &decisions[2..] {
            assert!(d.reasons.iter().any(|r| r
                == "skipped_due_to_higher_priority:AdaptiveTargetController.v1"));
        }
    }
}
