//! Post-hypoglycaemia rebound guard.
//!
//! After a hypo the liver and rescue carbs often push glucose into a
//! steep rebound; dosing against that spike risks a second low.  This
//! rule looks for a recent hypo sample followed by a confirmed rising
//! trend and parks a conservative temp target while the rebound plays
//! out.

use crate::context::RuleContext;
use crate::model::{ActionProposal, RuleDecision, RuleId};
use crate::rules::{Rule, context_block};

pub struct PostHypoReboundGuardRule;

impl Rule for PostHypoReboundGuardRule {
    fn id(&self) -> RuleId {
        RuleId::PostHypoReboundGuard
    }

    fn evaluate(&mut self, ctx: &RuleContext) -> RuleDecision {
        if let Some(blocked) = context_block(self.id(), ctx, true) {
            return blocked;
        }
        let tuning = &ctx.tuning;

        let points = ctx.glucose_sorted();
        if points.len() < 4 {
            return RuleDecision::no_match(self.id(), "insufficient_points");
        }

        // Most recent hypo sample inside the lookback window.
        let lookback_start =
            ctx.now_ms - i64::from(tuning.post_hypo_lookback_minutes) * 60_000;
        let hypo = points
            .iter()
            .filter(|p| p.ts_ms >= lookback_start)
            .filter(|p| p.value_mmol <= tuning.post_hypo_threshold_mmol)
            .next_back();
        let Some(hypo) = hypo else {
            return RuleDecision::no_match(self.id(), "no_hypo");
        };

        let after: Vec<_> = points.iter().filter(|p| p.ts_ms > hypo.ts_ms).collect();
        if after.len() < 3 {
            return RuleDecision::no_match(self.id(), "insufficient_post_hypo_points");
        }

        // Two consecutive rises of at least the rebound delta confirm the
        // trend; a single jump can be sensor noise.
        let delta = tuning.post_hypo_rebound_delta_mmol;
        let rising = after[1].value_mmol - after[0].value_mmol >= delta
            && after[2].value_mmol - after[1].value_mmol >= delta;
        if !rising {
            return RuleDecision::no_match(self.id(), "no_rebound");
        }

        if let Some(active) = &ctx.active_temp_target {
            if active.matches_target(tuning.post_hypo_target_mmol) {
                return RuleDecision::blocked(self.id(), "temp_target_already_active");
            }
        }

        RuleDecision::triggered(
            self.id(),
            vec!["hypo_plus_rising_trend".to_string()],
            ActionProposal::temp_target(
                tuning.post_hypo_target_mmol,
                tuning.post_hypo_duration_minutes,
                "post_hypo_rebound",
            ),
        )
    }
}
