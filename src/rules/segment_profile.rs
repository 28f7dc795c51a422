//! Segment profile guard.
//!
//! Compares the current day-type/time-slot ISF and carb-ratio estimates
//! against the person's overall profile.  A segment where insulin bites
//! noticeably harder gets a slightly raised target; a segment where it
//! bites noticeably softer (confirmed by the carb ratio when available)
//! gets a slightly lowered one.  Shifts are small and bounded — this is
//! a trim, not a controller.

use crate::context::RuleContext;
use crate::model::{ActionProposal, RuleDecision, RuleId};
use crate::rules::{Rule, context_block};

/// Segment-vs-overall ISF ratio above which the segment counts as more
/// insulin-sensitive.
const MORE_SENSITIVE_RATIO: f64 = 1.20;
/// ISF ratio below which the segment counts as less sensitive…
const LESS_SENSITIVE_RATIO: f64 = 0.85;
/// …confirmed by a carb ratio at or below this fraction of the overall.
const LESS_SENSITIVE_CR_RATIO: f64 = 0.90;

/// Bounds on the proposed target shift.
const SHIFT_MIN_MMOL: f64 = 0.20;
const SHIFT_MAX_MMOL: f64 = 0.30;
/// Extra shift per unit of ratio deviation beyond the classification
/// threshold.
const SHIFT_GAIN: f64 = 0.5;
/// Shifts below this are not worth an action.
const SHIFT_FLOOR_MMOL: f64 = 0.15;

/// Floor for ISF/CR denominators.
const RATIO_EPS: f64 = 1e-6;

pub struct SegmentProfileGuardRule;

impl Rule for SegmentProfileGuardRule {
    fn id(&self) -> RuleId {
        RuleId::SegmentProfileGuard
    }

    fn evaluate(&mut self, ctx: &RuleContext) -> RuleDecision {
        // Profile aggregates span weeks; a live sensor gap does not
        // invalidate them, so only staleness blocks here.
        if let Some(blocked) = context_block(self.id(), ctx, false) {
            return blocked;
        }

        let Some(overall) = &ctx.profile_estimate else {
            return RuleDecision::no_match(self.id(), "missing_profile");
        };
        let Some(segment) = &ctx.profile_segment else {
            return RuleDecision::no_match(self.id(), "missing_segment");
        };
        let seg = &segment.estimate;

        if seg.confidence < ctx.tuning.segment_min_confidence {
            return RuleDecision::no_match(self.id(), "low_segment_confidence");
        }
        if overall.isf_mmol_per_unit <= RATIO_EPS {
            return RuleDecision::no_match(self.id(), "invalid_profile_isf");
        }

        let isf_ratio = seg.isf_mmol_per_unit / overall.isf_mmol_per_unit;
        let cr_ratio = match (seg.carb_ratio_g_per_unit, overall.carb_ratio_g_per_unit) {
            (Some(seg_cr), Some(all_cr)) if all_cr > RATIO_EPS => Some(seg_cr / all_cr),
            _ => None,
        };

        let (shift, reason) = if isf_ratio >= MORE_SENSITIVE_RATIO {
            let shift = (SHIFT_MIN_MMOL + (isf_ratio - MORE_SENSITIVE_RATIO) * SHIFT_GAIN)
                .min(SHIFT_MAX_MMOL);
            (shift, "segment_more_sensitive")
        } else if isf_ratio <= LESS_SENSITIVE_RATIO
            && cr_ratio.is_none_or(|r| r <= LESS_SENSITIVE_CR_RATIO)
        {
            let shift = (SHIFT_MIN_MMOL + (LESS_SENSITIVE_RATIO - isf_ratio) * SHIFT_GAIN)
                .min(SHIFT_MAX_MMOL);
            (-shift, "segment_less_sensitive")
        } else {
            return RuleDecision::no_match(self.id(), "neutral_sensitivity");
        };

        if shift.abs() < SHIFT_FLOOR_MMOL {
            return RuleDecision::no_match(self.id(), "shift_below_floor");
        }

        let target = ctx.base_target_mmol + shift;
        if let Some(active) = &ctx.active_temp_target {
            if active.matches_target(target) {
                return RuleDecision::blocked(self.id(), "temp_target_already_active");
            }
        }

        RuleDecision::triggered(
            self.id(),
            vec![reason.to_string(), format!("isf_ratio:{isf_ratio:.2}")],
            ActionProposal::temp_target(
                target,
                ctx.tuning.segment_duration_minutes,
                reason,
            ),
        )
    }
}
