//! Rule wrapper around the adaptive temp-target controller.
//!
//! Resolves the three required forecast horizons and the UAM/COB/IOB
//! telemetry scalars, runs the PI controller, and rounds the result to
//! the 0.05 mmol/L step downstream pumps accept.

use log::debug;

use crate::context::RuleContext;
use crate::control::adaptive::{
    AdaptiveTempTargetController, ControllerInput, HorizonForecast,
};
use crate::model::{ActionProposal, RuleDecision, RuleId};
use crate::rules::{Rule, context_block};
use crate::telemetry::{self, Metric};

/// The three horizons the controller contract requires.
const REQUIRED_HORIZONS: [u32; 3] = [5, 30, 60];

/// Display/pump step for temp targets.
const TARGET_STEP_MMOL: f64 = 0.05;

#[derive(Default)]
pub struct AdaptiveTargetControllerRule {
    controller: AdaptiveTempTargetController,
}

impl AdaptiveTargetControllerRule {
    pub fn new() -> Self {
        Self {
            controller: AdaptiveTempTargetController::new(),
        }
    }

    /// Restore the controller's integral from caller-held state.
    pub fn with_integral(integral: f64) -> Self {
        Self {
            controller: AdaptiveTempTargetController::with_integral(integral),
        }
    }

    /// Integral accumulator after the last evaluation (persist it).
    pub fn integral(&self) -> f64 {
        self.controller.integral()
    }
}

impl Rule for AdaptiveTargetControllerRule {
    fn id(&self) -> RuleId {
        RuleId::AdaptiveTargetController
    }

    fn evaluate(&mut self, ctx: &RuleContext) -> RuleDecision {
        if let Some(blocked) = context_block(self.id(), ctx, true) {
            return blocked;
        }

        // Most recent forecast per required horizon; all three or nothing.
        let mut horizons = [HorizonForecast {
            value_mmol: 0.0,
            ci_half_width_mmol: 0.0,
        }; 3];
        for (slot, minutes) in horizons.iter_mut().zip(REQUIRED_HORIZONS) {
            let Some(f) = ctx.latest_forecast(minutes) else {
                return RuleDecision::no_match(
                    self.id(),
                    format!("missing_forecast_horizon:{minutes}"),
                );
            };
            *slot = HorizonForecast {
                value_mmol: f.value_mmol,
                ci_half_width_mmol: f.ci_half_width(),
            };
        }

        let current_glucose = ctx
            .glucose_sorted()
            .last()
            .map(|p| p.value_mmol);

        let input = ControllerInput {
            base_target_mmol: ctx.base_target_mmol,
            current_glucose_mmol: current_glucose,
            forecast_5m: horizons[0],
            forecast_30m: horizons[1],
            forecast_60m: horizons[2],
            uam_active: telemetry::resolve_uam_active(&ctx.telemetry),
            previous_temp_target_mmol: ctx.active_temp_target.as_ref().map(|t| t.target_mmol),
            cob_grams: telemetry::resolve(&ctx.telemetry, Metric::Cob),
            iob_units: telemetry::resolve(&ctx.telemetry, Metric::Iob),
            max_step_mmol: ctx.tuning.controller_max_step_mmol,
        };

        let output = self.controller.evaluate(&input);
        let target = round_to_step(output.target_mmol);
        debug!(
            "adaptive controller: target={target:.2} reason={} integral={:.2}",
            output.reason.as_str(),
            output.integral
        );

        if (target - ctx.base_target_mmol).abs() < 1e-6 {
            return RuleDecision::no_match(self.id(), "target_equals_base");
        }

        RuleDecision::triggered(
            self.id(),
            vec![output.reason.as_str().to_string()],
            ActionProposal::temp_target(
                target,
                output.duration_minutes,
                output.reason.as_str(),
            ),
        )
    }
}

fn round_to_step(value: f64) -> f64 {
    (value / TARGET_STEP_MMOL).round() * TARGET_STEP_MMOL
}
