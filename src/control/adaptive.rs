//! Adaptive temp-target PI controller.
//!
//! Converts three forecast horizons (5/30/60 min) plus confidence
//! intervals, COB and IOB into a single temp-target recommendation.
//! Safety overrides (force-high, hypo-guard) take precedence over the
//! control law and may move the target anywhere in one cycle — there is
//! deliberately no cross-cycle rate limiting, so a detected hypo risk is
//! countered immediately rather than smoothed over several cycles.
//!
//! The controller owns the integral accumulator, the only mutable state
//! in the engine.  One instance per rule identity; the host persists
//! `integral()` between cycles and restores it via `with_integral`.
//! Never share an instance between concurrent evaluations.

use std::collections::BTreeMap;

use log::debug;

// ── Output range ──────────────────────────────────────────────
const TARGET_MIN_MMOL: f64 = 4.0;
const TARGET_MAX_MMOL: f64 = 9.0;
/// Every recommendation holds for one fixed window.
const DURATION_MINUTES: u32 = 30;

// ── Effective base target ─────────────────────────────────────
/// At or above this COB the person is absorbing a meal; the effective
/// base target is pinned low so the loop keeps dosing against the carbs.
const COB_FORCE_THRESHOLD_G: f64 = 20.0;
const COB_FORCED_BASE_MMOL: f64 = 4.2;
/// IOB above this starts to pose a stacking-insulin hypo risk.
const IOB_RELIEF_THRESHOLD_U: f64 = 1.5;
const IOB_RELIEF_GAIN: f64 = 0.20;
const IOB_RELIEF_CAP_MMOL: f64 = 0.60;

const COB_CLAMP_G: f64 = 400.0;
const IOB_CLAMP_U: f64 = 30.0;

// ── Confidence weighting ──────────────────────────────────────
const BASE_WEIGHTS: [f64; 3] = [15.0, 35.0, 50.0];
/// With an unannounced meal in progress the long horizon carries the
/// meal response, so weight shifts toward 60 minutes.
const BASE_WEIGHTS_UAM: [f64; 3] = [10.0, 30.0, 60.0];
/// Variance floor for near-zero confidence intervals.
const CI_VARIANCE_EPS: f64 = 1e-3;

// ── Safety overrides ──────────────────────────────────────────
const SUPPRESS_ALL_ABOVE_MARGIN: f64 = 1.0;
const SUPPRESS_CLEARLY_ABOVE_MARGIN: f64 = 2.0;
const FORCE_HIGH_CRITICAL_LOW_MMOL: f64 = 3.3;
const FORCE_HIGH_WEIGHTED_LOW_MMOL: f64 = 3.9;
const CLEARLY_ABOVE_TB_MARGIN: f64 = 1.0;
/// The guard engages once the weighted lower bound sits this far below
/// Tb; ordinary CI widths around an on-target prediction stay inside it.
const HYPO_GUARD_MARGIN_MMOL: f64 = 0.8;
/// Severity ramps from 0 to 1 over this further depth.
const HYPO_GUARD_SPAN_MMOL: f64 = 0.8;

// ── PI control law ────────────────────────────────────────────
const KP: f64 = 0.6;
const KI: f64 = 0.01;
const ERROR_DEADBAND_MMOL: f64 = 0.2;
const INTEGRAL_DECAY: f64 = 0.8;
const INTEGRAL_CLAMP: f64 = 200.0;
const CYCLE_MINUTES: f64 = 5.0;
const COB_BIAS_PER_GRAM: f64 = 0.01;
const COB_BIAS_CAP_MMOL: f64 = 1.0;
const IOB_BIAS_PER_UNIT: f64 = 0.1;
const IOB_BIAS_CAP_MMOL: f64 = 1.5;

// ── High-glucose guard ────────────────────────────────────────
const HIGH_GUARD_HYPO_MARGIN_MMOL: f64 = 0.5;
const HIGH_GUARD_EXCESS_MMOL: f64 = 1.0;
const HIGH_GUARD_LARGE_EXCESS_MMOL: f64 = 2.0;
const HIGH_GUARD_UNDERSHOOT_MMOL: f64 = 0.3;

/// One forecast horizon as the controller sees it.
#[derive(Debug, Clone, Copy)]
pub struct HorizonForecast {
    pub value_mmol: f64,
    /// Confidence-interval half-width, floored at zero by the caller.
    pub ci_half_width_mmol: f64,
}

/// Everything the controller reads in one evaluation.
#[derive(Debug, Clone)]
pub struct ControllerInput {
    pub base_target_mmol: f64,
    pub current_glucose_mmol: Option<f64>,
    pub forecast_5m: HorizonForecast,
    pub forecast_30m: HorizonForecast,
    pub forecast_60m: HorizonForecast,
    pub uam_active: bool,
    /// The previously recommended temp target, if one is active.  Kept in
    /// the input (and echoed to the debug map) even though no rate limit
    /// consumes it, so replay tooling sees the full cycle state.
    pub previous_temp_target_mmol: Option<f64>,
    pub cob_grams: Option<f64>,
    pub iob_units: Option<f64>,
    /// Clamp on the PI delta per cycle (mmol/L).
    pub max_step_mmol: f64,
}

/// Which branch produced the recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerReason {
    SafetyForceHigh,
    SafetyHypoGuard,
    ControlDeadband,
    ControlPi,
}

impl ControllerReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SafetyForceHigh => "safety_force_high",
            Self::SafetyHypoGuard => "safety_hypo_guard",
            Self::ControlDeadband => "control_deadband",
            Self::ControlPi => "control_pi",
        }
    }
}

/// Controller recommendation plus every intermediate quantity.
#[derive(Debug, Clone)]
pub struct ControllerOutput {
    pub target_mmol: f64,
    pub duration_minutes: u32,
    /// Integral accumulator after this cycle.
    pub integral: f64,
    pub reason: ControllerReason,
    /// Named intermediate scalars for audit and replay.
    pub debug: BTreeMap<&'static str, f64>,
}

/// PI controller with safety overrides.
#[derive(Default)]
pub struct AdaptiveTempTargetController {
    integral: f64,
}

impl AdaptiveTempTargetController {
    pub fn new() -> Self {
        Self { integral: 0.0 }
    }

    /// Restore a controller from a persisted integral value.
    pub fn with_integral(integral: f64) -> Self {
        Self { integral }
    }

    /// Current integral accumulator (persist between cycles).
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Reset controller state.
    pub fn reset(&mut self) {
        self.integral = 0.0;
    }

    /// Run one control cycle.  Pure given the input and the threaded
    /// integral; total for any finite input.
    pub fn evaluate(&mut self, input: &ControllerInput) -> ControllerOutput {
        let mut dbg = BTreeMap::new();

        let cob = input.cob_grams.map(|g| g.clamp(0.0, COB_CLAMP_G));
        let iob = input.iob_units.map(|u| u.clamp(0.0, IOB_CLAMP_U));
        dbg.insert("cob_grams", cob.unwrap_or(0.0));
        dbg.insert("iob_units", iob.unwrap_or(0.0));
        dbg.insert(
            "previous_temp_target",
            input.previous_temp_target_mmol.unwrap_or(0.0),
        );

        // 1. Effective base target.
        let cob_forces_base = cob.is_some_and(|g| g >= COB_FORCE_THRESHOLD_G);
        let mut tb = if cob_forces_base {
            COB_FORCED_BASE_MMOL
        } else {
            input.base_target_mmol
        };
        let iob_relief = iob
            .filter(|u| *u > IOB_RELIEF_THRESHOLD_U)
            .map_or(0.0, |u| {
                (IOB_RELIEF_GAIN * (u - IOB_RELIEF_THRESHOLD_U)).min(IOB_RELIEF_CAP_MMOL)
            });
        tb += iob_relief;
        dbg.insert("tb_forced_by_cob", f64::from(u8::from(cob_forces_base)));
        dbg.insert("iob_relief", iob_relief);
        dbg.insert("tb_effective", tb);

        // 2. Confidence-weighted aggregation.
        let horizons = [input.forecast_5m, input.forecast_30m, input.forecast_60m];
        let base_weights = if input.uam_active {
            BASE_WEIGHTS_UAM
        } else {
            BASE_WEIGHTS
        };
        let mut weights = [0.0_f64; 3];
        for (w, (base, h)) in weights.iter_mut().zip(base_weights.iter().zip(&horizons)) {
            let ci = h.ci_half_width_mmol.max(0.0);
            *w = base / (ci * ci + CI_VARIANCE_EPS);
        }
        let weight_sum: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= weight_sum;
        }

        let p_ctrl: f64 = weights
            .iter()
            .zip(&horizons)
            .map(|(w, h)| w * h.value_mmol)
            .sum();
        let p_ctrl_low: f64 = weights
            .iter()
            .zip(&horizons)
            .map(|(w, h)| w * (h.value_mmol - h.ci_half_width_mmol.max(0.0)))
            .sum();
        let p_min = horizons
            .iter()
            .map(|h| h.value_mmol - h.ci_half_width_mmol.max(0.0))
            .fold(f64::INFINITY, f64::min);

        dbg.insert("w_5m", weights[0]);
        dbg.insert("w_30m", weights[1]);
        dbg.insert("w_60m", weights[2]);
        dbg.insert("p_ctrl", p_ctrl);
        dbg.insert("p_ctrl_low", p_ctrl_low);
        dbg.insert("p_min", p_min);

        // 3. Safety overrides.
        let p5 = input.forecast_5m.value_mmol;
        let p5_low = p5 - input.forecast_5m.ci_half_width_mmol.max(0.0);
        let all_above = horizons
            .iter()
            .all(|h| h.value_mmol > tb + SUPPRESS_ALL_ABOVE_MARGIN);
        let clearly_high_now = input.current_glucose_mmol.is_some_and(|g| {
            g > tb + SUPPRESS_CLEARLY_ABOVE_MARGIN && p5 > tb + SUPPRESS_CLEARLY_ABOVE_MARGIN
        });
        let suppress_overrides = all_above || clearly_high_now;
        dbg.insert(
            "suppress_overrides",
            f64::from(u8::from(suppress_overrides)),
        );

        if !suppress_overrides {
            let critical_low = p5_low < FORCE_HIGH_CRITICAL_LOW_MMOL;
            let weighted_low = p_ctrl_low < FORCE_HIGH_WEIGHTED_LOW_MMOL
                && p5 < tb + CLEARLY_ABOVE_TB_MARGIN;
            if critical_low || weighted_low {
                debug!(
                    "force-high: p5_low={p5_low:.2} p_ctrl_low={p_ctrl_low:.2} tb={tb:.2}"
                );
                dbg.insert("target", TARGET_MAX_MMOL);
                return ControllerOutput {
                    target_mmol: TARGET_MAX_MMOL,
                    duration_minutes: DURATION_MINUTES,
                    integral: self.integral,
                    reason: ControllerReason::SafetyForceHigh,
                    debug: dbg,
                };
            }

            let guard_depth = (tb - HYPO_GUARD_MARGIN_MMOL) - p_ctrl_low;
            if guard_depth > 0.0 {
                // Raise proportionally toward the maximum: the deeper the
                // weighted lower bound sits below Tb, the closer to 9.0.
                let severity = (guard_depth / HYPO_GUARD_SPAN_MMOL).clamp(0.0, 1.0);
                let target = (tb + severity * (TARGET_MAX_MMOL - tb))
                    .clamp(TARGET_MIN_MMOL, TARGET_MAX_MMOL);
                debug!("hypo-guard: severity={severity:.2} target={target:.2}");
                dbg.insert("hypo_guard_severity", severity);
                dbg.insert("target", target);
                return ControllerOutput {
                    target_mmol: target,
                    duration_minutes: DURATION_MINUTES,
                    integral: self.integral,
                    reason: ControllerReason::SafetyHypoGuard,
                    debug: dbg,
                };
            }
        }

        // 4. PI control law.
        let cob_bias = cob.map_or(0.0, |g| (g * COB_BIAS_PER_GRAM).min(COB_BIAS_CAP_MMOL));
        let iob_bias = iob.map_or(0.0, |u| (u * IOB_BIAS_PER_UNIT).min(IOB_BIAS_CAP_MMOL));
        let error = p_ctrl + cob_bias - iob_bias - tb;
        dbg.insert("cob_bias", cob_bias);
        dbg.insert("iob_bias", iob_bias);
        dbg.insert("error", error);

        if error.abs() <= ERROR_DEADBAND_MMOL {
            self.integral *= INTEGRAL_DECAY;
            dbg.insert("integral", self.integral);
            dbg.insert("target", tb.clamp(TARGET_MIN_MMOL, TARGET_MAX_MMOL));
            return ControllerOutput {
                target_mmol: tb.clamp(TARGET_MIN_MMOL, TARGET_MAX_MMOL),
                duration_minutes: DURATION_MINUTES,
                integral: self.integral,
                reason: ControllerReason::ControlDeadband,
                debug: dbg,
            };
        }

        let candidate_integral =
            (self.integral + error * CYCLE_MINUTES).clamp(-INTEGRAL_CLAMP, INTEGRAL_CLAMP);
        let max_step = input.max_step_mmol.abs();
        let raw_delta = -KP * error - KI * candidate_integral;
        let delta = raw_delta.clamp(-max_step, max_step);
        let unclamped_target = tb + raw_delta;
        let mut target = (tb + delta).clamp(TARGET_MIN_MMOL, TARGET_MAX_MMOL);

        // Anti-windup: when the output saturates at a bound the raw delta
        // pushed past, the integral update for this cycle is discarded.
        let saturated_high = target >= TARGET_MAX_MMOL && unclamped_target > TARGET_MAX_MMOL;
        let saturated_low = target <= TARGET_MIN_MMOL && unclamped_target < TARGET_MIN_MMOL;
        if !(saturated_high || saturated_low) {
            self.integral = candidate_integral;
        }

        dbg.insert("raw_delta", raw_delta);
        dbg.insert("delta", delta);
        dbg.insert("integral", self.integral);

        // 5. High-glucose guard: with no concurrent hypo risk, the PI law
        // must never leave the target above baseline while predictions
        // run clearly high.
        let no_hypo_risk = p_min >= tb - HIGH_GUARD_HYPO_MARGIN_MMOL;
        if no_hypo_risk && p_ctrl > tb + HIGH_GUARD_EXCESS_MMOL {
            target = target.min(tb);
            if p_ctrl > tb + HIGH_GUARD_LARGE_EXCESS_MMOL {
                target = target.min(tb - HIGH_GUARD_UNDERSHOOT_MMOL);
            }
            target = target.clamp(TARGET_MIN_MMOL, TARGET_MAX_MMOL);
            dbg.insert("high_guard_applied", 1.0);
        }

        dbg.insert("target", target);
        ControllerOutput {
            target_mmol: target,
            duration_minutes: DURATION_MINUTES,
            integral: self.integral,
            reason: ControllerReason::ControlPi,
            debug: dbg,
        }
    }
}
