//! Per-cycle snapshot threaded through every rule.
//!
//! `RuleContext` is the single read-only struct each rule inspects.  The
//! host assembles it once per automation cycle from its collaborators
//! (glucose store, forecast source, pattern/profile estimators, settings)
//! and the engine treats it as immutable — the only cross-cycle state
//! lives in the adaptive controller's integral accumulator.

use std::collections::BTreeMap;

use crate::config::RuleTuning;
use crate::model::{
    ForecastPoint, GlucosePoint, PatternWindow, ProfileEstimate, ProfileSegmentEstimate,
    TempTarget, TherapyEvent,
};

/// Everything a rule may look at in one cycle.
#[derive(Debug, Clone)]
pub struct RuleContext {
    /// Evaluation time (epoch ms).
    pub now_ms: i64,

    // -- Histories --
    /// CGM history, oldest lookback window the rules need is ~90 minutes.
    pub glucose: Vec<GlucosePoint>,
    /// Therapy-event history over the same window.
    pub therapy_events: Vec<TherapyEvent>,
    /// All forecasts the source produced this cycle (possibly several
    /// generations per horizon).
    pub forecasts: Vec<ForecastPoint>,

    // -- Estimator outputs --
    /// Pattern window covering the current day-type/hour, if computed.
    pub pattern_window: Option<PatternWindow>,
    /// Overall profile estimate.
    pub profile_estimate: Option<ProfileEstimate>,
    /// Profile estimate for the current day-type/time slot.
    pub profile_segment: Option<ProfileSegmentEstimate>,

    // -- Loop state --
    /// The user's configured base glucose target (mmol/L).
    pub base_target_mmol: f64,
    /// False when the newest glucose sample is older than the staleness
    /// threshold; blocks every rule.
    pub data_fresh: bool,
    /// True during a sensor data gap (warm-up, signal loss).
    pub sensor_blocked: bool,
    /// The temp target currently active downstream, if any.
    pub active_temp_target: Option<TempTarget>,
    /// Automated actions executed in the trailing 6 hours.
    pub actions_last_6h: u32,

    /// Free-form telemetry scalars from the host (UAM/COB/IOB live here
    /// under whatever keys the upstream loop emits; see `telemetry`).
    pub telemetry: BTreeMap<String, f64>,

    /// Per-rule tunable thresholds.
    pub tuning: RuleTuning,
}

impl RuleContext {
    /// A minimal context for a given time and base target; tests and
    /// hosts fill in the rest field by field.
    pub fn new(now_ms: i64, base_target_mmol: f64) -> Self {
        Self {
            now_ms,
            glucose: Vec::new(),
            therapy_events: Vec::new(),
            forecasts: Vec::new(),
            pattern_window: None,
            profile_estimate: None,
            profile_segment: None,
            base_target_mmol,
            data_fresh: true,
            sensor_blocked: false,
            active_temp_target: None,
            actions_last_6h: 0,
            telemetry: BTreeMap::new(),
            tuning: RuleTuning::default(),
        }
    }

    /// Most recent forecast for the given horizon, by prediction-target
    /// timestamp.  `None` when the horizon is missing entirely.
    pub fn latest_forecast(&self, horizon_minutes: u32) -> Option<&ForecastPoint> {
        self.forecasts
            .iter()
            .filter(|f| f.horizon_minutes == horizon_minutes)
            .max_by_key(|f| f.ts_ms)
    }

    /// Glucose history in ascending timestamp order.  The ingestion layer
    /// normally delivers it sorted; this sorts defensively anyway.
    pub fn glucose_sorted(&self) -> Vec<GlucosePoint> {
        let mut points = self.glucose.clone();
        points.sort_by_key(|p| p.ts_ms);
        points
    }
}
