//! Immutable data records exchanged with the host application.
//!
//! Every glucose and target value in this crate is expressed in mmol/L;
//! timestamps are Unix epoch milliseconds.  The host assembles these
//! records from its storage/ingestion layers, the engine never mutates
//! them, and the resulting [`RuleDecision`] list is handed back for audit
//! persistence and action delivery.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Glucose & therapy history
// ---------------------------------------------------------------------------

/// Quality flag attached to a CGM sample by the ingestion layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    /// Normal sample.
    Ok,
    /// Sample flagged by the sensor or ingestion (calibration gap, noise).
    Suspect,
}

/// A single CGM sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucosePoint {
    /// Sample time (epoch ms).
    pub ts_ms: i64,
    /// Glucose value (mmol/L).
    pub value_mmol: f64,
    /// Origin tag ("xdrip", "nightscout", …).
    pub source: String,
    /// Ingestion quality flag.
    pub quality: Quality,
}

impl GlucosePoint {
    pub fn new(ts_ms: i64, value_mmol: f64) -> Self {
        Self {
            ts_ms,
            value_mmol,
            source: String::new(),
            quality: Quality::Ok,
        }
    }
}

/// Kind of a therapy event in the history stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TherapyEventKind {
    /// Announced carb intake (grams in `value`).
    CarbIntake,
    /// Insulin bolus (units in `value`).
    Bolus,
    /// A temp target was set by the loop or the user (mmol/L in `value`).
    TempTargetSet,
    /// Free-form annotation; `value` unused.
    Note,
}

/// One entry of the therapy-event history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TherapyEvent {
    pub ts_ms: i64,
    pub kind: TherapyEventKind,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Forecasts
// ---------------------------------------------------------------------------

/// One forecast sample for a single horizon.
///
/// `ts_ms` is the *prediction target time*, not the generation time.
/// Several generation cycles may coexist per horizon; consumers pick the
/// most recent by timestamp (see `RuleContext::latest_forecast`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub ts_ms: i64,
    pub horizon_minutes: u32,
    pub value_mmol: f64,
    pub ci_low_mmol: f64,
    pub ci_high_mmol: f64,
    pub model_version: String,
}

impl ForecastPoint {
    /// Half-width of the confidence interval, floored at zero.
    pub fn ci_half_width(&self) -> f64 {
        ((self.ci_high_mmol - self.ci_low_mmol) / 2.0).max(0.0)
    }
}

// ---------------------------------------------------------------------------
// Pattern & profile estimates (read-only outputs of external estimators)
// ---------------------------------------------------------------------------

/// Weekday/weekend bucketing used by the pattern estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayType {
    Weekday,
    Weekend,
}

/// Aggregated excursion statistics for one day-type × hour bucket.
///
/// The engine only reads `risk_window` and `recommended_target_mmol`; the
/// remaining fields exist so the record round-trips through audit storage
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternWindow {
    pub day_type: DayType,
    /// Hour-of-day bucket (0–23).
    pub hour_of_day: u8,
    pub sample_count: u32,
    pub active_days: u32,
    pub low_excursion_rate: f64,
    pub high_excursion_rate: f64,
    pub recommended_target_mmol: f64,
    /// True when the estimator validated this bucket as a risk window.
    pub risk_window: bool,
}

/// Coarse time-of-day slots for segmented profile estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeSlot {
    Night,
    Morning,
    Afternoon,
    Evening,
}

/// Point estimate of insulin sensitivity and carb ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEstimate {
    /// ISF — mmol/L glucose change per unit of insulin.
    pub isf_mmol_per_unit: f64,
    /// CR — grams of carbohydrate covered per unit, when estimated.
    pub carb_ratio_g_per_unit: Option<f64>,
    /// Estimator confidence in \[0, 1\].
    pub confidence: f64,
    pub sample_count: u32,
}

/// A profile estimate restricted to one day-type × time-of-day segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSegmentEstimate {
    pub day_type: DayType,
    pub slot: TimeSlot,
    pub estimate: ProfileEstimate,
}

// ---------------------------------------------------------------------------
// Temp targets, proposals, decisions
// ---------------------------------------------------------------------------

/// The temp target currently active in the delivery loop, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempTarget {
    pub target_mmol: f64,
    pub duration_minutes: u32,
    pub started_ms: i64,
}

impl TempTarget {
    /// Whether this active target is equivalent to a proposed one
    /// (same value within half a display step).
    pub fn matches_target(&self, target_mmol: f64) -> bool {
        (self.target_mmol - target_mmol).abs() < 0.025
    }
}

/// Kind of action a rule may propose.  Only temp targets today; the enum
/// keeps the wire shape stable for future action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    TempTarget,
}

/// An immutable action proposal produced by a rule and vetted by the
/// safety policy before the host dispatches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub kind: ActionKind,
    pub target_mmol: f64,
    pub duration_minutes: u32,
    /// Free-text reason shown in the audit trail.
    pub reason: String,
}

impl ActionProposal {
    /// A temp-target proposal with the value clamped to the range the
    /// safety policy accepts for rule-level targets.
    pub fn temp_target(target_mmol: f64, duration_minutes: u32, reason: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::TempTarget,
            target_mmol: target_mmol.clamp(4.0, 10.0),
            duration_minutes,
            reason: reason.into(),
        }
    }
}

/// Identity of each rule in the closed registry.
///
/// The serialized form is the stable wire identifier used by the original
/// backend, so persisted decision histories stay comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuleId {
    #[serde(rename = "AdaptiveTargetController.v1")]
    AdaptiveTargetController,
    #[serde(rename = "PostHypoReboundGuard.v1")]
    PostHypoReboundGuard,
    #[serde(rename = "PatternAdaptiveTarget.v1")]
    PatternAdaptiveTarget,
    #[serde(rename = "SegmentProfileGuard.v1")]
    SegmentProfileGuard,
}

impl RuleId {
    /// Total number of rules — used to size the registry.
    pub const COUNT: usize = 4;

    /// Registry order: the tie-break order when priorities are equal.
    pub const ALL: [RuleId; Self::COUNT] = [
        RuleId::AdaptiveTargetController,
        RuleId::PostHypoReboundGuard,
        RuleId::PatternAdaptiveTarget,
        RuleId::SegmentProfileGuard,
    ];

    /// Stable wire identifier.
    pub const fn as_str(self) -> &'static str {
        match self {
            RuleId::AdaptiveTargetController => "AdaptiveTargetController.v1",
            RuleId::PostHypoReboundGuard => "PostHypoReboundGuard.v1",
            RuleId::PatternAdaptiveTarget => "PatternAdaptiveTarget.v1",
            RuleId::SegmentProfileGuard => "SegmentProfileGuard.v1",
        }
    }
}

impl core::fmt::Display for RuleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome state of one rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionState {
    NoMatch,
    Blocked,
    Triggered,
}

/// The audit record for one rule in one cycle.
///
/// Invariant: `state == Triggered` if and only if `proposal.is_some()`.
/// Use the constructors below; they uphold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDecision {
    pub rule_id: RuleId,
    pub state: DecisionState,
    /// Ordered machine-readable reason tokens.
    pub reasons: Vec<String>,
    pub proposal: Option<ActionProposal>,
}

impl RuleDecision {
    pub fn no_match(rule_id: RuleId, reason: impl Into<String>) -> Self {
        Self {
            rule_id,
            state: DecisionState::NoMatch,
            reasons: vec![reason.into()],
            proposal: None,
        }
    }

    pub fn blocked(rule_id: RuleId, reason: impl Into<String>) -> Self {
        Self {
            rule_id,
            state: DecisionState::Blocked,
            reasons: vec![reason.into()],
            proposal: None,
        }
    }

    pub fn triggered(rule_id: RuleId, reasons: Vec<String>, proposal: ActionProposal) -> Self {
        Self {
            rule_id,
            state: DecisionState::Triggered,
            reasons,
            proposal: Some(proposal),
        }
    }

    /// Downgrade a triggered decision to `Blocked`, dropping its proposal
    /// and appending the blocking reasons.  Used by the engine for safety
    /// rejections and arbitration losses.
    pub fn downgrade_to_blocked(&mut self, extra_reasons: impl IntoIterator<Item = String>) {
        self.state = DecisionState::Blocked;
        self.proposal = None;
        self.reasons.extend(extra_reasons);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ci_half_width_is_non_negative() {
        let f = ForecastPoint {
            ts_ms: 0,
            horizon_minutes: 5,
            value_mmol: 6.0,
            ci_low_mmol: 7.0, // inverted interval from a buggy producer
            ci_high_mmol: 5.0,
            model_version: "m".into(),
        };
        assert_eq!(f.ci_half_width(), 0.0);
    }

    #[test]
    fn triggered_decision_carries_proposal() {
        let d = RuleDecision::triggered(
            RuleId::PostHypoReboundGuard,
            vec!["hypo_plus_rising_trend".into()],
            ActionProposal::temp_target(4.4, 60, "post_hypo_rebound"),
        );
        assert_eq!(d.state, DecisionState::Triggered);
        assert!(d.proposal.is_some());
    }

    #[test]
    fn downgrade_drops_proposal() {
        let mut d = RuleDecision::triggered(
            RuleId::PatternAdaptiveTarget,
            vec!["validated_risk_window".into()],
            ActionProposal::temp_target(5.0, 60, "pattern"),
        );
        d.downgrade_to_blocked(["kill_switch".to_string()]);
        assert_eq!(d.state, DecisionState::Blocked);
        assert!(d.proposal.is_none());
        assert!(d.reasons.iter().any(|r| r == "kill_switch"));
    }

    #[test]
    fn proposal_clamps_to_policy_range() {
        let p = ActionProposal::temp_target(25.0, 30, "runaway");
        assert_eq!(p.target_mmol, 10.0);
        let p = ActionProposal::temp_target(1.0, 30, "runaway");
        assert_eq!(p.target_mmol, 4.0);
    }

    #[test]
    fn rule_id_serializes_to_wire_identifier() {
        let json = serde_json::to_string(&RuleId::PostHypoReboundGuard).unwrap();
        assert_eq!(json, "\"PostHypoReboundGuard.v1\"");
        let back: RuleId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RuleId::PostHypoReboundGuard);
    }

    #[test]
    fn decision_serde_roundtrip() {
        let d = RuleDecision::no_match(RuleId::SegmentProfileGuard, "missing_segment");
        let json = serde_json::to_string(&d).unwrap();
        let back: RuleDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn active_target_match_tolerance() {
        let t = TempTarget {
            target_mmol: 4.4,
            duration_minutes: 60,
            started_ms: 0,
        };
        assert!(t.matches_target(4.41));
        assert!(!t.matches_target(4.5));
    }
}
