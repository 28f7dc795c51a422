//! Engine configuration.
//!
//! All tunable parameters for the decision engine.  The host loads these
//! from its settings store and passes them into each evaluation cycle;
//! the engine never persists them itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::RuleId;

// ---------------------------------------------------------------------------
// Safety policy configuration
// ---------------------------------------------------------------------------

/// Hard guardrails applied to every proposed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyPolicyConfig {
    /// When set, every proposal is rejected regardless of content.
    pub kill_switch: bool,
    /// Maximum automated actions allowed in any trailing 6-hour window.
    pub max_actions_per_6h: u32,

    // --- Numeric bounds ---
    /// Lowest temp target a rule may set (mmol/L).
    pub min_target_mmol: f64,
    /// Highest temp target a rule may set (mmol/L).
    pub max_target_mmol: f64,
    /// Shortest allowed temp-target duration (minutes).
    pub min_duration_minutes: u32,
    /// Longest allowed temp-target duration (minutes).
    pub max_duration_minutes: u32,

    // --- Freshness ---
    /// Glucose data older than this is considered stale (minutes).
    pub stale_after_minutes: u32,
}

impl Default for SafetyPolicyConfig {
    fn default() -> Self {
        Self {
            kill_switch: false,
            max_actions_per_6h: 4,

            // Rule-level temp targets use the wide controller range, not
            // the narrower base-target product default of 4.4–8.0.
            min_target_mmol: 4.0,
            max_target_mmol: 10.0,
            min_duration_minutes: 15,
            max_duration_minutes: 180,

            stale_after_minutes: 15,
        }
    }
}

impl SafetyPolicyConfig {
    /// Helper for the host: derive the `data_fresh` flag from the latest
    /// glucose sample timestamp.
    pub fn data_is_fresh(&self, now_ms: i64, latest_sample_ms: i64) -> bool {
        let age_ms = now_ms.saturating_sub(latest_sample_ms);
        age_ms <= i64::from(self.stale_after_minutes) * 60_000
    }

    /// Reject configurations that would make the policy vacuous.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_target_mmol >= self.max_target_mmol {
            return Err(ConfigError::InvertedTargetBounds);
        }
        if self.min_duration_minutes >= self.max_duration_minutes {
            return Err(ConfigError::InvertedDurationBounds);
        }
        if self.min_target_mmol < 2.0 || self.max_target_mmol > 15.0 {
            return Err(ConfigError::TargetBoundsImplausible);
        }
        Ok(())
    }
}

/// Configuration validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `min_target_mmol >= max_target_mmol`.
    InvertedTargetBounds,
    /// `min_duration_minutes >= max_duration_minutes`.
    InvertedDurationBounds,
    /// Target bounds outside any physiologically plausible window.
    TargetBoundsImplausible,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvertedTargetBounds => write!(f, "min target must be below max target"),
            Self::InvertedDurationBounds => write!(f, "min duration must be below max duration"),
            Self::TargetBoundsImplausible => write!(f, "target bounds outside plausible range"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Rule runtime configuration
// ---------------------------------------------------------------------------

/// Per-rule enable flags, priorities, and cooldown windows.
///
/// Absent entries fall back to enabled / priority 0 / no cooldown, so an
/// empty config runs every rule at equal priority in registry order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleRuntimeConfig {
    /// Explicit enable flags; missing rules default to enabled.
    pub enabled: BTreeMap<RuleId, bool>,
    /// Arbitration priority (higher wins); missing rules default to 0.
    pub priorities: BTreeMap<RuleId, i32>,
    /// Minimum minutes between consecutive triggered executions of the
    /// same rule.  Enforced by `with_cooldowns_applied`, never by the
    /// engine itself.
    pub cooldown_minutes: BTreeMap<RuleId, u32>,
}

impl RuleRuntimeConfig {
    pub fn is_enabled(&self, rule: RuleId) -> bool {
        self.enabled.get(&rule).copied().unwrap_or(true)
    }

    pub fn priority_of(&self, rule: RuleId) -> i32 {
        self.priorities.get(&rule).copied().unwrap_or(0)
    }

    /// Explicit cooldown pre-filter, run by the host before each cycle.
    ///
    /// `last_triggered` maps each rule to the timestamp of its most recent
    /// triggered execution (from the persisted decision history).  Rules
    /// still inside their cooldown window come back disabled for this
    /// cycle; everything else is untouched.
    pub fn with_cooldowns_applied(
        &self,
        last_triggered: &BTreeMap<RuleId, i64>,
        now_ms: i64,
    ) -> Self {
        let mut out = self.clone();
        for rule in RuleId::ALL {
            let Some(cooldown) = self.cooldown_minutes.get(&rule) else {
                continue;
            };
            let Some(last) = last_triggered.get(&rule) else {
                continue;
            };
            let elapsed_ms = now_ms.saturating_sub(*last);
            if elapsed_ms < i64::from(*cooldown) * 60_000 {
                out.enabled.insert(rule, false);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Rule tuning
// ---------------------------------------------------------------------------

/// Per-rule tunable thresholds, carried inside the `RuleContext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTuning {
    // --- Post-hypo rebound guard ---
    /// Samples at or below this count as hypoglycaemia (mmol/L).
    pub post_hypo_threshold_mmol: f64,
    /// Minimum rise per ~5-minute step to count as a rebound (mmol/L).
    pub post_hypo_rebound_delta_mmol: f64,
    /// Temp target proposed on a detected rebound (mmol/L).
    pub post_hypo_target_mmol: f64,
    /// Duration of the rebound temp target (minutes).
    pub post_hypo_duration_minutes: u32,
    /// How far back to scan for the hypo sample (minutes).
    pub post_hypo_lookback_minutes: u32,

    // --- Pattern adaptive target ---
    /// Minimum |recommended − base| for the pattern rule to act (mmol/L).
    pub pattern_min_target_delta_mmol: f64,
    /// Duration of a pattern-driven temp target (minutes).
    pub pattern_duration_minutes: u32,

    // --- Segment profile guard ---
    /// Minimum segment-estimate confidence to act on.
    pub segment_min_confidence: f64,
    /// Duration of a segment-driven temp target (minutes).
    pub segment_duration_minutes: u32,

    // --- Adaptive controller ---
    /// Bound on the PI delta within one cycle (mmol/L).  Safety overrides
    /// are exempt: they may move the target anywhere in a single cycle.
    pub controller_max_step_mmol: f64,
}

impl Default for RuleTuning {
    fn default() -> Self {
        Self {
            post_hypo_threshold_mmol: 3.0,
            post_hypo_rebound_delta_mmol: 0.2,
            post_hypo_target_mmol: 4.4,
            post_hypo_duration_minutes: 60,
            post_hypo_lookback_minutes: 90,

            pattern_min_target_delta_mmol: 0.15,
            pattern_duration_minutes: 60,

            segment_min_confidence: 0.35,
            segment_duration_minutes: 60,

            controller_max_step_mmol: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_safety_config_is_sane() {
        let c = SafetyPolicyConfig::default();
        assert!(!c.kill_switch);
        assert!(c.max_actions_per_6h > 0);
        assert!(c.min_target_mmol < c.max_target_mmol);
        assert!(c.min_duration_minutes < c.max_duration_minutes);
        assert!(c.stale_after_minutes > 0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn default_tuning_is_sane() {
        let t = RuleTuning::default();
        assert!(t.post_hypo_threshold_mmol < t.post_hypo_target_mmol);
        assert!(t.post_hypo_rebound_delta_mmol > 0.0);
        assert!(t.post_hypo_lookback_minutes > 0);
        assert!(t.pattern_min_target_delta_mmol > 0.0);
        assert!(t.segment_min_confidence > 0.0 && t.segment_min_confidence < 1.0);
        assert!(t.controller_max_step_mmol > 0.0);
    }

    #[test]
    fn serde_roundtrip() {
        let c = SafetyPolicyConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: SafetyPolicyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c.max_actions_per_6h, c2.max_actions_per_6h);
        assert!((c.min_target_mmol - c2.min_target_mmol).abs() < 1e-9);

        let t = RuleTuning::default();
        let json = serde_json::to_string(&t).unwrap();
        let t2: RuleTuning = serde_json::from_str(&json).unwrap();
        assert_eq!(t.post_hypo_duration_minutes, t2.post_hypo_duration_minutes);
    }

    #[test]
    fn inverted_bounds_rejected() {
        let mut c = SafetyPolicyConfig::default();
        c.min_target_mmol = 9.0;
        c.max_target_mmol = 5.0;
        assert_eq!(c.validate(), Err(ConfigError::InvertedTargetBounds));

        let mut c = SafetyPolicyConfig::default();
        c.min_duration_minutes = 240;
        assert_eq!(c.validate(), Err(ConfigError::InvertedDurationBounds));
    }

    #[test]
    fn freshness_helper_uses_threshold() {
        let c = SafetyPolicyConfig::default();
        let now = 10_000_000;
        assert!(c.data_is_fresh(now, now - 14 * 60_000));
        assert!(!c.data_is_fresh(now, now - 16 * 60_000));
    }

    #[test]
    fn missing_rules_default_to_enabled_priority_zero() {
        let rc = RuleRuntimeConfig::default();
        for rule in RuleId::ALL {
            assert!(rc.is_enabled(rule));
            assert_eq!(rc.priority_of(rule), 0);
        }
    }

    #[test]
    fn cooldown_prefilter_disables_hot_rules() {
        let mut rc = RuleRuntimeConfig::default();
        rc.cooldown_minutes.insert(RuleId::PostHypoReboundGuard, 30);

        let now = 100 * 60_000;
        let mut last = BTreeMap::new();
        last.insert(RuleId::PostHypoReboundGuard, now - 10 * 60_000);

        let filtered = rc.with_cooldowns_applied(&last, now);
        assert!(!filtered.is_enabled(RuleId::PostHypoReboundGuard));
        // Other rules untouched.
        assert!(filtered.is_enabled(RuleId::AdaptiveTargetController));

        // Outside the window the rule comes back.
        last.insert(RuleId::PostHypoReboundGuard, now - 31 * 60_000);
        let filtered = rc.with_cooldowns_applied(&last, now);
        assert!(filtered.is_enabled(RuleId::PostHypoReboundGuard));
    }
}
