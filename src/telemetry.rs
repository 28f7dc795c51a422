//! Fuzzy resolution of loop telemetry keys.
//!
//! Upstream loops disagree on how they label the same scalar: `IOB`,
//! `iob_units`, `insulinOnBoard`, `insulin-on-board` all mean one thing.
//! Instead of reflective lookups, each metric carries an explicit alias
//! table and keys are normalized (lower-case, split on word boundaries
//! and camelCase humps, underscore-joined) before matching.
//!
//! Resolution order: exact normalized match against an alias, then
//! substring/token containment.  First map entry wins within each pass,
//! in the map's (sorted) key order, so resolution is deterministic.

use std::collections::BTreeMap;

/// Telemetry metrics the adaptive controller consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Unannounced-meal detection flag (truthy at >= 0.5).
    UamActive,
    /// Carbohydrates on board (grams).
    Cob,
    /// Insulin on board (units).
    Iob,
}

impl Metric {
    /// Normalized aliases, most specific first.
    const fn aliases(self) -> &'static [&'static str] {
        match self {
            Metric::UamActive => &["uam_active", "uam", "unannounced_meal", "uam_detected"],
            Metric::Cob => &["cob", "carbs_on_board", "active_carbs", "cob_grams"],
            Metric::Iob => &["iob", "insulin_on_board", "active_insulin", "iob_units"],
        }
    }
}

/// Lower-case, split on non-alphanumeric boundaries and camelCase humps,
/// join with underscores: `"insulinOnBoard"` → `"insulin_on_board"`.
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    let mut pending_sep = false;
    for ch in key.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && prev_lower {
                pending_sep = true;
            }
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            prev_lower = ch.is_lowercase() || ch.is_numeric();
        } else {
            pending_sep = true;
            prev_lower = false;
        }
    }
    out
}

/// Look up a metric in a free-form telemetry map.
pub fn resolve(map: &BTreeMap<String, f64>, metric: Metric) -> Option<f64> {
    let aliases = metric.aliases();
    let normalized: Vec<(String, f64)> = map
        .iter()
        .map(|(k, v)| (normalize_key(k), *v))
        .collect();

    // Pass 1: exact normalized match.
    for (key, value) in &normalized {
        if aliases.iter().any(|a| a == key) {
            return Some(*value);
        }
    }

    // Pass 2: token/substring containment, e.g. "loop_iob_units" or
    // "current_cob".
    for (key, value) in &normalized {
        let tokens: Vec<&str> = key.split('_').collect();
        for alias in aliases {
            if tokens.contains(alias) || key.contains(alias) {
                return Some(*value);
            }
        }
    }

    None
}

/// Convenience: resolve the UAM flag as a boolean.
pub fn resolve_uam_active(map: &BTreeMap<String, f64>) -> bool {
    resolve(map, Metric::UamActive).is_some_and(|v| v >= 0.5)
}
