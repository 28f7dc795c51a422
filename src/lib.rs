//! Glucoloop decision engine library.
//!
//! Pure decision logic for closed-loop temp-target automation: the host
//! assembles a [`context::RuleContext`] snapshot each cycle, calls
//! [`engine::RuleEngine::evaluate`], and enacts whichever proposal
//! survives the safety policy and arbitration. The engine itself does no
//! I/O and holds no clock; everything it knows arrives in the snapshot.

#![deny(unused_must_use)]

pub mod config;
pub mod context;
pub mod control;
pub mod engine;
pub mod events;
pub mod model;
pub mod rules;
pub mod safety;
pub mod telemetry;

pub use config::{RuleRuntimeConfig, RuleTuning, SafetyPolicyConfig};
pub use context::RuleContext;
pub use engine::RuleEngine;
pub use model::{ActionProposal, DecisionState, RuleDecision, RuleId};
pub use safety::{SafetyPolicy, SafetyVerdict};
