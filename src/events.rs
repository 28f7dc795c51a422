//! Outbound audit events.
//!
//! The engine emits these through the [`DecisionSink`] port; the host
//! decides where they go (decision-history table, UI feed, log file).
//! The engine itself never does I/O.

use crate::model::{ActionProposal, RuleDecision, RuleId};

/// Structured events emitted during one evaluation cycle.
#[derive(Debug, Clone)]
pub enum DecisionEvent {
    /// A proposal cleared the safety policy and won arbitration.
    ProposalAccepted {
        rule_id: RuleId,
        proposal: ActionProposal,
    },
    /// A triggered proposal was rejected by the safety policy.
    ProposalRejected {
        rule_id: RuleId,
        reasons: Vec<String>,
    },
    /// The full decision list for the cycle, after arbitration.
    CycleEvaluated { decisions: Vec<RuleDecision> },
}

/// Port for audit-event delivery.
pub trait DecisionSink {
    fn emit(&mut self, event: &DecisionEvent);
}

/// Sink that discards everything; used by `RuleEngine::evaluate` when
/// the host does not care about per-cycle events.
pub struct NullSink;

impl DecisionSink for NullSink {
    fn emit(&mut self, _event: &DecisionEvent) {}
}

/// Sink that collects events in memory, for tests and replay tooling.
#[derive(Default)]
pub struct VecSink {
    pub events: Vec<DecisionEvent>,
}

impl DecisionSink for VecSink {
    fn emit(&mut self, event: &DecisionEvent) {
        self.events.push(event.clone());
    }
}
