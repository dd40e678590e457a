//! Phase lifecycle state.
//!
//! Three states, always recomputed from current data and never stored:
//!
//! | State | Condition |
//! |-------|-----------|
//! | `Decided` | the go/no-go decision is `go` or `no-go` |
//! | `Ready` | no decision yet, and the gate is ready |
//! | `Locked` | otherwise |
//!
//! A recorded decision takes priority over readiness, so later edits to the
//! artifacts never retroactively un-decide a phase.

use phasegate_types::{Phase, PhaseState};

use crate::evaluator::{self, TemplateResolver};
use crate::policy::Policy;

/// Derive the state of `phase` given its current gate readiness.
pub fn compute_phase_state(phase: &Phase, gate_ready: bool) -> PhaseState {
    if phase.go_no_go_decision.status.is_decided() {
        PhaseState::Decided
    } else if gate_ready {
        PhaseState::Ready
    } else {
        PhaseState::Locked
    }
}

/// Evaluate gate readiness and derive the state in one call.
pub fn evaluate_phase_state(phase: &Phase, resolver: &dyn TemplateResolver, policy: &Policy) -> PhaseState {
    compute_phase_state(phase, evaluator::is_gate_ready(phase, resolver, policy))
}
