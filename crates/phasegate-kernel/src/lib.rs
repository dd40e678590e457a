//! `phasegate-kernel` – Governance & Audit
//!
//! The decision-and-audit core of Phasegate. It does not store projects or
//! render anything; it decides who may do what, records every attempt, and
//! proves what a gate decision was based on.
//!
//! # Modules
//!
//! - [`capability`] / [`capability_manager`] – deny-by-default capability
//!   model. Actor types are resolved from identifier prefixes or trusted
//!   overrides, never from the action itself.
//! - [`policy`] – the versioned policy tree: compilation, validation,
//!   fallback resolution and hashing.
//! - [`policy_enforcer`] – [`PolicyEnforcer`][policy_enforcer::PolicyEnforcer]:
//!   a rule engine that validates the business parameters of waiver and gate
//!   actions against the policy.
//! - [`evaluator`] / [`phase_state`] – pure derivations of artifact
//!   completion, gate readiness and phase lifecycle state.
//! - [`ledger`] – append-only SHA-256 hash chain with independent
//!   verification.
//! - [`proof`] – gate proofs and evidence binding.
//! - [`queue`] – optimistic-concurrency queue for agent-submitted work.
//! - [`kernel_gate`] – [`KernelGate`][kernel_gate::KernelGate]: the single
//!   mutation pipeline. Capability check, policy check and ledger logging in
//!   one call.
//!
//! Ledger appends, proof generation and policy revision are crate-private
//! and only reachable through [`kernel_gate`].

pub mod capability;
pub mod capability_manager;
pub mod evaluator;
pub mod hash;
pub mod kernel_gate;
pub mod ledger;
pub mod phase_state;
pub mod policy;
pub mod policy_enforcer;
pub mod proof;
pub mod queue;

mod internals;

pub use capability::{AccessDecision, CapabilitySet, check_access, resolve_actor_type};
pub use capability_manager::CapabilityManager;
pub use evaluator::{GateSummary, TemplateResolver, gate_summary, is_gate_ready};
pub use kernel_gate::{
    ActionOutcome, ActionResult, ActionVerdict, BatchOutcome, GateDecisionOutcome, GateDecisionRequest,
    GovernanceAction, KernelContext, KernelGate, PolicyChangeOutcome, QueueDrain, bootstrap_project_ledger,
    process_action, process_batch,
};
pub use ledger::{GENESIS_HASH, IntegrityReport, IntegrityViolation, Ledger, LedgerEntry, verify_ledger_integrity};
pub use phase_state::{compute_phase_state, evaluate_phase_state};
pub use policy::{CompiledPolicy, Policy, PolicyDocument, compile_policy, validate_policy};
pub use policy_enforcer::{PolicyAction, PolicyEnforcer, PolicyRule, PolicyVerdict, enforce_policy};
pub use proof::{GateProof, verify_evidence_binding, verify_proof};
pub use queue::{ActionQueue, QueueAction, QueueEntry, QueueStats, QueueStatus};
