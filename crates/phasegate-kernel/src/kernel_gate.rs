//! [`KernelGate`] – the single mutation pipeline of the governance kernel.
//!
//! Every governance action an application wants to perform passes through
//! [`KernelGate::process_action`], which runs a fixed sequence:
//!
//! 1. **Capability check** ([`CapabilityManager`]): the acting identity's
//!    resolved type (or delegated grant set) must hold the capability the
//!    action type requires. On denial an `OVERRIDE_ATTEMPTED` event is
//!    appended and [`ActionResult::CapabilityDenied`] is returned.
//!
//! 2. **Policy check** ([`PolicyEnforcer`]): if the action carries business
//!    parameters, every registered policy rule must pass. On denial the same
//!    `OVERRIDE_ATTEMPTED` event shape is appended and
//!    [`ActionResult::PolicyBlocked`] is returned.
//!
//! 3. Otherwise [`ActionResult::Ok`] is returned with the ledger unchanged.
//!    Recording the successful business event is up to the caller, or done by
//!    one of the composite entrypoints below.
//!
//! The steps are not individually callable, so no caller can run the
//! capability check and skip the ledger.
//!
//! Composite entrypoints run the pipeline and then record the business event
//! themselves:
//!
//! | Entrypoint | Action | Event on success |
//! |------------|--------|------------------|
//! | [`KernelGate::process_gate_decision`] | `DECIDE_GATE` | `GATE_DECIDED` with bound proof |
//! | [`KernelGate::process_policy_change`] | `CHANGE_POLICY` | `POLICY_CHANGED` |
//! | [`KernelGate::process_ledger_export`] | `EXPORT_LEDGER` | `LEDGER_EXPORTED` |
//!
//! [`KernelGate::process_queue`] drains an [`ActionQueue`] through the same
//! pipeline, accepting or rejecting each entry by its verdict.
//!
//! # Example
//!
//! ```
//! use phasegate_kernel::{ActionResult, GovernanceAction, KernelContext, KernelGate};
//!
//! let gate = KernelGate::default();
//! let ctx = KernelContext::default();
//!
//! let denied = gate
//!     .process_action(&GovernanceAction::new("DECIDE_GATE", "agent:planner"), &ctx)
//!     .unwrap();
//! assert_eq!(denied.result, ActionResult::CapabilityDenied);
//! assert_eq!(denied.ledger.len(), 1);
//!
//! let ok = gate
//!     .process_action(&GovernanceAction::new("SUBMIT_ADVISORY", "agent:planner"), &ctx)
//!     .unwrap();
//! assert_eq!(ok.result, ActionResult::Ok);
//! assert!(ok.ledger.is_empty());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use phasegate_types::{ActionKind, Capability, DecisionStatus, EventKind, GovernanceMode, KernelError, Phase};

use crate::capability;
use crate::capability_manager::CapabilityManager;
use crate::evaluator::{self, TemplateResolver};
use crate::internals;
use crate::ledger::Ledger;
use crate::policy::{CompiledPolicy, Policy};
use crate::policy_enforcer::{self, PolicyAction, PolicyEnforcer};
use crate::proof::GateProof;
use crate::queue::{ActionQueue, QueueEntry};

// ────────────────────────────────────────────────────────────────────────────
// Inputs and outcomes
// ────────────────────────────────────────────────────────────────────────────

/// A governance action submitted to the kernel.
///
/// The action names who is acting but never what type of actor they are;
/// the type is resolved by the gate's [`CapabilityManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub agent_id: String,
    #[serde(
        default,
        deserialize_with = "policy_enforcer::deserialize_lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub policy_action: Option<PolicyAction>,
}

impl GovernanceAction {
    pub fn new(kind: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            agent_id: agent_id.into(),
            policy_action: None,
        }
    }

    pub fn with_policy(mut self, policy_action: PolicyAction) -> Self {
        self.policy_action = Some(policy_action);
        self
    }

    /// The action a queued entry stands for. The entry's payload carries the
    /// business parameters, and its `type` always names the policy action, so
    /// a queued waiver cannot skip enforcement by omitting or renaming it.
    pub fn from_queue_entry(entry: &QueueEntry) -> Result<Self, serde_json::Error> {
        let mut params = match &entry.payload {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        params.insert("type".to_string(), Value::from(entry.kind.clone()));
        let policy_action = PolicyAction::from_value(&Value::Object(params))?;
        Ok(Self::new(entry.kind.clone(), entry.agent_id.clone()).with_policy(policy_action))
    }
}

/// The state an action is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct KernelContext {
    pub ledger: Ledger,
    pub policy: Policy,
    /// Timestamp for any entry appended. `None` uses the current time.
    pub timestamp: Option<DateTime<Utc>>,
}

impl KernelContext {
    pub fn new(ledger: Ledger, policy: Policy) -> Self {
        Self {
            ledger,
            policy,
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionResult {
    Ok,
    PolicyBlocked,
    CapabilityDenied,
}

impl ActionResult {
    pub fn is_ok(&self) -> bool {
        *self == ActionResult::Ok
    }
}

/// Outcome of [`KernelGate::process_action`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub result: ActionResult,
    pub reason: String,
    /// The ledger after the action; grown by one entry on denial.
    pub ledger: Ledger,
}

/// Per-action verdict inside a [`BatchOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionVerdict {
    pub result: ActionResult,
    pub reason: String,
}

/// Outcome of [`KernelGate::process_queue`].
#[derive(Debug, Clone)]
pub struct QueueDrain {
    /// The queue with every drained entry accepted or rejected.
    pub queue: ActionQueue,
    /// Each drained entry, as resolved, with its verdict in sequence order.
    pub results: Vec<(QueueEntry, ActionVerdict)>,
    pub ledger: Ledger,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// One verdict per action, in input order.
    pub results: Vec<ActionVerdict>,
    pub ledger: Ledger,
}

/// Input to [`KernelGate::process_gate_decision`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecisionRequest {
    pub actor_id: String,
    pub decision: DecisionStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub governance_mode: Option<GovernanceMode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateDecisionOutcome {
    pub result: ActionResult,
    pub reason: String,
    pub ledger: Ledger,
    /// The proof bound into the `GATE_DECIDED` entry, when accepted.
    pub proof: Option<GateProof>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyChangeOutcome {
    pub result: ActionResult,
    pub reason: String,
    pub ledger: Ledger,
    /// The revised policy, when accepted.
    pub policy: Option<CompiledPolicy>,
}

// ────────────────────────────────────────────────────────────────────────────
// KernelGate
// ────────────────────────────────────────────────────────────────────────────

/// Capability and policy checks for a single project, composed into one
/// pipeline.
pub struct KernelGate {
    capability_manager: CapabilityManager,
    policy_enforcer: PolicyEnforcer,
}

impl Default for KernelGate {
    /// Prefix-resolved actor types and the standard policy rules.
    fn default() -> Self {
        Self::new(CapabilityManager::new())
    }
}

impl KernelGate {
    /// Construct a gate with the standard policy rules.
    pub fn new(capability_manager: CapabilityManager) -> Self {
        Self::with_enforcer(capability_manager, PolicyEnforcer::standard())
    }

    pub fn with_enforcer(capability_manager: CapabilityManager, policy_enforcer: PolicyEnforcer) -> Self {
        Self {
            capability_manager,
            policy_enforcer,
        }
    }

    pub fn capability_manager(&self) -> &CapabilityManager {
        &self.capability_manager
    }

    /// Run `action` through capability check, policy check and denial
    /// logging.
    ///
    /// # Errors
    ///
    /// Only [`KernelError`]s from the ledger append: an explicit context
    /// timestamp earlier than the ledger tip, or an unserializable payload.
    /// Denials are verdicts, never errors.
    #[instrument(skip_all, fields(actor = %action.agent_id, action = %action.kind))]
    pub fn process_action(
        &self,
        action: &GovernanceAction,
        ctx: &KernelContext,
    ) -> Result<ActionOutcome, KernelError> {
        let actor_type = self.capability_manager.resolve(&action.agent_id);
        let access = self.capability_manager.check(&action.agent_id, &action.kind);

        if !access.allowed {
            warn!(reason = %access.reason, "capability denied");
            let payload = json!({
                "actor_id": action.agent_id,
                "actor_type": actor_type.as_str(),
                "action_type": action.kind,
                "capability": access.capability.map(|c| c.as_str()),
                "stage": "capability",
                "reason": access.reason,
            });
            let ledger = self.log_override(ctx, &action.agent_id, payload)?;
            return Ok(ActionOutcome {
                result: ActionResult::CapabilityDenied,
                reason: access.reason,
                ledger,
            });
        }

        if let Some(policy_action) = &action.policy_action
            && let Err(violation) = self.policy_enforcer.check(policy_action, &ctx.policy)
        {
            warn!(rule = %violation.rule, reason = %violation.reason, "policy blocked");
            let payload = json!({
                "actor_id": action.agent_id,
                "actor_type": actor_type.as_str(),
                "action_type": action.kind,
                "capability": access.capability.map(|c| c.as_str()),
                "stage": "policy",
                "rule": violation.rule,
                "reason": violation.reason,
            });
            let ledger = self.log_override(ctx, &action.agent_id, payload)?;
            return Ok(ActionOutcome {
                result: ActionResult::PolicyBlocked,
                reason: violation.reason,
                ledger,
            });
        }

        debug!("action permitted");
        Ok(ActionOutcome {
            result: ActionResult::Ok,
            reason: access.reason,
            ledger: ctx.ledger.clone(),
        })
    }

    /// Fold [`Self::process_action`] over `actions`, threading the ledger.
    pub fn process_batch(
        &self,
        actions: &[GovernanceAction],
        ctx: &KernelContext,
    ) -> Result<BatchOutcome, KernelError> {
        let mut ctx = ctx.clone();
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            let outcome = self.process_action(action, &ctx)?;
            results.push(ActionVerdict {
                result: outcome.result,
                reason: outcome.reason,
            });
            ctx.ledger = outcome.ledger;
        }
        Ok(BatchOutcome {
            results,
            ledger: ctx.ledger,
        })
    }

    /// Drain every pending queue entry through the pipeline, oldest first.
    /// Permitted entries are accepted; denied ones are rejected with the
    /// denial reason. A payload that does not parse as the entry's policy
    /// action is rejected and logged with stage `validation`.
    pub fn process_queue(&self, queue: &ActionQueue, ctx: &KernelContext) -> Result<QueueDrain, KernelError> {
        let mut queue = queue.clone();
        let mut ctx = ctx.clone();
        let mut results = Vec::new();
        while let Some(entry) = queue.peek_next().cloned() {
            let verdict = match GovernanceAction::from_queue_entry(&entry) {
                Ok(action) => {
                    let outcome = self.process_action(&action, &ctx)?;
                    ctx.ledger = outcome.ledger;
                    ActionVerdict {
                        result: outcome.result,
                        reason: outcome.reason,
                    }
                }
                Err(e) => {
                    let reason = format!("Malformed {} payload: {e}", entry.kind);
                    warn!(entry = %entry.id, %reason, "queued action rejected");
                    let capability = capability::required_capability(&entry.kind);
                    ctx.ledger = self.log_invalid(&ctx, &entry.agent_id, &entry.kind, capability, &reason)?;
                    ActionVerdict {
                        result: ActionResult::PolicyBlocked,
                        reason,
                    }
                }
            };
            queue = if verdict.result.is_ok() {
                queue.accept(&entry.id)
            } else {
                queue.reject(&entry.id, &verdict.reason)
            };
            let resolved = queue.get(&entry.id).cloned().unwrap_or(entry);
            results.push((resolved, verdict));
        }
        debug!(drained = results.len(), "queue drained");
        Ok(QueueDrain {
            queue,
            results,
            ledger: ctx.ledger,
        })
    }

    /// Decide the gate of `phase`: run the pipeline, then generate a gate
    /// proof and append `GATE_DECIDED` with the proof hash bound into its
    /// payload.
    ///
    /// After the pipeline passes, the request itself is validated: a
    /// `pending` decision is never recorded, and a `go` requires every
    /// blocking artifact to be complete or waived. A failed validation is
    /// [`ActionResult::PolicyBlocked`] and logged with stage `validation`.
    pub fn process_gate_decision(
        &self,
        request: &GateDecisionRequest,
        phase: &Phase,
        resolver: &dyn TemplateResolver,
        ctx: &KernelContext,
    ) -> Result<GateDecisionOutcome, KernelError> {
        let action = GovernanceAction::new(ActionKind::DecideGate.as_str(), &request.actor_id).with_policy(
            PolicyAction::DecideGate {
                decision: request.decision,
                notes: request.notes.clone(),
                governance_mode: request.governance_mode,
                prior_no_go: phase.go_no_go_decision.status == DecisionStatus::NoGo,
            },
        );
        let outcome = self.process_action(&action, ctx)?;
        if !outcome.result.is_ok() {
            return Ok(GateDecisionOutcome {
                result: outcome.result,
                reason: outcome.reason,
                ledger: outcome.ledger,
                proof: None,
            });
        }

        let invalid = match request.decision {
            DecisionStatus::Pending => Some("Gate decision must be go or no-go, got pending".to_string()),
            DecisionStatus::Go if !evaluator::is_gate_ready(phase, resolver, &ctx.policy) => {
                let summary = evaluator::gate_summary(phase, resolver, &ctx.policy);
                Some(format!(
                    "Gate for {} is not ready: unresolved blocking artifacts {}",
                    phase.id,
                    summary.remaining.join(", ")
                ))
            }
            _ => None,
        };
        if let Some(reason) = invalid {
            warn!(phase = %phase.id, decision = ?request.decision, "gate decision rejected");
            let ledger = self.log_invalid(ctx, &request.actor_id, &action.kind, Some(Capability::GateDecide), &reason)?;
            return Ok(GateDecisionOutcome {
                result: ActionResult::PolicyBlocked,
                reason,
                ledger,
                proof: None,
            });
        }

        let evaluated_at = ctx.timestamp.unwrap_or_else(Utc::now);
        let proof = internals::generate_gate_proof(
            phase,
            resolver,
            &ctx.policy,
            request.decision,
            &request.notes,
            &request.actor_id,
            evaluated_at,
        )?;
        let payload = internals::bind_proof_to_payload(
            json!({
                "phase_id": phase.id,
                "phase_name": phase.name,
                "decision": request.decision,
                "notes": request.notes,
                "governance_mode": request.governance_mode,
                "policy_version": proof.policy_version,
            }),
            &proof,
        );
        let (ledger, entry) =
            internals::append_entry(&ctx.ledger, EventKind::GateDecided, payload, &request.actor_id, ctx.timestamp)?;
        info!(phase = %phase.id, sequence = entry.sequence, proof = %proof.proof_hash, "gate decided");

        Ok(GateDecisionOutcome {
            result: ActionResult::Ok,
            reason: format!("Gate for {} recorded at sequence {}", phase.id, entry.sequence),
            ledger,
            proof: Some(proof),
        })
    }

    /// Revise the context policy: run the pipeline, then produce the next
    /// policy version and append `POLICY_CHANGED` with both hashes.
    ///
    /// A revision that fails validation is blocked and logged like any other
    /// policy denial.
    pub fn process_policy_change(
        &self,
        actor_id: &str,
        changes: &Value,
        ctx: &KernelContext,
    ) -> Result<PolicyChangeOutcome, KernelError> {
        let action = GovernanceAction::new(ActionKind::ChangePolicy.as_str(), actor_id);
        let outcome = self.process_action(&action, ctx)?;
        if !outcome.result.is_ok() {
            return Ok(PolicyChangeOutcome {
                result: outcome.result,
                reason: outcome.reason,
                ledger: outcome.ledger,
                policy: None,
            });
        }

        let revised = internals::revise_policy(&ctx.policy, changes)?;
        if !revised.valid {
            let reason = format!("Policy revision rejected: {}", revised.errors.join("; "));
            warn!(errors = ?revised.errors, "policy revision invalid");
            let ledger = self.log_invalid(ctx, actor_id, &action.kind, Some(Capability::PolicyChange), &reason)?;
            return Ok(PolicyChangeOutcome {
                result: ActionResult::PolicyBlocked,
                reason,
                ledger,
                policy: None,
            });
        }

        let previous_hash = ctx.policy.hash()?;
        let payload = json!({
            "previous_version": ctx.policy.version(),
            "version": revised.policy.version(),
            "previous_hash": previous_hash,
            "hash": revised.hash,
            "changes": changes,
        });
        let (ledger, entry) =
            internals::append_entry(&ctx.ledger, EventKind::PolicyChanged, payload, actor_id, ctx.timestamp)?;
        info!(version = revised.policy.version(), sequence = entry.sequence, "policy changed");

        Ok(PolicyChangeOutcome {
            result: ActionResult::Ok,
            reason: format!("Policy revised to version {}", revised.policy.version()),
            ledger,
            policy: Some(revised),
        })
    }

    /// Record a ledger export: run the pipeline, then append
    /// `LEDGER_EXPORTED` naming the exported tip.
    pub fn process_ledger_export(&self, actor_id: &str, ctx: &KernelContext) -> Result<ActionOutcome, KernelError> {
        let action = GovernanceAction::new(ActionKind::ExportLedger.as_str(), actor_id);
        let outcome = self.process_action(&action, ctx)?;
        if !outcome.result.is_ok() {
            return Ok(outcome);
        }
        let payload = json!({
            "entries": ctx.ledger.len(),
            "tip_hash": ctx.ledger.tip().map(|e| e.hash.clone()),
        });
        let (ledger, _) =
            internals::append_entry(&ctx.ledger, EventKind::LedgerExported, payload, actor_id, ctx.timestamp)?;
        Ok(ActionOutcome {
            result: ActionResult::Ok,
            reason: outcome.reason,
            ledger,
        })
    }

    /// Log an attempt that passed the pipeline but failed request validation.
    fn log_invalid(
        &self,
        ctx: &KernelContext,
        actor_id: &str,
        action_type: &str,
        capability: Option<Capability>,
        reason: &str,
    ) -> Result<Ledger, KernelError> {
        let payload = json!({
            "actor_id": actor_id,
            "actor_type": self.capability_manager.resolve(actor_id).as_str(),
            "action_type": action_type,
            "capability": capability.map(|c| c.as_str()),
            "stage": "validation",
            "reason": reason,
        });
        self.log_override(ctx, actor_id, payload)
    }

    fn log_override(&self, ctx: &KernelContext, actor_id: &str, payload: Value) -> Result<Ledger, KernelError> {
        let (ledger, _) =
            internals::append_entry(&ctx.ledger, EventKind::OverrideAttempted, payload, actor_id, ctx.timestamp)?;
        Ok(ledger)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Free-function entrypoints
// ────────────────────────────────────────────────────────────────────────────

/// [`KernelGate::process_action`] with prefix-resolved actor types and the
/// standard policy rules.
pub fn process_action(action: &GovernanceAction, ctx: &KernelContext) -> Result<ActionOutcome, KernelError> {
    KernelGate::default().process_action(action, ctx)
}

/// [`KernelGate::process_batch`] with prefix-resolved actor types and the
/// standard policy rules.
pub fn process_batch(actions: &[GovernanceAction], ctx: &KernelContext) -> Result<BatchOutcome, KernelError> {
    KernelGate::default().process_batch(actions, ctx)
}

/// Start a project ledger with its `PROJECT_CREATED` genesis entry.
///
/// This is the one write that does not pass through the pipeline: there is
/// no ledger yet to log a denial into.
pub fn bootstrap_project_ledger(
    project_id: &str,
    project_name: &str,
    actor_id: &str,
    timestamp: Option<DateTime<Utc>>,
) -> Result<Ledger, KernelError> {
    let entry = internals::create_genesis_entry(
        EventKind::ProjectCreated,
        json!({ "project_id": project_id, "name": project_name }),
        actor_id,
        timestamp,
    )?;
    info!(project = project_id, hash = %entry.hash, "project ledger created");
    Ok(Ledger::from_entries(vec![entry]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{GENESIS_HASH, LedgerEntry, verify_ledger_integrity};
    use crate::policy::compile_policy;
    use crate::proof::verify_evidence_binding;
    use crate::queue::{QueueAction, QueueStatus};
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use phasegate_types::{ActorType, Artifact, TemplateResolution, Waiver};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 10, 8, 0, 0).unwrap()
    }

    fn ctx() -> KernelContext {
        let ledger = bootstrap_project_ledger("proj-1", "Atlas", "human:alice", Some(t0())).unwrap();
        KernelContext::new(ledger, Policy::default()).at(t0() + Duration::minutes(1))
    }

    fn waiver(rationale: &str) -> PolicyAction {
        PolicyAction::ApplyWaiver {
            rationale: rationale.into(),
            category: None,
            current_phase_waivers: 0,
        }
    }

    fn no_template(_: &Phase, _: &Artifact) -> TemplateResolution {
        TemplateResolution::default()
    }

    #[test]
    fn agent_gate_decision_is_denied_and_logged() {
        let ctx = ctx();
        let out = process_action(&GovernanceAction::new("DECIDE_GATE", "agent:x"), &ctx).unwrap();
        assert_eq!(out.result, ActionResult::CapabilityDenied);
        assert_eq!(out.ledger.len(), ctx.ledger.len() + 1);

        let entry = out.ledger.tip().unwrap();
        assert_eq!(entry.kind, EventKind::OverrideAttempted);
        assert_eq!(entry.actor_id, "agent:x");
        assert_eq!(entry.payload["actor_type"], json!("agent"));
        assert_eq!(entry.payload["capability"], json!("gate-decide"));
        assert_eq!(entry.payload["stage"], json!("capability"));
        assert!(verify_ledger_integrity(&out.ledger).valid);
    }

    #[test]
    fn short_waiver_is_policy_blocked_and_logged() {
        let ctx = ctx();
        let action = GovernanceAction::new("APPLY_WAIVER", "human:alice").with_policy(waiver("too short"));
        let out = process_action(&action, &ctx).unwrap();
        assert_eq!(out.result, ActionResult::PolicyBlocked);
        assert!(out.reason.contains("at least 20"));
        let entry = out.ledger.tip().unwrap();
        assert_eq!(entry.kind, EventKind::OverrideAttempted);
        assert_eq!(entry.payload["stage"], json!("policy"));
        assert_eq!(entry.payload["actor_type"], json!("human"));
    }

    #[test]
    fn permitted_action_leaves_ledger_unchanged() {
        let ctx = ctx();
        let action = GovernanceAction::new("APPLY_WAIVER", "human:alice")
            .with_policy(waiver("Vendor provides this control under contract"));
        let out = process_action(&action, &ctx).unwrap();
        assert_eq!(out.result, ActionResult::Ok);
        assert_eq!(out.ledger, ctx.ledger);
    }

    #[test]
    fn waiver_at_minimum_passes() {
        let ctx = ctx();
        let action = GovernanceAction::new("APPLY_WAIVER", "human:alice").with_policy(waiver(&"x".repeat(20)));
        assert_eq!(process_action(&action, &ctx).unwrap().result, ActionResult::Ok);
    }

    #[test]
    fn unprefixed_identities_fail_closed() {
        let ctx = ctx();
        for actor in ["admin", "root", ""] {
            for kind in ["DECIDE_GATE", "APPLY_WAIVER"] {
                let out = process_action(&GovernanceAction::new(kind, actor), &ctx).unwrap();
                assert_eq!(out.result, ActionResult::CapabilityDenied, "{actor} {kind}");
            }
        }
    }

    #[test]
    fn agents_may_only_advise() {
        let ctx = ctx();
        for actor in ["agent:x", "openclaw:x", "integration:ci"] {
            let denied = process_action(&GovernanceAction::new("DECIDE_GATE", actor), &ctx).unwrap();
            assert_eq!(denied.result, ActionResult::CapabilityDenied);
            let ok = process_action(&GovernanceAction::new("SUBMIT_ADVISORY", actor), &ctx).unwrap();
            assert_eq!(ok.result, ActionResult::Ok);
        }
        let human = process_action(&GovernanceAction::new("DECIDE_GATE", "human:alice"), &ctx).unwrap();
        assert_eq!(human.result, ActionResult::Ok);
    }

    #[test]
    fn unknown_action_is_denied() {
        let out = process_action(&GovernanceAction::new("DROP_TABLES", "human:alice"), &ctx()).unwrap();
        assert_eq!(out.result, ActionResult::CapabilityDenied);
        assert_eq!(out.ledger.tip().unwrap().payload["capability"], json!("unknown-action"));
    }

    #[test]
    fn capability_check_runs_before_policy() {
        let action = GovernanceAction::new("APPLY_WAIVER", "agent:x").with_policy(waiver("short"));
        let out = process_action(&action, &ctx()).unwrap();
        assert_eq!(out.result, ActionResult::CapabilityDenied);
    }

    #[test]
    fn delegated_grant_and_type_override_are_honoured() {
        let mut caps = CapabilityManager::new();
        caps.grant("agent:release-bot", Capability::GateDecide);
        caps.assign_type("ops-lead", ActorType::Human);
        let gate = KernelGate::new(caps);
        let ctx = ctx();

        let bot = gate.process_action(&GovernanceAction::new("DECIDE_GATE", "agent:release-bot"), &ctx).unwrap();
        assert_eq!(bot.result, ActionResult::Ok);
        let lead = gate.process_action(&GovernanceAction::new("APPLY_WAIVER", "ops-lead"), &ctx).unwrap();
        assert_eq!(lead.result, ActionResult::Ok);
    }

    #[test]
    fn batch_threads_ledger_in_order() {
        let ctx = ctx();
        let actions = vec![
            GovernanceAction::new("DECIDE_GATE", "agent:a"),
            GovernanceAction::new("SUBMIT_ADVISORY", "agent:a"),
            GovernanceAction::new("APPLY_WAIVER", "human:bob").with_policy(waiver("nope")),
        ];
        let out = process_batch(&actions, &ctx).unwrap();
        let results: Vec<ActionResult> = out.results.iter().map(|r| r.result).collect();
        assert_eq!(
            results,
            vec![ActionResult::CapabilityDenied, ActionResult::Ok, ActionResult::PolicyBlocked]
        );
        assert_eq!(out.ledger.len(), ctx.ledger.len() + 2);
        assert!(verify_ledger_integrity(&out.ledger).valid);
    }

    #[test]
    fn stale_context_timestamp_is_an_error() {
        let ctx = ctx().at(t0() - Duration::days(1));
        let err = process_action(&GovernanceAction::new("DECIDE_GATE", "agent:x"), &ctx).unwrap_err();
        assert!(matches!(err, KernelError::TimestampRegression { .. }));
    }

    #[test]
    fn denial_on_exhausted_ledger_is_an_error() {
        let mut entries = ctx().ledger.entries().to_vec();
        entries[0].sequence = u64::MAX;
        let ctx = KernelContext::new(Ledger::from_entries(entries), Policy::default());
        let err = process_action(&GovernanceAction::new("DECIDE_GATE", "agent:x"), &ctx).unwrap_err();
        assert_eq!(err, KernelError::SequenceOverflow { sequence: u64::MAX });
    }

    #[test]
    fn bootstrap_writes_genesis() {
        let ledger = bootstrap_project_ledger("proj-9", "Zephyr", "human:carol", None).unwrap();
        assert_eq!(ledger.len(), 1);
        let genesis = &ledger.entries()[0];
        assert_eq!(genesis.kind, EventKind::ProjectCreated);
        assert_eq!(genesis.prev_hash, GENESIS_HASH);
        assert_eq!(genesis.payload["project_id"], json!("proj-9"));
        assert!(verify_ledger_integrity(&ledger).valid);
    }

    fn launch_phase() -> Phase {
        Phase {
            id: "launch".into(),
            name: "Launch".into(),
            artifacts: vec![Artifact {
                id: "runbook".into(),
                name: "Runbook".into(),
                gate_blocking: true,
                waiver: Some(Waiver {
                    waived: true,
                    rationale: "Existing on-call runbook covers this service".into(),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn gate_decision_binds_proof_into_ledger() {
        let ctx = ctx();
        let request = GateDecisionRequest {
            actor_id: "human:alice".into(),
            decision: DecisionStatus::Go,
            notes: "All blocking artifacts resolved".into(),
            governance_mode: Some(GovernanceMode::Team),
        };
        let out = KernelGate::default()
            .process_gate_decision(&request, &launch_phase(), &no_template, &ctx)
            .unwrap();
        assert_eq!(out.result, ActionResult::Ok);
        let proof = out.proof.unwrap();
        let entry = out.ledger.tip().unwrap();
        assert_eq!(entry.kind, EventKind::GateDecided);
        assert!(verify_evidence_binding(entry, &proof).valid);
        assert!(verify_ledger_integrity(&out.ledger).valid);
    }

    #[test]
    fn solo_decision_needs_attestation_notes() {
        let request = GateDecisionRequest {
            actor_id: "human:alice".into(),
            decision: DecisionStatus::Go,
            notes: "ok".into(),
            governance_mode: Some(GovernanceMode::Solo),
        };
        let out = KernelGate::default()
            .process_gate_decision(&request, &launch_phase(), &no_template, &ctx())
            .unwrap();
        assert_eq!(out.result, ActionResult::PolicyBlocked);
        assert!(out.proof.is_none());
        assert_eq!(out.ledger.tip().unwrap().kind, EventKind::OverrideAttempted);
    }

    #[test]
    fn agent_gate_decision_produces_no_proof() {
        let request = GateDecisionRequest {
            actor_id: "agent:x".into(),
            decision: DecisionStatus::Go,
            notes: String::new(),
            governance_mode: None,
        };
        let out = KernelGate::default()
            .process_gate_decision(&request, &launch_phase(), &no_template, &ctx())
            .unwrap();
        assert_eq!(out.result, ActionResult::CapabilityDenied);
        assert!(out.proof.is_none());
    }

    #[test]
    fn policy_change_bumps_version_and_logs_hashes() {
        let ctx = KernelContext {
            policy: compile_policy(None).unwrap().policy,
            ..ctx()
        };
        let changes = json!({ "waiver": { "rationale_min_length": 40 } });
        let out = KernelGate::default().process_policy_change("human:alice", &changes, &ctx).unwrap();
        assert_eq!(out.result, ActionResult::Ok);
        let revised = out.policy.unwrap();
        assert_eq!(revised.policy.version(), 2);
        assert_eq!(revised.policy.waiver_min_length(None), 40);

        let entry = out.ledger.tip().unwrap();
        assert_eq!(entry.kind, EventKind::PolicyChanged);
        assert_eq!(entry.payload["previous_version"], json!(1));
        assert_eq!(entry.payload["version"], json!(2));
        assert_eq!(entry.payload["hash"], json!(revised.hash));
        assert_ne!(entry.payload["previous_hash"], entry.payload["hash"]);
    }

    #[test]
    fn invalid_policy_change_is_blocked() {
        let changes = json!({ "waiver": { "rationale_min_length": -5 } });
        let out = KernelGate::default().process_policy_change("human:alice", &changes, &ctx()).unwrap();
        assert_eq!(out.result, ActionResult::PolicyBlocked);
        assert!(out.policy.is_none());
        assert_eq!(out.ledger.tip().unwrap().payload["stage"], json!("validation"));
    }

    #[test]
    fn agents_cannot_change_policy() {
        let out = KernelGate::default()
            .process_policy_change("agent:x", &json!({}), &ctx())
            .unwrap();
        assert_eq!(out.result, ActionResult::CapabilityDenied);
    }

    #[test]
    fn ledger_export_is_recorded() {
        let ctx = ctx();
        let out = KernelGate::default().process_ledger_export("human:alice", &ctx).unwrap();
        assert_eq!(out.result, ActionResult::Ok);
        let entry = out.ledger.tip().unwrap();
        assert_eq!(entry.kind, EventKind::LedgerExported);
        assert_eq!(entry.payload["entries"], json!(1));

        let denied = KernelGate::default().process_ledger_export("agent:x", &ctx).unwrap();
        assert_eq!(denied.result, ActionResult::CapabilityDenied);
    }

    #[test]
    fn action_wire_shape() {
        let action: GovernanceAction = serde_json::from_value(json!({
            "type": "APPLY_WAIVER",
            "agentId": "human:alice",
            "policyAction": { "type": "APPLY_WAIVER", "rationale": "Covered by vendor SLA terms" }
        }))
        .unwrap();
        assert_eq!(action.kind, "APPLY_WAIVER");
        assert!(matches!(action.policy_action, Some(PolicyAction::ApplyWaiver { .. })));
    }

    #[test]
    fn action_without_policy_type_is_unenforced() {
        let action: GovernanceAction = serde_json::from_value(json!({
            "type": "APPLY_WAIVER",
            "agentId": "human:alice",
            "policyAction": { "rationale": "x" }
        }))
        .unwrap();
        assert_eq!(action.policy_action, Some(PolicyAction::Unenforced));
        assert_eq!(process_action(&action, &ctx()).unwrap().result, ActionResult::Ok);

        let action: GovernanceAction =
            serde_json::from_value(json!({ "type": "READ_LEDGER", "agentId": "agent:x", "policyAction": null }))
                .unwrap();
        assert!(action.policy_action.is_none());
    }

    fn empty_blocking_phase() -> Phase {
        Phase {
            id: "build".into(),
            name: "Build".into(),
            artifacts: vec![Artifact {
                id: "design-doc".into(),
                name: "Design doc".into(),
                gate_blocking: true,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn team_request(decision: DecisionStatus) -> GateDecisionRequest {
        GateDecisionRequest {
            actor_id: "human:alice".into(),
            decision,
            notes: "Reviewed in weekly gate meeting".into(),
            governance_mode: Some(GovernanceMode::Team),
        }
    }

    #[test]
    fn go_on_unready_gate_is_blocked() {
        let ctx = ctx();
        let out = KernelGate::default()
            .process_gate_decision(&team_request(DecisionStatus::Go), &empty_blocking_phase(), &no_template, &ctx)
            .unwrap();
        assert_eq!(out.result, ActionResult::PolicyBlocked);
        assert!(out.proof.is_none());
        assert!(out.reason.contains("design-doc"));

        let entry = out.ledger.tip().unwrap();
        assert_eq!(entry.kind, EventKind::OverrideAttempted);
        assert_eq!(entry.payload["stage"], json!("validation"));
        assert_eq!(entry.payload["capability"], json!("gate-decide"));
        assert!(out.ledger.entries_of_kind(EventKind::GateDecided).next().is_none());
    }

    #[test]
    fn no_go_on_unready_gate_is_recorded() {
        let out = KernelGate::default()
            .process_gate_decision(&team_request(DecisionStatus::NoGo), &empty_blocking_phase(), &no_template, &ctx())
            .unwrap();
        assert_eq!(out.result, ActionResult::Ok);
        assert_eq!(out.ledger.tip().unwrap().kind, EventKind::GateDecided);
    }

    #[test]
    fn pending_decision_is_never_recorded() {
        let out = KernelGate::default()
            .process_gate_decision(&team_request(DecisionStatus::Pending), &launch_phase(), &no_template, &ctx())
            .unwrap();
        assert_eq!(out.result, ActionResult::PolicyBlocked);
        assert!(out.proof.is_none());
        let entry = out.ledger.tip().unwrap();
        assert_eq!(entry.kind, EventKind::OverrideAttempted);
        assert_eq!(entry.payload["stage"], json!("validation"));
    }

    fn queued(agent: &str, kind: &str, payload: Value) -> QueueAction {
        QueueAction {
            agent_id: agent.into(),
            kind: kind.into(),
            target_artifact_id: None,
            expected_revision: None,
            payload,
        }
    }

    fn enqueue(actions: Vec<QueueAction>) -> ActionQueue {
        actions.into_iter().fold(ActionQueue::default(), |q, a| q.submit(a, &HashMap::new()).queue)
    }

    #[test]
    fn queued_short_waiver_is_enforced_and_rejected() {
        let ctx = ctx();
        let queue = enqueue(vec![
            queued("human:bob", "APPLY_WAIVER", json!({ "type": "APPLY_WAIVER", "rationale": "x" })),
            queued("agent:a", "DECIDE_GATE", json!({})),
            queued("agent:a", "SUBMIT_ADVISORY", json!({ "note": "consider a rollback plan" })),
        ]);
        let drain = KernelGate::default().process_queue(&queue, &ctx).unwrap();

        let results: Vec<ActionResult> = drain.results.iter().map(|(_, v)| v.result).collect();
        assert_eq!(
            results,
            vec![ActionResult::PolicyBlocked, ActionResult::CapabilityDenied, ActionResult::Ok]
        );
        let (waiver_entry, verdict) = &drain.results[0];
        assert_eq!(waiver_entry.status, QueueStatus::Rejected);
        assert_eq!(waiver_entry.rejection_reason.as_deref(), Some(verdict.reason.as_str()));

        let stats = drain.queue.stats();
        assert_eq!((stats.accepted, stats.rejected, stats.pending), (1, 2, 0));

        assert_eq!(drain.ledger.len(), ctx.ledger.len() + 2);
        let logged: Vec<&LedgerEntry> = drain.ledger.entries_of_kind(EventKind::OverrideAttempted).collect();
        assert_eq!(logged[0].payload["stage"], json!("policy"));
        assert_eq!(logged[1].payload["stage"], json!("capability"));
        assert!(verify_ledger_integrity(&drain.ledger).valid);
    }

    #[test]
    fn queued_payload_type_cannot_dodge_enforcement() {
        for payload in [json!({ "rationale": "x" }), json!({ "type": "NOTE", "rationale": "x" }), json!(null)] {
            let queue = enqueue(vec![queued("human:bob", "APPLY_WAIVER", payload.clone())]);
            let drain = KernelGate::default().process_queue(&queue, &ctx()).unwrap();
            assert_eq!(drain.results[0].1.result, ActionResult::PolicyBlocked, "{payload}");
        }
    }

    #[test]
    fn malformed_queued_payload_is_rejected_and_logged() {
        let queue = enqueue(vec![queued("human:bob", "APPLY_WAIVER", json!({ "rationale": 42 }))]);
        let drain = KernelGate::default().process_queue(&queue, &ctx()).unwrap();
        let (entry, verdict) = &drain.results[0];
        assert_eq!(verdict.result, ActionResult::PolicyBlocked);
        assert_eq!(entry.status, QueueStatus::Rejected);
        let logged = drain.ledger.tip().unwrap();
        assert_eq!(logged.kind, EventKind::OverrideAttempted);
        assert_eq!(logged.payload["stage"], json!("validation"));
        assert_eq!(logged.payload["capability"], json!("waiver-apply"));
    }

    #[test]
    fn empty_queue_drains_to_nothing() {
        let ctx = ctx();
        let drain = KernelGate::default().process_queue(&ActionQueue::default(), &ctx).unwrap();
        assert!(drain.results.is_empty());
        assert_eq!(drain.ledger, ctx.ledger);
    }
}
