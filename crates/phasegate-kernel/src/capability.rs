//! Capability model: which actor type holds which capabilities, and which
//! capability each action kind requires.
//!
//! Everything here is deny-by-default. An actor whose type cannot be resolved
//! holds nothing, and an action type the kernel does not recognise requires
//! [`Capability::UnknownAction`], which no actor type is ever granted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use phasegate_types::{ActionKind, ActorType, Capability};

/// An unordered set of capabilities.
pub type CapabilitySet = BTreeSet<Capability>;

/// Identifier prefixes that resolve to [`ActorType::Human`].
pub const HUMAN_PREFIXES: &[&str] = &["human:"];

/// Identifier prefixes that resolve to [`ActorType::Agent`].
pub const AGENT_PREFIXES: &[&str] = &["agent:", "openclaw:", "integration:"];

const HUMAN_CAPABILITIES: &[Capability] = &[
    Capability::GateDecide,
    Capability::WaiverApply,
    Capability::WaiverRemove,
    Capability::PolicyRead,
    Capability::PolicyChange,
    Capability::ArtifactRead,
    Capability::ArtifactWrite,
    Capability::AdvisorySubmit,
    Capability::LedgerRead,
    Capability::LedgerExport,
];

// Advisory only: nothing here mutates governance state.
const AGENT_CAPABILITIES: &[Capability] = &[
    Capability::AdvisorySubmit,
    Capability::ArtifactRead,
    Capability::LedgerRead,
];

/// Default capability set for an actor type. `None` yields the empty set.
pub fn capabilities_for(actor_type: Option<ActorType>) -> CapabilitySet {
    let caps = match actor_type {
        Some(ActorType::Human) => HUMAN_CAPABILITIES,
        Some(ActorType::Agent) => AGENT_CAPABILITIES,
        None => &[],
    };
    caps.iter().copied().collect()
}

/// Map an action type (wire name) to the capability it requires.
///
/// | Action | Required [`Capability`] |
/// |--------|------------------------|
/// | `DECIDE_GATE` | `gate-decide` |
/// | `APPLY_WAIVER` | `waiver-apply` |
/// | `REMOVE_WAIVER` | `waiver-remove` |
/// | `UPDATE_ARTIFACT` | `artifact-write` |
/// | `READ_ARTIFACT` | `artifact-read` |
/// | `SUBMIT_ADVISORY` | `advisory-submit` |
/// | `READ_LEDGER` | `ledger-read` |
/// | `EXPORT_LEDGER` | `ledger-export` |
/// | `READ_POLICY` | `policy-read` |
/// | `CHANGE_POLICY` | `policy-change` |
/// | `HEARTBEAT` | none |
/// | anything else | `unknown-action` |
pub fn required_capability(action_type: &str) -> Option<Capability> {
    let Some(kind) = ActionKind::parse(action_type) else {
        return Some(Capability::UnknownAction);
    };
    match kind {
        ActionKind::DecideGate => Some(Capability::GateDecide),
        ActionKind::ApplyWaiver => Some(Capability::WaiverApply),
        ActionKind::RemoveWaiver => Some(Capability::WaiverRemove),
        ActionKind::UpdateArtifact => Some(Capability::ArtifactWrite),
        ActionKind::ReadArtifact => Some(Capability::ArtifactRead),
        ActionKind::SubmitAdvisory => Some(Capability::AdvisorySubmit),
        ActionKind::ReadLedger => Some(Capability::LedgerRead),
        ActionKind::ExportLedger => Some(Capability::LedgerExport),
        ActionKind::ReadPolicy => Some(Capability::PolicyRead),
        ActionKind::ChangePolicy => Some(Capability::PolicyChange),
        ActionKind::Heartbeat => None,
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    /// The capability that was required, if any.
    pub capability: Option<Capability>,
}

/// Check whether an actor may perform `action_type`.
///
/// `capabilities`, when supplied, replaces the actor type's default set
/// (custom or delegated grants).
pub fn check_access(
    actor_type: Option<ActorType>,
    capabilities: Option<&CapabilitySet>,
    action_type: &str,
) -> AccessDecision {
    let Some(required) = required_capability(action_type) else {
        return AccessDecision {
            allowed: true,
            reason: format!("{action_type} requires no capability"),
            capability: None,
        };
    };

    let held = match capabilities {
        Some(set) => set.contains(&required),
        None => capabilities_for(actor_type).contains(&required),
    };
    let who = actor_type.map(|t| t.as_str()).unwrap_or("unresolved actor");

    if held {
        AccessDecision {
            allowed: true,
            reason: format!("{who} holds {required}"),
            capability: Some(required),
        }
    } else if required == Capability::UnknownAction {
        AccessDecision {
            allowed: false,
            reason: format!("Unknown action type '{action_type}' is denied"),
            capability: Some(required),
        }
    } else {
        AccessDecision {
            allowed: false,
            reason: format!("Capability denied: {who} lacks {required} required by {action_type}"),
            capability: Some(required),
        }
    }
}

/// Resolve the actor type of `actor_id`.
///
/// An explicit type wins. Otherwise the identifier prefix decides, and
/// anything unrecognised (including `""`, `"admin"` or `"root"`) resolves to
/// the lowest-privilege type, [`ActorType::Agent`].
///
/// ```
/// use phasegate_kernel::capability::resolve_actor_type;
/// use phasegate_types::ActorType;
///
/// assert_eq!(resolve_actor_type("human:alice", None), ActorType::Human);
/// assert_eq!(resolve_actor_type("openclaw:bot", None), ActorType::Agent);
/// assert_eq!(resolve_actor_type("root", None), ActorType::Agent);
/// ```
pub fn resolve_actor_type(actor_id: &str, explicit: Option<ActorType>) -> ActorType {
    if let Some(t) = explicit {
        return t;
    }
    if HUMAN_PREFIXES.iter().any(|p| actor_id.starts_with(p)) {
        return ActorType::Human;
    }
    if AGENT_PREFIXES.iter().any(|p| actor_id.starts_with(p)) {
        return ActorType::Agent;
    }
    ActorType::Agent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_holds_full_governance_set() {
        let caps = capabilities_for(Some(ActorType::Human));
        for cap in HUMAN_CAPABILITIES {
            assert!(caps.contains(cap));
        }
        assert!(!caps.contains(&Capability::UnknownAction));
    }

    #[test]
    fn agent_lacks_every_mutating_capability() {
        let caps = capabilities_for(Some(ActorType::Agent));
        assert_eq!(caps.len(), 3);
        for cap in [
            Capability::GateDecide,
            Capability::WaiverApply,
            Capability::WaiverRemove,
            Capability::ArtifactWrite,
            Capability::PolicyChange,
            Capability::LedgerExport,
        ] {
            assert!(!caps.contains(&cap), "agent must not hold {cap}");
        }
    }

    #[test]
    fn unresolved_actor_holds_nothing() {
        assert!(capabilities_for(None).is_empty());
        let decision = check_access(None, None, "READ_LEDGER");
        assert!(!decision.allowed);
    }

    #[test]
    fn unknown_action_maps_to_sentinel() {
        assert_eq!(required_capability("NUKE_PROJECT"), Some(Capability::UnknownAction));
        assert_eq!(required_capability(""), Some(Capability::UnknownAction));
        let decision = check_access(Some(ActorType::Human), None, "NUKE_PROJECT");
        assert!(!decision.allowed);
        assert_eq!(decision.capability, Some(Capability::UnknownAction));
    }

    #[test]
    fn heartbeat_is_unrestricted() {
        assert_eq!(required_capability("HEARTBEAT"), None);
        let decision = check_access(None, None, "HEARTBEAT");
        assert!(decision.allowed);
        assert!(decision.capability.is_none());
    }

    #[test]
    fn explicit_capability_set_overrides_defaults() {
        let mut delegated = CapabilitySet::new();
        delegated.insert(Capability::GateDecide);
        let decision = check_access(Some(ActorType::Agent), Some(&delegated), "DECIDE_GATE");
        assert!(decision.allowed);

        // The override replaces, it does not extend.
        let decision = check_access(Some(ActorType::Human), Some(&delegated), "APPLY_WAIVER");
        assert!(!decision.allowed);
    }

    #[test]
    fn denial_reason_names_capability() {
        let decision = check_access(Some(ActorType::Agent), None, "DECIDE_GATE");
        assert!(!decision.allowed);
        assert!(decision.reason.contains("gate-decide"));
        assert_eq!(decision.capability, Some(Capability::GateDecide));
    }

    #[test]
    fn resolve_by_prefix() {
        assert_eq!(resolve_actor_type("human:alice", None), ActorType::Human);
        assert_eq!(resolve_actor_type("agent:x", None), ActorType::Agent);
        assert_eq!(resolve_actor_type("openclaw:x", None), ActorType::Agent);
        assert_eq!(resolve_actor_type("integration:ci", None), ActorType::Agent);
    }

    #[test]
    fn unrecognised_ids_fail_closed() {
        for id in ["admin", "root", "", "administrator", "Human:alice", "humans"] {
            assert_eq!(resolve_actor_type(id, None), ActorType::Agent, "id {id:?}");
        }
    }

    #[test]
    fn explicit_type_wins_over_prefix() {
        assert_eq!(
            resolve_actor_type("agent:x", Some(ActorType::Human)),
            ActorType::Human
        );
        assert_eq!(
            resolve_actor_type("human:alice", Some(ActorType::Agent)),
            ActorType::Agent
        );
    }

    #[test]
    fn mapping_covers_every_action_kind() {
        for kind in ActionKind::ALL {
            let cap = required_capability(kind.as_str());
            assert_ne!(cap, Some(Capability::UnknownAction), "{kind} unmapped");
        }
    }
}
