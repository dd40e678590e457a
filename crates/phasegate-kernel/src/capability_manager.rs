//! [`CapabilityManager`] – access control for governance actions.
//!
//! Resolves an actor's type from its identifier and checks the capability an
//! action requires. The embedding application may register two kinds of
//! trusted overrides here:
//!
//! - an explicit actor type for an identifier that does not follow the
//!   prefix convention ([`CapabilityManager::assign_type`]), and
//! - delegated additions to, or revocations from, the type's defaults
//!   ([`CapabilityManager::grant`] / [`CapabilityManager::revoke`]).
//!
//! Delegations are stored as deltas and applied to the defaults of the type
//! the actor resolves to at check time, so a later [`assign_type`] demotion
//! takes effect immediately.
//!
//! Actions never carry their own actor type; only this manager can assert one.
//!
//! [`assign_type`]: CapabilityManager::assign_type

use std::collections::HashMap;

use phasegate_types::{ActorType, Capability};

use crate::capability::{self, AccessDecision, CapabilitySet};

/// Delegated grants and type overrides for a single project.
///
/// # Example
///
/// ```
/// use phasegate_kernel::capability_manager::CapabilityManager;
/// use phasegate_types::{ActorType, Capability};
///
/// let mut mgr = CapabilityManager::new();
/// assert!(!mgr.check("agent:planner", "DECIDE_GATE").allowed);
///
/// mgr.grant("agent:planner", Capability::GateDecide);
/// assert!(mgr.check("agent:planner", "DECIDE_GATE").allowed);
///
/// mgr.assign_type("ops-lead", ActorType::Human);
/// assert_eq!(mgr.resolve("ops-lead"), ActorType::Human);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CapabilityManager {
    delegations: HashMap<String, Delegation>,
    type_overrides: HashMap<String, ActorType>,
}

/// Per-actor changes relative to the resolved type's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Delegation {
    added: CapabilitySet,
    revoked: CapabilitySet,
}

impl Delegation {
    fn apply(&self, defaults: CapabilitySet) -> CapabilitySet {
        defaults
            .union(&self.added)
            .filter(|cap| !self.revoked.contains(cap))
            .copied()
            .collect()
    }
}

impl CapabilityManager {
    /// Create an empty manager: every actor gets its type's defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delegate `cap` to `actor_id` on top of its type's defaults.
    /// Duplicate grants are ignored; a grant lifts an earlier revoke.
    pub fn grant(&mut self, actor_id: &str, cap: Capability) {
        if cap == Capability::UnknownAction {
            return;
        }
        let delegation = self.delegations.entry(actor_id.to_string()).or_default();
        delegation.revoked.remove(&cap);
        delegation.added.insert(cap);
    }

    /// Revoke `cap` from `actor_id`, including a default one. Holds across
    /// later type changes until the capability is granted again.
    pub fn revoke(&mut self, actor_id: &str, cap: &Capability) {
        let delegation = self.delegations.entry(actor_id.to_string()).or_default();
        delegation.added.remove(cap);
        delegation.revoked.insert(*cap);
    }

    /// Register an explicit actor type for `actor_id`.
    pub fn assign_type(&mut self, actor_id: &str, actor_type: ActorType) {
        self.type_overrides.insert(actor_id.to_string(), actor_type);
    }

    /// The effective capability set of `actor_id`, if any delegation was
    /// registered for it. `None` means the type's defaults apply unchanged.
    pub fn grants_for(&self, actor_id: &str) -> Option<CapabilitySet> {
        let delegation = self.delegations.get(actor_id)?;
        Some(delegation.apply(capability::capabilities_for(Some(self.resolve(actor_id)))))
    }

    /// Resolve the type of `actor_id`, honouring registered overrides.
    pub fn resolve(&self, actor_id: &str) -> ActorType {
        capability::resolve_actor_type(actor_id, self.type_overrides.get(actor_id).copied())
    }

    /// Check whether `actor_id` may perform `action_type`.
    pub fn check(&self, actor_id: &str, action_type: &str) -> AccessDecision {
        capability::check_access(
            Some(self.resolve(actor_id)),
            self.grants_for(actor_id).as_ref(),
            action_type,
        )
    }
}
