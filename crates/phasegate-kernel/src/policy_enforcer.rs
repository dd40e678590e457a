//! [`PolicyEnforcer`] – business-rule interlock for governance actions.
//!
//! Where the capability check answers "may this actor do this at all?", the
//! enforcer answers "are the parameters of this particular attempt
//! acceptable under the active policy?". Every registered [`PolicyRule`] is
//! evaluated in order; the first violation blocks the action.
//!
//! Enforcement is opt-in per action kind: actions whose `type` the enforcer
//! does not know, or that carry no `type` at all ([`PolicyAction::Unenforced`]),
//! are allowed.
//!
//! Built-in rules:
//! - [`WaiverRationaleRule`] – rationale must meet the category-scaled minimum.
//! - [`WaiverBudgetRule`] – per-phase waiver budget, when configured.
//! - [`NoGoContinuationRule`] – optional ban on `go` after a prior `no-go`.
//! - [`SoloAttestationRule`] – written attestation for solo `go` decisions.
//! - [`GovernanceModeRule`] – decision mode must be allowed by policy.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use phasegate_types::{DecisionStatus, GovernanceMode};

use crate::policy::{self, Policy};

/// Count of characters that are not whitespace.
pub fn non_whitespace_len(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

// ────────────────────────────────────────────────────────────────────────────
// Actions and verdicts
// ────────────────────────────────────────────────────────────────────────────

/// The business parameters of an action, as seen by the enforcer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyAction {
    #[serde(rename_all = "camelCase")]
    ApplyWaiver {
        #[serde(default)]
        rationale: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        /// Waivers already applied in the artifact's phase, supplied by the
        /// caller.
        #[serde(default)]
        current_phase_waivers: u64,
    },
    #[serde(rename_all = "camelCase")]
    DecideGate {
        #[serde(default)]
        decision: DecisionStatus,
        #[serde(default)]
        notes: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        governance_mode: Option<GovernanceMode>,
        /// Whether this phase already carries a `no-go`, supplied by the caller.
        #[serde(default)]
        prior_no_go: bool,
    },
    /// Any other action type. Not subject to enforcement.
    #[serde(other)]
    Unenforced,
}

impl PolicyAction {
    /// Read a policy action from its wire form. An object without a string
    /// `type` is [`PolicyAction::Unenforced`]; a known `type` with malformed
    /// fields is still an error.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Object(map) if !map.get("type").is_some_and(Value::is_string) => Ok(PolicyAction::Unenforced),
            _ => serde_json::from_value(value.clone()),
        }
    }
}

/// `deserialize_with` helper for optional policy-action fields: `null` or
/// absent is `None`, anything else goes through [`PolicyAction::from_value`].
pub(crate) fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<PolicyAction>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => PolicyAction::from_value(&value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Outcome of [`enforce_policy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allowed: bool,
    pub reason: String,
}

/// A single violated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    pub rule: String,
    pub reason: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single governance rule an action must satisfy.
pub trait PolicyRule: Send + Sync {
    /// Short name used in violation reports.
    fn name(&self) -> &str;

    /// `Ok(())` when `action` satisfies the rule under `policy`.
    fn check(&self, action: &PolicyAction, policy: &Policy) -> Result<(), PolicyViolation>;

    fn violation(&self, reason: String) -> PolicyViolation {
        PolicyViolation {
            rule: self.name().to_string(),
            reason,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PolicyEnforcer
// ────────────────────────────────────────────────────────────────────────────

/// Ordered rule engine.
///
/// # Example
///
/// ```
/// use phasegate_kernel::policy::compile_policy;
/// use phasegate_kernel::policy_enforcer::{PolicyAction, PolicyEnforcer};
///
/// let policy = compile_policy(None).unwrap().policy;
/// let enforcer = PolicyEnforcer::standard();
///
/// let short = PolicyAction::ApplyWaiver {
///     rationale: "n/a".into(),
///     category: None,
///     current_phase_waivers: 0,
/// };
/// assert!(!enforcer.enforce(&short, &policy).allowed);
/// assert!(enforcer.enforce(&PolicyAction::Unenforced, &policy).allowed);
/// ```
#[derive(Default)]
pub struct PolicyEnforcer {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl PolicyEnforcer {
    /// An enforcer with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// An enforcer with every built-in rule registered.
    pub fn standard() -> Self {
        let mut enforcer = Self::new();
        enforcer.add_rule(Box::new(WaiverRationaleRule));
        enforcer.add_rule(Box::new(WaiverBudgetRule));
        enforcer.add_rule(Box::new(GovernanceModeRule));
        enforcer.add_rule(Box::new(NoGoContinuationRule));
        enforcer.add_rule(Box::new(SoloAttestationRule));
        enforcer
    }

    /// Register a rule. Rules run in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) {
        self.rules.push(rule);
    }

    /// Return the first violation, or `Ok(())` when every rule passes.
    pub fn check(&self, action: &PolicyAction, policy: &Policy) -> Result<(), PolicyViolation> {
        for rule in &self.rules {
            rule.check(action, policy)?;
        }
        Ok(())
    }

    /// [`PolicyEnforcer::check`] folded into a verdict.
    pub fn enforce(&self, action: &PolicyAction, policy: &Policy) -> PolicyVerdict {
        match self.check(action, policy) {
            Ok(()) => PolicyVerdict {
                allowed: true,
                reason: "Action satisfies policy".to_string(),
            },
            Err(v) => PolicyVerdict {
                allowed: false,
                reason: v.reason,
            },
        }
    }
}

/// Validate `action` against `policy` with the standard rule set.
pub fn enforce_policy(action: &PolicyAction, policy: &Policy) -> PolicyVerdict {
    PolicyEnforcer::standard().enforce(action, policy)
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects waivers whose rationale is shorter than the resolved minimum.
pub struct WaiverRationaleRule;

impl PolicyRule for WaiverRationaleRule {
    fn name(&self) -> &str {
        "waiver_rationale"
    }

    fn check(&self, action: &PolicyAction, policy: &Policy) -> Result<(), PolicyViolation> {
        if let PolicyAction::ApplyWaiver {
            rationale, category, ..
        } = action
        {
            let min = policy::resolve_waiver_min_length(policy, category.as_deref());
            let got = non_whitespace_len(rationale);
            if (got as u64) < min {
                return Err(self.violation(format!(
                    "Waiver rationale requires at least {min} non-whitespace characters (got {got})"
                )));
            }
        }
        Ok(())
    }
}

/// Rejects waivers once the phase has used up its configured budget.
pub struct WaiverBudgetRule;

impl PolicyRule for WaiverBudgetRule {
    fn name(&self) -> &str {
        "waiver_budget"
    }

    fn check(&self, action: &PolicyAction, policy: &Policy) -> Result<(), PolicyViolation> {
        if let PolicyAction::ApplyWaiver {
            current_phase_waivers,
            ..
        } = action
            && let Some(max) = policy.max_waivers_per_phase()
            && *current_phase_waivers >= max
        {
            return Err(self.violation(format!(
                "Waiver budget exhausted: {current_phase_waivers} of {max} waivers already applied in this phase"
            )));
        }
        Ok(())
    }
}

/// Rejects gate decisions taken under a mode the policy does not allow.
pub struct GovernanceModeRule;

impl PolicyRule for GovernanceModeRule {
    fn name(&self) -> &str {
        "governance_mode"
    }

    fn check(&self, action: &PolicyAction, policy: &Policy) -> Result<(), PolicyViolation> {
        if let PolicyAction::DecideGate {
            governance_mode: Some(mode),
            ..
        } = action
            && !policy.allowed_modes().contains(mode)
        {
            return Err(self.violation(format!(
                "Governance mode '{}' is not allowed by policy",
                mode.as_str()
            )));
        }
        Ok(())
    }
}

/// When the policy forbids it, rejects any `go` following a `no-go`.
pub struct NoGoContinuationRule;

impl PolicyRule for NoGoContinuationRule {
    fn name(&self) -> &str {
        "no_go_continuation"
    }

    fn check(&self, action: &PolicyAction, policy: &Policy) -> Result<(), PolicyViolation> {
        if let PolicyAction::DecideGate {
            decision: DecisionStatus::Go,
            prior_no_go: true,
            ..
        } = action
            && !policy.allow_continue_after_no_go()
        {
            return Err(self.violation(
                "Policy forbids a go decision after a prior no-go on this phase".to_string(),
            ));
        }
        Ok(())
    }
}

/// Solo `go` decisions need a written attestation of minimum length.
pub struct SoloAttestationRule;

impl PolicyRule for SoloAttestationRule {
    fn name(&self) -> &str {
        "solo_attestation"
    }

    fn check(&self, action: &PolicyAction, policy: &Policy) -> Result<(), PolicyViolation> {
        if let PolicyAction::DecideGate {
            decision: DecisionStatus::Go,
            notes,
            governance_mode: Some(GovernanceMode::Solo),
            ..
        } = action
        {
            let min = policy.solo_attestation_min_length();
            let got = non_whitespace_len(notes);
            if (got as u64) < min {
                return Err(self.violation(format!(
                    "Solo go decisions require an attestation of at least {min} non-whitespace characters (got {got})"
                )));
            }
        }
        Ok(())
    }
}
