use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Actors and capabilities
// ────────────────────────────────────────────────────────────────────────────

/// Classification of whoever performs a governance action.
///
/// The type is always *resolved* by the kernel from the actor identifier (or
/// an override held by the embedding application), never taken from the
/// action itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Human,
    Agent,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Human => "human",
            ActorType::Agent => "agent",
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identity performing an action together with its resolved type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
}

/// Capability-based security model: each variant gates exactly one family of
/// governance actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Record a go / no-go decision on a phase gate.
    GateDecide,
    /// Waive an artifact.
    WaiverApply,
    /// Lift an existing waiver.
    WaiverRemove,
    ArtifactRead,
    ArtifactWrite,
    /// Submit a non-binding recommendation.
    AdvisorySubmit,
    LedgerRead,
    LedgerExport,
    PolicyRead,
    PolicyChange,
    /// Required by action types the kernel does not recognise. No actor type
    /// ever holds it.
    UnknownAction,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::GateDecide => "gate-decide",
            Capability::WaiverApply => "waiver-apply",
            Capability::WaiverRemove => "waiver-remove",
            Capability::ArtifactRead => "artifact-read",
            Capability::ArtifactWrite => "artifact-write",
            Capability::AdvisorySubmit => "advisory-submit",
            Capability::LedgerRead => "ledger-read",
            Capability::LedgerExport => "ledger-export",
            Capability::PolicyRead => "policy-read",
            Capability::PolicyChange => "policy-change",
            Capability::UnknownAction => "unknown-action",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every governance action kind the kernel knows how to authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    DecideGate,
    ApplyWaiver,
    RemoveWaiver,
    UpdateArtifact,
    ReadArtifact,
    SubmitAdvisory,
    ReadLedger,
    ExportLedger,
    ReadPolicy,
    ChangePolicy,
    Heartbeat,
}

impl ActionKind {
    pub const ALL: [ActionKind; 11] = [
        ActionKind::DecideGate,
        ActionKind::ApplyWaiver,
        ActionKind::RemoveWaiver,
        ActionKind::UpdateArtifact,
        ActionKind::ReadArtifact,
        ActionKind::SubmitAdvisory,
        ActionKind::ReadLedger,
        ActionKind::ExportLedger,
        ActionKind::ReadPolicy,
        ActionKind::ChangePolicy,
        ActionKind::Heartbeat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::DecideGate => "DECIDE_GATE",
            ActionKind::ApplyWaiver => "APPLY_WAIVER",
            ActionKind::RemoveWaiver => "REMOVE_WAIVER",
            ActionKind::UpdateArtifact => "UPDATE_ARTIFACT",
            ActionKind::ReadArtifact => "READ_ARTIFACT",
            ActionKind::SubmitAdvisory => "SUBMIT_ADVISORY",
            ActionKind::ReadLedger => "READ_LEDGER",
            ActionKind::ExportLedger => "EXPORT_LEDGER",
            ActionKind::ReadPolicy => "READ_POLICY",
            ActionKind::ChangePolicy => "CHANGE_POLICY",
            ActionKind::Heartbeat => "HEARTBEAT",
        }
    }

    /// Parse the wire name of an action kind. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ledger events
// ────────────────────────────────────────────────────────────────────────────

/// Kinds of governance events recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ProjectCreated,
    PhaseCreated,
    ArtifactUpdated,
    WaiverApplied,
    WaiverRemoved,
    GateDecided,
    AdvisorySubmitted,
    PolicyChanged,
    LedgerExported,
    /// A denied attempt (capability or policy). Always logged.
    OverrideAttempted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProjectCreated => "PROJECT_CREATED",
            EventKind::PhaseCreated => "PHASE_CREATED",
            EventKind::ArtifactUpdated => "ARTIFACT_UPDATED",
            EventKind::WaiverApplied => "WAIVER_APPLIED",
            EventKind::WaiverRemoved => "WAIVER_REMOVED",
            EventKind::GateDecided => "GATE_DECIDED",
            EventKind::AdvisorySubmitted => "ADVISORY_SUBMITTED",
            EventKind::PolicyChanged => "POLICY_CHANGED",
            EventKind::LedgerExported => "LEDGER_EXPORTED",
            EventKind::OverrideAttempted => "OVERRIDE_ATTEMPTED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Status constants
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a phase, always derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseState {
    Locked,
    Ready,
    Decided,
}

/// Status of a go / no-go decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionStatus {
    #[default]
    Pending,
    Go,
    NoGo,
}

impl DecisionStatus {
    /// `true` for `go` and `no-go`.
    pub fn is_decided(&self) -> bool {
        matches!(self, DecisionStatus::Go | DecisionStatus::NoGo)
    }
}

/// Derived status of a single artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactStatus {
    NotStarted,
    InProgress,
    Complete,
    Waived,
}

/// Outcome of resolving an artifact's template through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateBinding {
    Verified,
    Unverified,
    Legacy,
    Mismatch,
    Unresolved,
    RegistryCorrupt,
    #[default]
    Missing,
}

impl TemplateBinding {
    /// Bindings under which an artifact can never be considered complete.
    pub fn is_fail_closed(&self) -> bool {
        matches!(
            self,
            TemplateBinding::Mismatch | TemplateBinding::Unresolved | TemplateBinding::RegistryCorrupt
        )
    }
}

/// How gate decisions are attested on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GovernanceMode {
    /// A single accountable person decides and attests in writing.
    Solo,
    Team,
}

impl GovernanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceMode::Solo => "solo",
            GovernanceMode::Team => "team",
        }
    }
}

/// Who attested a gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttestationType {
    SelfAttested,
    PeerReviewed,
}

// ────────────────────────────────────────────────────────────────────────────
// Externally owned records
// ────────────────────────────────────────────────────────────────────────────

/// An explicit exemption for an artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waiver {
    #[serde(default)]
    pub waived: bool,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A deliverable inside a phase. Owned by the surrounding application; the
/// kernel only reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Blocking artifacts must be complete or waived before the gate opens.
    #[serde(default)]
    pub gate_blocking: bool,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiver: Option<Waiver>,
    /// Templated field values keyed by template field id.
    #[serde(default)]
    pub field_values: BTreeMap<String, Value>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

/// The go / no-go record attached to a phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoNoGoDecision {
    #[serde(default)]
    pub status: DecisionStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<AttestationType>,
}

/// A project phase and its artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub go_no_go_decision: GoNoGoDecision,
}

/// Input widget kinds a template field can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Textarea,
    Select,
    Date,
    Checklist,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateField {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Minimum trimmed length for text fields (defaults to 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Column ids for table fields.
    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_required() -> bool {
    true
}

/// A structured artifact template supplied by the template registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub fields: Vec<TemplateField>,
}

/// What the template registry returns for an artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateResolution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
    #[serde(default)]
    pub binding: TemplateBinding,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Errors raised by the governance kernel.
///
/// Business denials are never errors; they are returned as structured
/// verdicts. What remains here are caller contract violations and encoding
/// failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KernelError {
    #[error("Ledger timestamp regression: {attempted} precedes tip {previous}")]
    TimestampRegression { previous: String, attempted: String },

    #[error("Ledger sequence exhausted: tip is at {sequence}")]
    SequenceOverflow { sequence: u64 },

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        KernelError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_serializes_kebab_case() {
        let json = serde_json::to_string(&Capability::GateDecide).unwrap();
        assert_eq!(json, "\"gate-decide\"");
        let back: Capability = serde_json::from_str("\"waiver-apply\"").unwrap();
        assert_eq!(back, Capability::WaiverApply);
        assert_eq!(Capability::UnknownAction.to_string(), "unknown-action");
    }

    #[test]
    fn action_kind_parse_matches_wire_names() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(ActionKind::parse("LAUNCH_MISSILES"), None);
        assert_eq!(ActionKind::parse("decide_gate"), None);
    }

    #[test]
    fn event_kind_wire_names() {
        let json = serde_json::to_string(&EventKind::OverrideAttempted).unwrap();
        assert_eq!(json, "\"OVERRIDE_ATTEMPTED\"");
        assert_eq!(EventKind::ProjectCreated.as_str(), "PROJECT_CREATED");
    }

    #[test]
    fn decision_status_uses_hyphenated_no_go() {
        let status: DecisionStatus = serde_json::from_str("\"no-go\"").unwrap();
        assert_eq!(status, DecisionStatus::NoGo);
        assert!(status.is_decided());
        assert!(!DecisionStatus::Pending.is_decided());
    }

    #[test]
    fn fail_closed_bindings() {
        assert!(TemplateBinding::Mismatch.is_fail_closed());
        assert!(TemplateBinding::Unresolved.is_fail_closed());
        assert!(TemplateBinding::RegistryCorrupt.is_fail_closed());
        assert!(!TemplateBinding::Verified.is_fail_closed());
        assert!(!TemplateBinding::Legacy.is_fail_closed());
        assert!(!TemplateBinding::Missing.is_fail_closed());
        let b: TemplateBinding = serde_json::from_str("\"registry-corrupt\"").unwrap();
        assert_eq!(b, TemplateBinding::RegistryCorrupt);
    }

    #[test]
    fn phase_deserializes_from_camel_case_with_defaults() {
        let json = r#"{
            "id": "p1",
            "name": "Discovery",
            "artifacts": [
                { "id": "a1", "name": "Charter", "gateBlocking": true,
                  "waiver": { "waived": true, "rationale": "covered elsewhere" } }
            ],
            "goNoGoDecision": { "status": "go", "notes": "ship it" }
        }"#;
        let phase: Phase = serde_json::from_str(json).unwrap();
        assert_eq!(phase.artifacts.len(), 1);
        assert!(phase.artifacts[0].gate_blocking);
        assert!(phase.artifacts[0].waiver.as_ref().unwrap().waived);
        assert!(phase.artifacts[0].field_values.is_empty());
        assert_eq!(phase.go_no_go_decision.status, DecisionStatus::Go);
    }

    #[test]
    fn template_field_required_defaults_to_true() {
        let field: TemplateField =
            serde_json::from_str(r#"{ "id": "goal", "type": "text" }"#).unwrap();
        assert!(field.required);
        assert_eq!(field.kind, FieldKind::Text);
        assert!(field.min_length.is_none());
    }

    #[test]
    fn kernel_error_display() {
        let err = KernelError::TimestampRegression {
            previous: "2024-01-02T00:00:00.000Z".into(),
            attempted: "2024-01-01T00:00:00.000Z".into(),
        };
        assert!(err.to_string().contains("regression"));
        let err2 = KernelError::Serialization("bad".into());
        assert!(err2.to_string().contains("bad"));
        let err3 = KernelError::SequenceOverflow { sequence: u64::MAX };
        assert!(err3.to_string().contains(&u64::MAX.to_string()));
    }
}
