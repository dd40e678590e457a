//! Policy schema and compiler.
//!
//! A [`Policy`] is a versioned tree of governance thresholds. Projects start
//! from [`PolicyDocument::default`] and override individual values; the
//! result is compiled once, hashed, and treated as immutable. A revision
//! produces a new, higher-versioned policy.
//!
//! Lookups never fail: any path missing from a (possibly partial) policy
//! falls back to the default tree, value by value.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use phasegate_types::{GovernanceMode, KernelError};

use crate::hash;

pub const DEFAULT_WAIVER_MIN_LENGTH: u64 = 20;
pub const DEFAULT_SOLO_ATTESTATION_MIN_LENGTH: u64 = 30;
pub const DEFAULT_NON_TEMPLATED_MIN_LENGTH: u64 = 20;
pub const DEFAULT_HISTORY_RETENTION: u64 = 50;

/// Last-resort waiver minimum when neither the policy nor the defaults
/// yield a usable value.
pub const FALLBACK_WAIVER_MIN_LENGTH: u64 = 20;

/// The default policy as a JSON tree, built once.
static DEFAULT_TREE: LazyLock<Value> = LazyLock::new(|| PolicyDocument::default().to_tree());

// ────────────────────────────────────────────────────────────────────────────
// Schema
// ────────────────────────────────────────────────────────────────────────────

/// Typed view of the full policy tree. `Default` is the project default
/// policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyDocument {
    /// Positive, incremented on every revision.
    pub version: u64,
    pub waiver: WaiverPolicy,
    pub gate: GatePolicy,
    pub completion: CompletionPolicy,
    pub governance: GovernancePolicy,
    pub history: HistoryPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WaiverPolicy {
    /// Minimum non-whitespace characters in a waiver rationale.
    pub rationale_min_length: u64,
    /// Per-category minimums that take precedence when positive.
    pub category_friction: BTreeMap<String, u64>,
    /// Maximum waivers per phase; `null` means unlimited.
    pub max_per_phase: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GatePolicy {
    /// Minimum non-whitespace characters of attestation notes for a solo `go`.
    pub solo_attestation_min_length: u64,
    /// Whether a `go` may follow an earlier `no-go` on the same phase.
    pub allow_continue_after_no_go: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompletionPolicy {
    /// Minimum trimmed length of rationale or notes for an artifact without
    /// a usable template.
    pub non_templated_min_length: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GovernancePolicy {
    pub allowed_modes: Vec<GovernanceMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HistoryPolicy {
    /// Number of history snapshots the application keeps.
    pub retention: u64,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            version: 1,
            waiver: WaiverPolicy {
                rationale_min_length: DEFAULT_WAIVER_MIN_LENGTH,
                category_friction: BTreeMap::new(),
                max_per_phase: None,
            },
            gate: GatePolicy {
                solo_attestation_min_length: DEFAULT_SOLO_ATTESTATION_MIN_LENGTH,
                allow_continue_after_no_go: true,
            },
            completion: CompletionPolicy {
                non_templated_min_length: DEFAULT_NON_TEMPLATED_MIN_LENGTH,
            },
            governance: GovernancePolicy {
                allowed_modes: vec![GovernanceMode::Solo, GovernanceMode::Team],
            },
            history: HistoryPolicy {
                retention: DEFAULT_HISTORY_RETENTION,
            },
        }
    }
}

impl PolicyDocument {
    /// JSON schema of the policy tree.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PolicyDocument)
    }

    fn to_tree(&self) -> Value {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Policy
// ────────────────────────────────────────────────────────────────────────────

/// A compiled (or caller-supplied partial) policy tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Policy {
    tree: Value,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            tree: DEFAULT_TREE.clone(),
        }
    }
}

impl Policy {
    /// Wrap an arbitrary, possibly partial tree without validating it.
    /// Missing values resolve through the defaults.
    pub fn from_tree(tree: Value) -> Self {
        Self { tree }
    }

    pub fn from_document(doc: &PolicyDocument) -> Self {
        Self { tree: doc.to_tree() }
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// Content hash of the tree.
    pub fn hash(&self) -> Result<String, KernelError> {
        hash::content_hash(&self.tree)
    }

    pub fn version(&self) -> u64 {
        self.resolve_u64("version", 1)
    }

    pub fn solo_attestation_min_length(&self) -> u64 {
        self.resolve_u64("gate.solo_attestation_min_length", DEFAULT_SOLO_ATTESTATION_MIN_LENGTH)
    }

    pub fn allow_continue_after_no_go(&self) -> bool {
        resolve_constraint(self, "gate.allow_continue_after_no_go")
            .as_bool()
            .unwrap_or(true)
    }

    /// `None` when no per-phase waiver budget is configured.
    pub fn max_waivers_per_phase(&self) -> Option<u64> {
        resolve_constraint(self, "waiver.max_per_phase").as_u64()
    }

    pub fn non_templated_min_length(&self) -> u64 {
        self.resolve_u64("completion.non_templated_min_length", DEFAULT_NON_TEMPLATED_MIN_LENGTH)
    }

    pub fn history_retention(&self) -> u64 {
        self.resolve_u64("history.retention", DEFAULT_HISTORY_RETENTION)
    }

    /// Governance modes this policy permits. Unknown entries are skipped.
    pub fn allowed_modes(&self) -> Vec<GovernanceMode> {
        match resolve_constraint(self, "governance.allowed_modes") {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect(),
            _ => vec![GovernanceMode::Solo, GovernanceMode::Team],
        }
    }

    /// Shorthand for [`resolve_waiver_min_length`].
    pub fn waiver_min_length(&self, category: Option<&str>) -> u64 {
        resolve_waiver_min_length(self, category)
    }

    fn resolve_u64(&self, path: &str, fallback: u64) -> u64 {
        resolve_constraint(self, path).as_u64().unwrap_or(fallback)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validation
// ────────────────────────────────────────────────────────────────────────────

/// Structural validation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Check the type and range of every known policy value.
pub fn validate_policy(tree: &Value) -> PolicyValidation {
    let mut errors = Vec::new();

    if !tree.is_object() {
        errors.push("policy must be an object".to_string());
        return PolicyValidation { valid: false, errors };
    }

    match lookup(tree, "version") {
        Some(v) if v.as_u64().is_some_and(|n| n >= 1) => {}
        Some(v) => errors.push(format!("version must be a positive integer, got {v}")),
        None => errors.push("version is missing".to_string()),
    }

    for path in [
        "waiver.rationale_min_length",
        "gate.solo_attestation_min_length",
        "completion.non_templated_min_length",
        "history.retention",
    ] {
        check_non_negative_integer(tree, path, false, &mut errors);
    }
    check_non_negative_integer(tree, "waiver.max_per_phase", true, &mut errors);

    match lookup(tree, "gate.allow_continue_after_no_go") {
        Some(Value::Bool(_)) => {}
        Some(v) => errors.push(format!(
            "gate.allow_continue_after_no_go must be a boolean, got {v}"
        )),
        None => errors.push("gate.allow_continue_after_no_go is missing".to_string()),
    }

    match lookup(tree, "waiver.category_friction") {
        Some(Value::Object(map)) => {
            for (category, v) in map {
                if v.as_u64().is_none() {
                    errors.push(format!(
                        "waiver.category_friction.{category} must be a non-negative integer, got {v}"
                    ));
                }
            }
        }
        Some(v) => errors.push(format!("waiver.category_friction must be an object, got {v}")),
        None => errors.push("waiver.category_friction is missing".to_string()),
    }

    match lookup(tree, "governance.allowed_modes") {
        Some(Value::Array(modes)) => {
            for m in modes {
                if serde_json::from_value::<GovernanceMode>(m.clone()).is_err() {
                    errors.push(format!("governance.allowed_modes contains unknown mode {m}"));
                }
            }
        }
        Some(v) => errors.push(format!("governance.allowed_modes must be an array, got {v}")),
        None => errors.push("governance.allowed_modes is missing".to_string()),
    }

    PolicyValidation {
        valid: errors.is_empty(),
        errors,
    }
}

fn check_non_negative_integer(tree: &Value, path: &str, nullable: bool, errors: &mut Vec<String>) {
    match lookup(tree, path) {
        Some(Value::Null) if nullable => {}
        Some(v) if v.as_u64().is_some() => {}
        Some(v) => errors.push(format!("{path} must be a non-negative integer, got {v}")),
        None if nullable => {}
        None => errors.push(format!("{path} is missing")),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Compilation
// ────────────────────────────────────────────────────────────────────────────

/// A compiled policy with its content hash and validation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPolicy {
    pub policy: Policy,
    pub hash: String,
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Merge `overrides` onto the default policy (two levels deep), validate and
/// hash the result.
///
/// ```
/// use phasegate_kernel::policy::compile_policy;
/// use serde_json::json;
///
/// let compiled = compile_policy(Some(&json!({ "waiver": { "rationale_min_length": 40 } }))).unwrap();
/// assert!(compiled.valid);
/// assert_eq!(compiled.policy.waiver_min_length(None), 40);
/// assert_eq!(compiled.policy.solo_attestation_min_length(), 30);
/// ```
pub fn compile_policy(overrides: Option<&Value>) -> Result<CompiledPolicy, KernelError> {
    let base = DEFAULT_TREE.clone();
    let mut extra_errors = Vec::new();
    let tree = match overrides {
        None | Some(Value::Null) => base,
        Some(o @ Value::Object(_)) => deep_merge(&base, o),
        Some(other) => {
            extra_errors.push(format!("policy overrides must be an object, got {other}"));
            base
        }
    };
    finish(tree, extra_errors)
}

/// Produce the next version of `current` with `changes` applied.
///
/// The revision is not logged here; the caller records the change.
pub(crate) fn revise_policy(current: &Policy, changes: &Value) -> Result<CompiledPolicy, KernelError> {
    let next_version = current.version() + 1;
    let base = deep_merge(&DEFAULT_TREE, current.tree());
    let mut extra_errors = Vec::new();
    let mut tree = match changes {
        Value::Object(_) => deep_merge(&base, changes),
        Value::Null => base,
        other => {
            extra_errors.push(format!("policy changes must be an object, got {other}"));
            base
        }
    };
    if let Value::Object(map) = &mut tree {
        map.insert("version".to_string(), Value::from(next_version));
    }
    finish(tree, extra_errors)
}

fn finish(tree: Value, mut errors: Vec<String>) -> Result<CompiledPolicy, KernelError> {
    let validation = validate_policy(&tree);
    errors.extend(validation.errors);
    let policy = Policy::from_tree(tree);
    let hash = policy.hash()?;
    if errors.is_empty() {
        debug!(version = policy.version(), hash = %hash, "policy compiled");
    } else {
        warn!(version = policy.version(), errors = ?errors, "policy failed validation");
    }
    Ok(CompiledPolicy {
        policy,
        hash,
        valid: errors.is_empty(),
        errors,
    })
}

/// Merge `overrides` onto `base`. Top-level objects are merged key by key,
/// and objects nested one level further (e.g. `waiver.category_friction`)
/// are merged shallowly. Anything deeper is replaced wholesale.
fn deep_merge(base: &Value, overrides: &Value) -> Value {
    let (Value::Object(base_map), Value::Object(over_map)) = (base, overrides) else {
        return overrides.clone();
    };
    let mut out = base_map.clone();
    for (key, over) in over_map {
        let merged = match (base_map.get(key), over) {
            (Some(Value::Object(b)), Value::Object(o)) => {
                let mut section = b.clone();
                for (sub, sub_over) in o {
                    let sub_merged = match (b.get(sub), sub_over) {
                        (Some(Value::Object(bb)), Value::Object(oo)) => {
                            let mut inner: Map<String, Value> = bb.clone();
                            inner.extend(oo.iter().map(|(k, v)| (k.clone(), v.clone())));
                            Value::Object(inner)
                        }
                        _ => sub_over.clone(),
                    };
                    section.insert(sub.clone(), sub_merged);
                }
                Value::Object(section)
            }
            _ => over.clone(),
        };
        out.insert(key.clone(), merged);
    }
    Value::Object(out)
}

// ────────────────────────────────────────────────────────────────────────────
// Resolution
// ────────────────────────────────────────────────────────────────────────────

/// Resolve a dotted path, falling back to the default tree when the policy
/// lacks it (or holds `null`). Returns `Value::Null` if neither has it.
pub(crate) fn resolve_constraint(policy: &Policy, path: &str) -> Value {
    if let Some(v) = lookup(policy.tree(), path).filter(|v| !v.is_null()) {
        return v.clone();
    }
    lookup(&DEFAULT_TREE, path)
        .cloned()
        .unwrap_or(Value::Null)
}

/// Minimum waiver rationale length for `category`.
///
/// A positive category friction override wins; otherwise the global
/// `waiver.rationale_min_length`; otherwise 20.
pub fn resolve_waiver_min_length(policy: &Policy, category: Option<&str>) -> u64 {
    if let Some(category) = category {
        let friction = resolve_constraint(policy, "waiver.category_friction");
        if let Some(n) = friction.get(category).and_then(Value::as_u64).filter(|n| *n > 0) {
            return n;
        }
    }
    resolve_constraint(policy, "waiver.rationale_min_length")
        .as_u64()
        .unwrap_or(FALLBACK_WAIVER_MIN_LENGTH)
}

fn lookup<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(tree, |node, segment| node.get(segment))
}
