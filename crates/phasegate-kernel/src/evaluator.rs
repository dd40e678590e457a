//! Artifact and gate evaluation.
//!
//! Pure derivations of waiver validity, completion, status and gate
//! readiness from externally owned [`Artifact`] / [`Phase`] records. Nothing
//! here mutates its input.
//!
//! Completion is decided in this order:
//!
//! 1. A valid waiver makes an artifact complete.
//! 2. A fail-closed template binding (`mismatch`, `unresolved`,
//!    `registry-corrupt`) makes it incomplete: an unverifiable template can
//!    never be satisfied.
//! 3. A template with required fields: complete iff every required field is
//!    satisfied.
//! 4. Otherwise: complete iff the rationale or the notes reach the policy's
//!    non-templated minimum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use phasegate_types::{
    Artifact, ArtifactStatus, FieldKind, Phase, Template, TemplateBinding, TemplateField,
    TemplateResolution,
};

use crate::policy::Policy;
use crate::policy_enforcer::non_whitespace_len;

// ────────────────────────────────────────────────────────────────────────────
// Template resolution seam
// ────────────────────────────────────────────────────────────────────────────

/// Injected by the template registry layer.
pub trait TemplateResolver {
    fn resolve(&self, phase: &Phase, artifact: &Artifact) -> TemplateResolution;
}

impl<F> TemplateResolver for F
where
    F: Fn(&Phase, &Artifact) -> TemplateResolution,
{
    fn resolve(&self, phase: &Phase, artifact: &Artifact) -> TemplateResolution {
        self(phase, artifact)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Waivers
// ────────────────────────────────────────────────────────────────────────────

/// `true` only for a present waiver with `waived == true` whose rationale
/// meets the policy minimum for `category`.
pub fn is_artifact_waived(artifact: &Artifact, policy: &Policy, category: Option<&str>) -> bool {
    match &artifact.waiver {
        Some(w) if w.waived => {
            non_whitespace_len(&w.rationale) as u64 >= policy.waiver_min_length(category)
        }
        _ => false,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Templated fields
// ────────────────────────────────────────────────────────────────────────────

/// Required / satisfied field counts for a templated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldCompletion {
    pub required_fields: usize,
    pub satisfied_fields: usize,
}

impl FieldCompletion {
    pub fn is_complete(&self) -> bool {
        self.satisfied_fields == self.required_fields
    }
}

/// Whether a single field value satisfies its template field.
pub fn is_field_satisfied(field: &TemplateField, value: Option<&Value>) -> bool {
    let Some(value) = value else {
        return false;
    };
    match field.kind {
        FieldKind::Text | FieldKind::Textarea => {
            let min = field.min_length.unwrap_or(1);
            value
                .as_str()
                .is_some_and(|s| s.trim().chars().count() >= min)
        }
        FieldKind::Select | FieldKind::Date => is_filled(value),
        FieldKind::Checklist => match value {
            Value::Array(items) => items.iter().any(is_filled),
            Value::Object(map) => map.values().any(|v| v.as_bool() == Some(true)),
            _ => false,
        },
        FieldKind::Table => match value {
            Value::Array(rows) => rows.iter().any(|row| is_complete_row(row, &field.columns)),
            _ => false,
        },
    }
}

fn is_complete_row(row: &Value, columns: &[String]) -> bool {
    let Value::Object(cells) = row else {
        return false;
    };
    if columns.is_empty() {
        return !cells.is_empty() && cells.values().all(is_filled);
    }
    columns
        .iter()
        .all(|c| cells.get(c).is_some_and(is_filled))
}

fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => true,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Count required and satisfied fields of `template` for `artifact`.
pub fn field_completion(template: &Template, artifact: &Artifact) -> FieldCompletion {
    let required: Vec<&TemplateField> = template.fields.iter().filter(|f| f.required).collect();
    let satisfied = required
        .iter()
        .filter(|f| is_field_satisfied(f, artifact.field_values.get(&f.id)))
        .count();
    FieldCompletion {
        required_fields: required.len(),
        satisfied_fields: satisfied,
    }
}

/// A template counts only when it has at least one required field.
fn applicable_template(template: Option<&Template>) -> Option<&Template> {
    template.filter(|t| t.fields.iter().any(|f| f.required))
}

// ────────────────────────────────────────────────────────────────────────────
// Completion and status
// ────────────────────────────────────────────────────────────────────────────

/// Written rationale or notes long enough to count as meaningful content.
pub fn has_meaningful_content(artifact: &Artifact, policy: &Policy) -> bool {
    let min = policy.non_templated_min_length() as usize;
    artifact.rationale.trim().chars().count() >= min || artifact.notes.trim().chars().count() >= min
}

/// How an artifact reached completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum CompletionMethod {
    #[serde(rename_all = "camelCase")]
    Template {
        required_fields: usize,
        satisfied_fields: usize,
    },
    NonTemplated,
}

/// The completion method if `artifact` is complete without a waiver.
pub fn completion_method(
    artifact: &Artifact,
    template: Option<&Template>,
    binding: TemplateBinding,
    policy: &Policy,
) -> Option<CompletionMethod> {
    if binding.is_fail_closed() {
        return None;
    }
    match applicable_template(template) {
        Some(t) => {
            let counts = field_completion(t, artifact);
            counts.is_complete().then_some(CompletionMethod::Template {
                required_fields: counts.required_fields,
                satisfied_fields: counts.satisfied_fields,
            })
        }
        None => has_meaningful_content(artifact, policy).then_some(CompletionMethod::NonTemplated),
    }
}

/// Whether `artifact` counts as complete.
pub fn is_artifact_complete(
    artifact: &Artifact,
    template: Option<&Template>,
    binding: TemplateBinding,
    policy: &Policy,
    category: Option<&str>,
) -> bool {
    if is_artifact_waived(artifact, policy, category) {
        return true;
    }
    completion_method(artifact, template, binding, policy).is_some()
}

/// Any partial content at all: text, a filled field, or a comment.
fn has_partial_content(artifact: &Artifact) -> bool {
    !artifact.rationale.trim().is_empty()
        || !artifact.notes.trim().is_empty()
        || artifact.field_values.values().any(is_filled)
        || !artifact.comments.is_empty()
}

/// Four-state status: waived, complete, in progress, not started.
pub fn compute_artifact_status(
    artifact: &Artifact,
    template: Option<&Template>,
    binding: TemplateBinding,
    policy: &Policy,
    category: Option<&str>,
) -> ArtifactStatus {
    if is_artifact_waived(artifact, policy, category) {
        ArtifactStatus::Waived
    } else if is_artifact_complete(artifact, template, binding, policy, category) {
        ArtifactStatus::Complete
    } else if has_partial_content(artifact) {
        ArtifactStatus::InProgress
    } else {
        ArtifactStatus::NotStarted
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-artifact and gate-level evaluation
// ────────────────────────────────────────────────────────────────────────────

/// Everything the kernel derives about one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactEvaluation {
    pub status: ArtifactStatus,
    pub waived: bool,
    pub complete: bool,
    pub binding: TemplateBinding,
    pub method: Option<CompletionMethod>,
}

/// Resolve the template of `artifact` and evaluate it. The artifact's own
/// category drives waiver friction.
pub fn evaluate_artifact(
    phase: &Phase,
    artifact: &Artifact,
    resolver: &dyn TemplateResolver,
    policy: &Policy,
) -> ArtifactEvaluation {
    let resolution = resolver.resolve(phase, artifact);
    let template = resolution.template.as_ref();
    let binding = resolution.binding;
    let category = artifact.category.as_deref();

    let waived = is_artifact_waived(artifact, policy, category);
    let method = completion_method(artifact, template, binding, policy);
    ArtifactEvaluation {
        status: compute_artifact_status(artifact, template, binding, policy, category),
        waived,
        complete: waived || method.is_some(),
        binding,
        method,
    }
}

/// Gate readiness summary for a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSummary {
    pub gate_blocking: usize,
    pub complete: usize,
    pub waived: usize,
    /// Ids of blocking artifacts that are neither complete nor waived.
    pub remaining: Vec<String>,
}

impl GateSummary {
    pub fn is_ready(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Summarise the gate-blocking artifacts of `phase`.
pub fn gate_summary(phase: &Phase, resolver: &dyn TemplateResolver, policy: &Policy) -> GateSummary {
    let mut summary = GateSummary {
        gate_blocking: 0,
        complete: 0,
        waived: 0,
        remaining: Vec::new(),
    };
    for artifact in phase.artifacts.iter().filter(|a| a.gate_blocking) {
        summary.gate_blocking += 1;
        let eval = evaluate_artifact(phase, artifact, resolver, policy);
        if eval.waived {
            summary.waived += 1;
        } else if eval.complete {
            summary.complete += 1;
        } else {
            summary.remaining.push(artifact.id.clone());
        }
    }
    summary
}

/// `true` when every gate-blocking artifact is complete or waived.
pub fn is_gate_ready(phase: &Phase, resolver: &dyn TemplateResolver, policy: &Policy) -> bool {
    gate_summary(phase, resolver, policy).is_ready()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::compile_policy;
    use phasegate_types::Waiver;
    use serde_json::json;

    fn policy() -> Policy {
        compile_policy(None).unwrap().policy
    }

    fn artifact(id: &str) -> Artifact {
        Artifact {
            id: id.into(),
            name: id.to_uppercase(),
            ..Default::default()
        }
    }

    fn field(id: &str, kind: FieldKind) -> TemplateField {
        TemplateField {
            id: id.into(),
            label: id.into(),
            kind,
            required: true,
            min_length: None,
            columns: Vec::new(),
        }
    }

    fn template(fields: Vec<TemplateField>) -> Template {
        Template {
            id: "tpl".into(),
            version: Some("1".into()),
            fields,
        }
    }

    fn no_template(_: &Phase, _: &Artifact) -> TemplateResolution {
        TemplateResolution::default()
    }

    #[test]
    fn waiver_requires_flag_and_long_rationale() {
        let p = policy();
        let mut a = artifact("a");
        assert!(!is_artifact_waived(&a, &p, None));

        a.waiver = Some(Waiver {
            waived: false,
            rationale: "x".repeat(40),
            ..Default::default()
        });
        assert!(!is_artifact_waived(&a, &p, None));

        a.waiver = Some(Waiver {
            waived: true,
            rationale: "too short".into(),
            ..Default::default()
        });
        assert!(!is_artifact_waived(&a, &p, None));

        a.waiver = Some(Waiver {
            waived: true,
            rationale: "Covered by the vendor's SOC2 report".into(),
            ..Default::default()
        });
        assert!(is_artifact_waived(&a, &p, None));
    }

    #[test]
    fn category_friction_applies_to_waiver_validity() {
        let p = compile_policy(Some(&json!({ "waiver": { "category_friction": { "security": 60 } } })))
            .unwrap()
            .policy;
        let mut a = artifact("a");
        a.waiver = Some(Waiver {
            waived: true,
            rationale: "x".repeat(30),
            ..Default::default()
        });
        assert!(is_artifact_waived(&a, &p, None));
        assert!(!is_artifact_waived(&a, &p, Some("security")));
    }

    #[test]
    fn waived_artifacts_are_complete_even_when_binding_is_corrupt() {
        let p = policy();
        let mut a = artifact("a");
        a.waiver = Some(Waiver {
            waived: true,
            rationale: "x".repeat(25),
            ..Default::default()
        });
        assert!(is_artifact_complete(&a, None, TemplateBinding::RegistryCorrupt, &p, None));
        assert_eq!(
            compute_artifact_status(&a, None, TemplateBinding::RegistryCorrupt, &p, None),
            ArtifactStatus::Waived
        );
    }

    #[test]
    fn fail_closed_bindings_block_completion() {
        let p = policy();
        let mut a = artifact("a");
        a.rationale = "A perfectly detailed rationale for this artifact.".into();
        a.field_values.insert("goal".into(), json!("Ship the thing on time"));
        let t = template(vec![field("goal", FieldKind::Text)]);
        for binding in [
            TemplateBinding::Mismatch,
            TemplateBinding::Unresolved,
            TemplateBinding::RegistryCorrupt,
        ] {
            assert!(!is_artifact_complete(&a, Some(&t), binding, &p, None));
            assert_eq!(
                compute_artifact_status(&a, Some(&t), binding, &p, None),
                ArtifactStatus::InProgress
            );
        }
        assert!(is_artifact_complete(&a, Some(&t), TemplateBinding::Verified, &p, None));
        assert!(is_artifact_complete(&a, Some(&t), TemplateBinding::Legacy, &p, None));
    }

    #[test]
    fn text_field_respects_min_length() {
        let mut f = field("summary", FieldKind::Textarea);
        f.min_length = Some(10);
        assert!(!is_field_satisfied(&f, Some(&json!("   short   "))));
        assert!(is_field_satisfied(&f, Some(&json!("  long enough  "))));
        assert!(!is_field_satisfied(&f, Some(&json!(42))));
        assert!(!is_field_satisfied(&f, None));
    }

    #[test]
    fn select_and_date_need_value() {
        let s = field("owner", FieldKind::Select);
        assert!(!is_field_satisfied(&s, Some(&json!(""))));
        assert!(!is_field_satisfied(&s, Some(&Value::Null)));
        assert!(is_field_satisfied(&s, Some(&json!("alice"))));
        let d = field("due", FieldKind::Date);
        assert!(is_field_satisfied(&d, Some(&json!("2024-06-01"))));
    }

    #[test]
    fn checklist_needs_one_selected_item() {
        let c = field("checks", FieldKind::Checklist);
        assert!(!is_field_satisfied(&c, Some(&json!([]))));
        assert!(is_field_satisfied(&c, Some(&json!(["backups"]))));
        assert!(!is_field_satisfied(&c, Some(&json!({ "backups": false }))));
        assert!(is_field_satisfied(&c, Some(&json!({ "backups": true, "dr": false }))));
    }

    #[test]
    fn table_needs_one_fully_filled_row() {
        let mut t = field("risks", FieldKind::Table);
        t.columns = vec!["risk".into(), "mitigation".into()];
        assert!(!is_field_satisfied(&t, Some(&json!([]))));
        assert!(!is_field_satisfied(
            &t,
            Some(&json!([{ "risk": "outage", "mitigation": "" }]))
        ));
        assert!(is_field_satisfied(
            &t,
            Some(&json!([
                { "risk": "outage", "mitigation": "" },
                { "risk": "churn", "mitigation": "discount" }
            ]))
        ));
    }

    #[test]
    fn templated_completion_counts_required_fields_only() {
        let p = policy();
        let mut optional = field("extra", FieldKind::Text);
        optional.required = false;
        let t = template(vec![
            field("goal", FieldKind::Text),
            field("owner", FieldKind::Select),
            optional,
        ]);
        let mut a = artifact("a");
        a.field_values.insert("goal".into(), json!("Reduce churn"));
        let counts = field_completion(&t, &a);
        assert_eq!(counts, FieldCompletion { required_fields: 2, satisfied_fields: 1 });
        assert!(!is_artifact_complete(&a, Some(&t), TemplateBinding::Verified, &p, None));

        a.field_values.insert("owner".into(), json!("human:bob"));
        assert_eq!(
            completion_method(&a, Some(&t), TemplateBinding::Verified, &p),
            Some(CompletionMethod::Template { required_fields: 2, satisfied_fields: 2 })
        );
    }

    #[test]
    fn templated_artifacts_ignore_free_text() {
        let p = policy();
        let t = template(vec![field("goal", FieldKind::Text)]);
        let mut a = artifact("a");
        a.notes = "Lots of notes, far more than the non-templated minimum.".into();
        assert!(!is_artifact_complete(&a, Some(&t), TemplateBinding::Verified, &p, None));
    }

    #[test]
    fn non_templated_fallback_uses_rationale_or_notes() {
        let p = policy();
        let mut a = artifact("a");
        a.notes = "short".into();
        assert!(!is_artifact_complete(&a, None, TemplateBinding::Missing, &p, None));
        a.notes = "  This is twenty chars  ".into();
        assert!(is_artifact_complete(&a, None, TemplateBinding::Missing, &p, None));
        assert_eq!(
            completion_method(&a, None, TemplateBinding::Missing, &p),
            Some(CompletionMethod::NonTemplated)
        );
    }

    #[test]
    fn template_without_required_fields_falls_back() {
        let p = policy();
        let mut optional = field("extra", FieldKind::Text);
        optional.required = false;
        let t = template(vec![optional]);
        let mut a = artifact("a");
        assert!(!is_artifact_complete(&a, Some(&t), TemplateBinding::Verified, &p, None));
        a.rationale = "We documented everything in the wiki.".into();
        assert!(is_artifact_complete(&a, Some(&t), TemplateBinding::Verified, &p, None));
    }

    #[test]
    fn status_layers_in_progress() {
        let p = policy();
        let mut a = artifact("a");
        assert_eq!(
            compute_artifact_status(&a, None, TemplateBinding::Missing, &p, None),
            ArtifactStatus::NotStarted
        );
        a.comments.push(phasegate_types::Comment {
            author: "human:bob".into(),
            body: "started".into(),
            created_at: None,
        });
        assert_eq!(
            compute_artifact_status(&a, None, TemplateBinding::Missing, &p, None),
            ArtifactStatus::InProgress
        );

        let mut b = artifact("b");
        b.field_values.insert("goal".into(), json!("x"));
        let t = template(vec![field("goal", FieldKind::Text), field("owner", FieldKind::Select)]);
        assert_eq!(
            compute_artifact_status(&b, Some(&t), TemplateBinding::Verified, &p, None),
            ArtifactStatus::InProgress
        );
    }

    #[test]
    fn gate_ready_only_when_all_blocking_done() {
        let p = policy();
        let mut done = artifact("done");
        done.gate_blocking = true;
        done.rationale = "Complete write-up of the artifact.".into();
        let mut open = artifact("open");
        open.gate_blocking = true;
        let mut optional = artifact("optional");
        optional.gate_blocking = false;

        let mut phase = Phase {
            id: "p1".into(),
            name: "Discovery".into(),
            artifacts: vec![done, open, optional],
            ..Default::default()
        };
        let summary = gate_summary(&phase, &no_template, &p);
        assert_eq!(summary.gate_blocking, 2);
        assert_eq!(summary.complete, 1);
        assert_eq!(summary.remaining, vec!["open".to_string()]);
        assert!(!is_gate_ready(&phase, &no_template, &p));

        phase.artifacts[1].waiver = Some(Waiver {
            waived: true,
            rationale: "Not applicable to an internal-only pilot.".into(),
            ..Default::default()
        });
        let summary = gate_summary(&phase, &no_template, &p);
        assert_eq!(summary.waived, 1);
        assert!(summary.is_ready());
        assert!(is_gate_ready(&phase, &no_template, &p));
    }

    #[test]
    fn resolver_closure_drives_binding() {
        let p = policy();
        let mut a = artifact("a");
        a.rationale = "Complete write-up of the artifact.".into();
        let phase = Phase {
            id: "p".into(),
            artifacts: vec![a.clone()],
            ..Default::default()
        };
        let corrupt = |_: &Phase, _: &Artifact| TemplateResolution {
            template: None,
            binding: TemplateBinding::RegistryCorrupt,
        };
        let eval = evaluate_artifact(&phase, &a, &corrupt, &p);
        assert!(!eval.complete);
        assert_eq!(eval.binding, TemplateBinding::RegistryCorrupt);
        assert_eq!(eval.status, ArtifactStatus::InProgress);

        let eval = evaluate_artifact(&phase, &a, &no_template, &p);
        assert!(eval.complete);
        assert_eq!(eval.method, Some(CompletionMethod::NonTemplated));
    }
}
