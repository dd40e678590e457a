//! Gate proofs and evidence binding.
//!
//! A [`GateProof`] snapshots the evaluated state of every artifact in a
//! phase at the moment a go / no-go decision is made, and commits to that
//! snapshot with `proofHash`. Binding the hash into a ledger payload links
//! the decision entry to its justification: later tampering with either
//! side breaks [`verify_evidence_binding`].
//!
//! Proof generation and binding are crate-private; only the scheduler
//! produces proofs. Verification is public.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use phasegate_types::{ArtifactStatus, DecisionStatus, KernelError, Phase, TemplateBinding};

use crate::evaluator::{self, CompletionMethod, TemplateResolver};
use crate::hash;
use crate::ledger::{self, LedgerEntry};
use crate::policy::Policy;

/// Key under which a proof hash is embedded in a ledger payload.
pub const PROOF_HASH_KEY: &str = "proof_hash";

const INTEGRITY_KEY: &str = "proofHash";

/// Waiver facts recorded in a snapshot. The rationale text itself is never
/// copied into a proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaiverSummary {
    pub rationale_length: usize,
    pub applied_by: Option<String>,
}

/// Evaluated state of one artifact at decision time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSnapshot {
    pub id: String,
    pub name: String,
    pub gate_blocking: bool,
    pub status: ArtifactStatus,
    pub waived: bool,
    pub complete: bool,
    pub template_binding: TemplateBinding,
    pub waiver: Option<WaiverSummary>,
    /// Present for complete artifacts that are not waived.
    pub completion: Option<CompletionMethod>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateProof {
    pub phase_id: String,
    pub phase_name: String,
    pub decision: DecisionStatus,
    pub notes: String,
    pub actor_id: String,
    pub evaluated_at: String,
    pub artifact_count: usize,
    pub gate_blocking_count: usize,
    pub waived_count: usize,
    pub completed_count: usize,
    pub artifacts: Vec<ArtifactSnapshot>,
    pub policy_version: u64,
    pub proof_hash: String,
}

/// Serialize a proof and drop its integrity field, leaving exactly the
/// content the hash commits to.
pub(crate) fn strip_integrity(proof: &GateProof) -> Result<Value, KernelError> {
    let mut value = serde_json::to_value(proof)?;
    if let Value::Object(map) = &mut value {
        map.remove(INTEGRITY_KEY);
    }
    Ok(value)
}

fn compute_proof_hash(proof: &GateProof) -> Result<String, KernelError> {
    hash::content_hash(&strip_integrity(proof)?)
}

/// Evaluate every artifact of `phase` and seal the result.
pub(crate) fn generate_gate_proof(
    phase: &Phase,
    resolver: &dyn TemplateResolver,
    policy: &Policy,
    decision: DecisionStatus,
    notes: &str,
    actor_id: &str,
    evaluated_at: DateTime<Utc>,
) -> Result<GateProof, KernelError> {
    let artifacts: Vec<ArtifactSnapshot> = phase
        .artifacts
        .iter()
        .map(|artifact| {
            let eval = evaluator::evaluate_artifact(phase, artifact, resolver, policy);
            ArtifactSnapshot {
                id: artifact.id.clone(),
                name: artifact.name.clone(),
                gate_blocking: artifact.gate_blocking,
                status: eval.status,
                waived: eval.waived,
                complete: eval.complete,
                template_binding: eval.binding,
                waiver: artifact.waiver.as_ref().map(|w| WaiverSummary {
                    rationale_length: w.rationale.chars().count(),
                    applied_by: w.applied_by.clone(),
                }),
                completion: if eval.waived { None } else { eval.method },
            }
        })
        .collect();

    let mut proof = GateProof {
        phase_id: phase.id.clone(),
        phase_name: phase.name.clone(),
        decision,
        notes: notes.to_string(),
        actor_id: actor_id.to_string(),
        evaluated_at: ledger::format_timestamp(evaluated_at),
        artifact_count: artifacts.len(),
        gate_blocking_count: artifacts.iter().filter(|a| a.gate_blocking).count(),
        waived_count: artifacts.iter().filter(|a| a.waived).count(),
        completed_count: artifacts.iter().filter(|a| a.complete && !a.waived).count(),
        artifacts,
        policy_version: policy.version(),
        proof_hash: String::new(),
    };
    proof.proof_hash = compute_proof_hash(&proof)?;
    debug!(phase = %proof.phase_id, hash = %proof.proof_hash, "gate proof generated");
    Ok(proof)
}

/// Embed `proof.proof_hash` into `base` under [`PROOF_HASH_KEY`]. A
/// non-object base is wrapped as `{ "value": base }` first.
pub(crate) fn bind_proof_to_payload(base: Value, proof: &GateProof) -> Value {
    let mut map = match base {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    map.insert(PROOF_HASH_KEY.to_string(), Value::String(proof.proof_hash.clone()));
    Value::Object(map)
}

// ────────────────────────────────────────────────────────────────────────────
// Verification
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofVerification {
    pub valid: bool,
    /// Hash recomputed from the proof's content.
    pub expected: String,
    /// Hash stored in the proof.
    pub actual: String,
}

/// Recompute `proofHash` from every other field and compare.
pub fn verify_proof(proof: &GateProof) -> ProofVerification {
    let expected = compute_proof_hash(proof).unwrap_or_default();
    ProofVerification {
        valid: !expected.is_empty() && expected == proof.proof_hash,
        expected,
        actual: proof.proof_hash.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceVerification {
    pub valid: bool,
    pub reason: String,
}

/// A ledger entry is bound to a proof when its `payload.proof_hash` equals
/// the proof's hash and the proof verifies on its own.
pub fn verify_evidence_binding(entry: &LedgerEntry, proof: &GateProof) -> EvidenceVerification {
    let bound = entry.payload.get(PROOF_HASH_KEY).and_then(Value::as_str);
    let Some(bound) = bound else {
        return EvidenceVerification {
            valid: false,
            reason: format!("Ledger entry {} carries no proof_hash", entry.sequence),
        };
    };
    if bound != proof.proof_hash {
        return EvidenceVerification {
            valid: false,
            reason: format!(
                "Ledger entry {} is bound to {bound}, proof hash is {}",
                entry.sequence, proof.proof_hash
            ),
        };
    }
    let check = verify_proof(proof);
    if !check.valid {
        return EvidenceVerification {
            valid: false,
            reason: format!(
                "Proof content does not match its hash: expected {}, stored {}",
                check.expected, check.actual
            ),
        };
    }
    EvidenceVerification {
        valid: true,
        reason: "Evidence binding verified".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, append_entry};
    use chrono::TimeZone;
    use phasegate_types::{Artifact, EventKind, TemplateResolution, Waiver};
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 14, 30, 0).unwrap()
    }

    fn no_template(_: &Phase, _: &Artifact) -> TemplateResolution {
        TemplateResolution::default()
    }

    fn phase() -> Phase {
        let waived = Artifact {
            id: "threat-model".into(),
            name: "Threat model".into(),
            gate_blocking: true,
            waiver: Some(Waiver {
                waived: true,
                rationale: "Covered by the platform team's shared threat model".chars().take(48).collect(),
                applied_by: Some("human:alice".into()),
                applied_at: None,
            }),
            ..Default::default()
        };
        let open = Artifact {
            id: "runbook".into(),
            name: "Runbook".into(),
            gate_blocking: true,
            notes: "Draft".into(),
            ..Default::default()
        };
        let optional = Artifact {
            id: "retro".into(),
            name: "Retro notes".into(),
            gate_blocking: false,
            notes: "Went well overall, ship earlier next time.".into(),
            ..Default::default()
        };
        Phase {
            id: "launch".into(),
            name: "Launch".into(),
            artifacts: vec![waived, open, optional],
            ..Default::default()
        }
    }

    fn proof(decision: DecisionStatus) -> GateProof {
        generate_gate_proof(
            &phase(),
            &no_template,
            &Policy::default(),
            decision,
            "Ship it",
            "human:alice",
            at(),
        )
        .unwrap()
    }

    #[test]
    fn aggregates_counts_and_hashes() {
        let p = proof(DecisionStatus::Go);
        assert_eq!(p.artifact_count, 3);
        assert_eq!(p.gate_blocking_count, 2);
        assert_eq!(p.waived_count, 1);
        assert_eq!(p.completed_count, 1);
        assert!(hash::is_hex64(&p.proof_hash));
        assert_eq!(p.evaluated_at, "2024-05-02T14:30:00.000Z");
        assert_eq!(p.policy_version, 1);
    }

    #[test]
    fn snapshot_keeps_rationale_length_not_text() {
        let p = proof(DecisionStatus::Go);
        let snap = &p.artifacts[0];
        assert_eq!(snap.waiver.as_ref().map(|w| w.rationale_length), Some(48));
        assert_eq!(snap.status, ArtifactStatus::Waived);
        assert_eq!(snap.completion, None);
        let text = serde_json::to_string(&p).unwrap();
        assert!(!text.contains("shared threat"));

        assert_eq!(p.artifacts[1].status, ArtifactStatus::InProgress);
        assert_eq!(p.artifacts[2].completion, Some(CompletionMethod::NonTemplated));
    }

    #[test]
    fn identical_inputs_produce_identical_hashes() {
        assert_eq!(proof(DecisionStatus::Go).proof_hash, proof(DecisionStatus::Go).proof_hash);
    }

    #[test]
    fn changing_any_field_changes_the_hash() {
        assert_ne!(proof(DecisionStatus::Go).proof_hash, proof(DecisionStatus::NoGo).proof_hash);

        let mut p = proof(DecisionStatus::Go);
        assert!(verify_proof(&p).valid);
        p.notes.push('!');
        let check = verify_proof(&p);
        assert!(!check.valid);
        assert_eq!(check.actual, p.proof_hash);
        assert_ne!(check.expected, check.actual);
    }

    #[test]
    fn wire_shape_uses_camel_case() {
        let value = serde_json::to_value(proof(DecisionStatus::Go)).unwrap();
        for key in [
            "phaseId",
            "phaseName",
            "decision",
            "notes",
            "actorId",
            "evaluatedAt",
            "artifactCount",
            "gateBlockingCount",
            "waivedCount",
            "completedCount",
            "artifacts",
            "policyVersion",
            "proofHash",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["decision"], json!("go"));
        assert!(strip_integrity(&proof(DecisionStatus::Go)).unwrap().get("proofHash").is_none());
    }

    #[test]
    fn binding_embeds_hash() {
        let p = proof(DecisionStatus::Go);
        let payload = bind_proof_to_payload(json!({ "phase_id": "launch" }), &p);
        assert_eq!(payload["proof_hash"], json!(p.proof_hash));
        assert_eq!(payload["phase_id"], json!("launch"));

        let wrapped = bind_proof_to_payload(json!("note"), &p);
        assert_eq!(wrapped["value"], json!("note"));
        assert!(bind_proof_to_payload(Value::Null, &p).get("proof_hash").is_some());
    }

    #[test]
    fn evidence_binding_requires_matching_and_valid_proof() {
        let p = proof(DecisionStatus::Go);
        let payload = bind_proof_to_payload(json!({}), &p);
        let (_, entry) =
            append_entry(&Ledger::new(), EventKind::GateDecided, payload, "human:alice", Some(at())).unwrap();
        assert!(verify_evidence_binding(&entry, &p).valid);

        let other = proof(DecisionStatus::NoGo);
        let check = verify_evidence_binding(&entry, &other);
        assert!(!check.valid);
        assert!(check.reason.contains("bound to"));

        let mut forged = p.clone();
        forged.waived_count = 0;
        let check = verify_evidence_binding(&entry, &forged);
        assert!(!check.valid);
        assert!(check.reason.contains("does not match"));

        let (_, bare) =
            append_entry(&Ledger::new(), EventKind::GateDecided, json!({}), "human:alice", Some(at())).unwrap();
        assert!(!verify_evidence_binding(&bare, &p).valid);
    }
}
