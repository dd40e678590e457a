//! Raw primitives that bypass access and policy checks.
//!
//! This module is private to the crate. Only [`crate::kernel_gate`] (the
//! pipeline and the project bootstrap) reaches in here; everything public
//! goes through the gate.

pub(crate) use crate::ledger::{append_entry, create_genesis_entry};
pub(crate) use crate::policy::revise_policy;
pub(crate) use crate::proof::{bind_proof_to_payload, generate_gate_proof};

// Re-hashing and raw constraint lookups, not needed by the pipeline itself.
#[allow(unused_imports)]
pub(crate) use crate::policy::resolve_constraint;
#[allow(unused_imports)]
pub(crate) use crate::proof::strip_integrity;
