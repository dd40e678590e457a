//! File-backed inputs and outputs of the CLI: the ledger, policy overrides,
//! action batches and phase files.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use phasegate_kernel::{
    CompiledPolicy, GovernanceAction, IntegrityViolation, Ledger, compile_policy, verify_ledger_integrity,
};
use phasegate_types::{Artifact, KernelError, Phase, Template, TemplateBinding, TemplateResolution};

use crate::config;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No ledger at {0}; run `phasegate init` first")]
    MissingLedger(String),

    #[error("Ledger at {path} failed verification at entry {index}: {violation}; refusing to append")]
    BrokenLedger {
        path: String,
        index: usize,
        violation: IntegrityViolation,
    },

    #[error("Ledger already exists at {0}")]
    LedgerExists(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("Usage: {0}")]
    Usage(String),
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Kernel(KernelError::from(e))
    }
}

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CliError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_ledger(path: &Path) -> Result<Ledger, CliError> {
    if !path.exists() {
        return Err(CliError::MissingLedger(path.display().to_string()));
    }
    read_json(path)
}

/// Load a ledger that is about to be extended. A broken hash chain is an
/// error; new entries are never chained onto it.
pub fn load_verified_ledger(path: &Path) -> Result<Ledger, CliError> {
    let ledger = load_ledger(path)?;
    let report = verify_ledger_integrity(&ledger);
    if let (Some(violation), Some(index)) = (report.error, report.broken_at) {
        return Err(CliError::BrokenLedger {
            path: path.display().to_string(),
            index,
            violation,
        });
    }
    Ok(ledger)
}

/// Persist `ledger` as pretty JSON, owner-readable only.
pub fn save_ledger(path: &Path, ledger: &Ledger) -> Result<(), CliError> {
    let raw = ledger.to_json_pretty()?;
    config::write_private(path, raw.as_bytes()).map_err(CliError::Config)
}

/// Compile the policy from an optional overrides file.
pub fn load_policy(path: Option<&Path>) -> Result<CompiledPolicy, CliError> {
    let overrides: Option<Value> = path.map(read_json).transpose()?;
    Ok(compile_policy(overrides.as_ref())?)
}

pub fn load_actions(path: &Path) -> Result<Vec<GovernanceAction>, CliError> {
    read_json(path)
}

/// A phase record together with the templates its artifacts refer to.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseFile {
    #[serde(flatten)]
    pub phase: Phase,
    #[serde(default)]
    pub templates: Vec<Template>,
}

impl PhaseFile {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        read_json(path)
    }

    /// Resolve an artifact's template from the templates embedded in the
    /// file. No `templateId` is `missing`; an id with no matching template
    /// is `unresolved`.
    pub fn resolve(&self, _phase: &Phase, artifact: &Artifact) -> TemplateResolution {
        let Some(id) = artifact.template_id.as_deref() else {
            return TemplateResolution::default();
        };
        match self.templates.iter().find(|t| t.id == id) {
            Some(t) => TemplateResolution {
                template: Some(t.clone()),
                binding: TemplateBinding::Verified,
            },
            None => TemplateResolution {
                template: None,
                binding: TemplateBinding::Unresolved,
            },
        }
    }
}
