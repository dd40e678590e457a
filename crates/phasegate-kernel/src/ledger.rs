//! Append-only, hash-chained governance ledger.
//!
//! Each entry commits to its predecessor through `prev_hash` and to its own
//! content through `hash`:
//!
//! ```text
//! hash = sha256(canonical({ sequence, type, payload, timestamp, actor_id, prev_hash }))
//! ```
//!
//! Entry 0 links to [`GENESIS_HASH`]. The ledger only grows: appending
//! returns a new [`Ledger`] value and leaves the original untouched.
//!
//! Raw appends are crate-private. Outside the kernel, a ledger grows only
//! through [`crate::kernel_gate`]. Verification is public and safe to call
//! from anywhere.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use phasegate_types::{EventKind, KernelError};

use crate::hash;

/// `prev_hash` of the first entry. Compared by exact string equality.
pub const GENESIS_HASH: &str =
    "00000000000000000000000000000000000000000000000000000000000000000000";

// ────────────────────────────────────────────────────────────────────────────
// Entries
// ────────────────────────────────────────────────────────────────────────────

/// A single ledger record. The serialized shape is the stable wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
    /// ISO-8601 UTC with millisecond precision.
    pub timestamp: String,
    pub actor_id: String,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Serialize)]
struct HashableEntry<'a> {
    sequence: u64,
    #[serde(rename = "type")]
    kind: EventKind,
    payload: &'a Value,
    timestamp: &'a str,
    actor_id: &'a str,
    prev_hash: &'a str,
}

/// Recompute the self-hash of an entry from its hashable fields.
pub fn compute_entry_hash(entry: &LedgerEntry) -> Result<String, KernelError> {
    hash::content_hash(&HashableEntry {
        sequence: entry.sequence,
        kind: entry.kind,
        payload: &entry.payload,
        timestamp: &entry.timestamp,
        actor_id: &entry.actor_id,
        prev_hash: &entry.prev_hash,
    })
}

/// Render a timestamp the way the ledger stores it.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc))
}

/// `true` when `later` is strictly before `earlier`.
fn regresses(earlier: &str, later: &str) -> bool {
    match (parse_timestamp(earlier), parse_timestamp(later)) {
        (Some(a), Some(b)) => b < a,
        _ => later < earlier,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ledger
// ────────────────────────────────────────────────────────────────────────────

/// An ordered, copy-on-write sequence of [`LedgerEntry`] values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap entries loaded from storage. Nothing is checked; call
    /// [`verify_ledger_integrity`] before trusting them.
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LedgerEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent entry.
    pub fn tip(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    pub fn entries_of_kind(&self, kind: EventKind) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Pretty JSON in the wire format, for export.
    pub fn to_json_pretty(&self) -> Result<String, KernelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Raw primitives (crate-private)
// ────────────────────────────────────────────────────────────────────────────

/// Build entry 0.
pub(crate) fn create_genesis_entry(
    kind: EventKind,
    payload: Value,
    actor_id: &str,
    timestamp: Option<DateTime<Utc>>,
) -> Result<LedgerEntry, KernelError> {
    let ts = timestamp.unwrap_or_else(Utc::now);
    seal(0, kind, payload, format_timestamp(ts), actor_id, GENESIS_HASH.to_string())
}

/// Append an event, returning the grown ledger and the new entry.
///
/// An explicit `timestamp` earlier than the tip is a caller bug and yields
/// [`KernelError::TimestampRegression`]. Without one, the current time is
/// used, held back to the tip's time if the clock runs behind it. A tip at
/// `u64::MAX` yields [`KernelError::SequenceOverflow`].
pub(crate) fn append_entry(
    ledger: &Ledger,
    kind: EventKind,
    payload: Value,
    actor_id: &str,
    timestamp: Option<DateTime<Utc>>,
) -> Result<(Ledger, LedgerEntry), KernelError> {
    let Some(tip) = ledger.tip() else {
        let entry = create_genesis_entry(kind, payload, actor_id, timestamp)?;
        debug!(sequence = 0, kind = %kind, actor = actor_id, "ledger genesis written");
        return Ok((Ledger::from_entries(vec![entry.clone()]), entry));
    };
    let sequence = tip
        .sequence
        .checked_add(1)
        .ok_or(KernelError::SequenceOverflow { sequence: tip.sequence })?;

    let ts = match timestamp {
        Some(ts) => {
            let formatted = format_timestamp(ts);
            if regresses(&tip.timestamp, &formatted) {
                return Err(KernelError::TimestampRegression {
                    previous: tip.timestamp.clone(),
                    attempted: formatted,
                });
            }
            formatted
        }
        None => {
            let now = Utc::now();
            match parse_timestamp(&tip.timestamp) {
                Some(prev) if now < prev => tip.timestamp.clone(),
                _ => format_timestamp(now),
            }
        }
    };

    let entry = seal(sequence, kind, payload, ts, actor_id, tip.hash.clone())?;
    debug!(sequence = entry.sequence, kind = %kind, actor = actor_id, "ledger entry appended");

    let mut entries = ledger.entries.clone();
    entries.push(entry.clone());
    Ok((Ledger::from_entries(entries), entry))
}

fn seal(
    sequence: u64,
    kind: EventKind,
    payload: Value,
    timestamp: String,
    actor_id: &str,
    prev_hash: String,
) -> Result<LedgerEntry, KernelError> {
    let mut entry = LedgerEntry {
        sequence,
        kind,
        payload,
        timestamp,
        actor_id: actor_id.to_string(),
        prev_hash,
        hash: String::new(),
    };
    entry.hash = compute_entry_hash(&entry)?;
    Ok(entry)
}

// ────────────────────────────────────────────────────────────────────────────
// Verification
// ────────────────────────────────────────────────────────────────────────────

/// The first integrity violation found in a ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityViolation {
    #[error("sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("genesis entry must link to the genesis sentinel, found {found}")]
    GenesisLinkage { found: String },

    #[error("broken hash link: expected prev_hash {expected}, found {found}")]
    BrokenLink { expected: String, found: String },

    #[error("hash mismatch: computed {computed}, stored {stored}")]
    HashMismatch { computed: String, stored: String },

    #[error("timestamp regression: {found} precedes {previous}")]
    TimestampRegression { previous: String, found: String },

    #[error("entry could not be hashed: {reason}")]
    Unhashable { reason: String },
}

/// Result of walking the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    /// Number of entries examined.
    pub entries: usize,
    pub broken_at: Option<usize>,
    pub error: Option<IntegrityViolation>,
}

/// Walk the chain and report the first violation.
///
/// Per entry, in order: sequence gaplessness, `prev_hash` linkage (genesis
/// sentinel on entry 0), recomputed self-hash, non-decreasing timestamps.
pub fn verify_ledger_integrity(ledger: &Ledger) -> IntegrityReport {
    let entries = ledger.entries();
    for (index, entry) in entries.iter().enumerate() {
        if let Some(violation) = check_entry(entries, index, entry) {
            warn!(index, error = %violation, "ledger integrity violation");
            return IntegrityReport {
                valid: false,
                entries: entries.len(),
                broken_at: Some(index),
                error: Some(violation),
            };
        }
    }
    IntegrityReport {
        valid: true,
        entries: entries.len(),
        broken_at: None,
        error: None,
    }
}

fn check_entry(entries: &[LedgerEntry], index: usize, entry: &LedgerEntry) -> Option<IntegrityViolation> {
    if entry.sequence != index as u64 {
        return Some(IntegrityViolation::SequenceGap {
            expected: index as u64,
            found: entry.sequence,
        });
    }

    let prev = index.checked_sub(1).map(|i| &entries[i]);
    match prev {
        None if entry.prev_hash != GENESIS_HASH => {
            return Some(IntegrityViolation::GenesisLinkage {
                found: entry.prev_hash.clone(),
            });
        }
        Some(p) if entry.prev_hash != p.hash => {
            return Some(IntegrityViolation::BrokenLink {
                expected: p.hash.clone(),
                found: entry.prev_hash.clone(),
            });
        }
        _ => {}
    }

    match compute_entry_hash(entry) {
        Ok(computed) if computed != entry.hash => {
            return Some(IntegrityViolation::HashMismatch {
                computed,
                stored: entry.hash.clone(),
            });
        }
        Ok(_) => {}
        Err(e) => {
            return Some(IntegrityViolation::Unhashable { reason: e.to_string() });
        }
    }

    if let Some(p) = prev
        && regresses(&p.timestamp, &entry.timestamp)
    {
        return Some(IntegrityViolation::TimestampRegression {
            previous: p.timestamp.clone(),
            found: entry.timestamp.clone(),
        });
    }

    None
}

/// Sequence numbers that occur more than once, ascending. Independent of
/// the chain walk.
pub fn find_duplicate_sequences(ledger: &Ledger) -> Vec<u64> {
    let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
    for entry in ledger.iter() {
        *counts.entry(entry.sequence).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(seq, _)| seq)
        .collect()
}
