//! Optimistic-concurrency queue for agent-submitted actions.
//!
//! Agents submit work against artifacts together with the revision they
//! last saw. Stale submissions are rejected immediately. A resubmission from
//! the same agent against the same artifact supersedes its earlier pending
//! entry, so each agent has at most one pending action per target.
//!
//! [`ActionQueue`] is a value: every operation returns a new queue.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_DEPTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Accepted,
    Rejected,
    Superseded,
}

/// What an agent asks the queue to hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueAction {
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub target_artifact_id: Option<String>,
    #[serde(default)]
    pub expected_revision: Option<u64>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    pub sequence: u64,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub target_artifact_id: Option<String>,
    pub expected_revision: Option<u64>,
    pub payload: Value,
    pub status: QueueStatus,
    pub submitted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl QueueEntry {
    pub fn is_pending(&self) -> bool {
        self.status == QueueStatus::Pending
    }

    fn resolve(&mut self, status: QueueStatus, at: DateTime<Utc>) {
        self.status = status;
        self.resolved_at = Some(at);
    }
}

/// Result of [`ActionQueue::submit`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub queue: ActionQueue,
    pub entry: QueueEntry,
    /// The pending depth had already reached `max_depth`. Advisory only.
    pub back_pressure: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub superseded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionQueue {
    pub max_depth: usize,
    next_sequence: u64,
    entries: Vec<QueueEntry>,
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ActionQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            next_sequence: 0,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    /// Enqueue `action`.
    ///
    /// `revisions` maps artifact ids to their current revision; a target
    /// absent from the map is at revision 0. A mismatched
    /// `expected_revision` yields an entry that is already rejected.
    pub fn submit(&self, action: QueueAction, revisions: &HashMap<String, u64>) -> Submission {
        let now = Utc::now();
        let back_pressure = self.pending_count() >= self.max_depth;
        if back_pressure {
            warn!(depth = self.pending_count(), max = self.max_depth, "action queue back-pressure");
        }

        let mut entry = QueueEntry {
            id: Uuid::new_v4().to_string(),
            sequence: self.next_sequence,
            agent_id: action.agent_id,
            kind: action.kind,
            target_artifact_id: action.target_artifact_id,
            expected_revision: action.expected_revision,
            payload: action.payload,
            status: QueueStatus::Pending,
            submitted_at: now,
            resolved_at: None,
            rejection_reason: None,
        };

        let mut next = self.clone();
        next.next_sequence += 1;

        if let (Some(target), Some(expected)) = (entry.target_artifact_id.clone(), entry.expected_revision) {
            let current = revisions.get(&target).copied().unwrap_or(0);
            if current != expected {
                entry.resolve(QueueStatus::Rejected, now);
                entry.rejection_reason = Some(format!(
                    "Revision conflict on {target}: expected {expected}, current {current}"
                ));
                debug!(id = %entry.id, target = %target, "submission rejected as stale");
            }
        }

        if entry.is_pending()
            && let Some(target) = &entry.target_artifact_id
        {
            for earlier in next.entries.iter_mut().filter(|e| {
                e.is_pending() && e.agent_id == entry.agent_id && e.target_artifact_id.as_ref() == Some(target)
            }) {
                earlier.resolve(QueueStatus::Superseded, now);
                debug!(id = %earlier.id, by = %entry.id, "queued action superseded");
            }
        }

        next.entries.push(entry.clone());
        Submission {
            queue: next,
            entry,
            back_pressure,
        }
    }

    /// The oldest pending entry, without resolving it.
    pub fn peek_next(&self) -> Option<&QueueEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_pending())
            .min_by_key(|e| e.sequence)
    }

    /// Accept the oldest pending entry. Returns it alongside the new queue,
    /// or `None` when nothing is pending.
    pub fn process_next(&self) -> (ActionQueue, Option<QueueEntry>) {
        let Some(id) = self.peek_next().map(|e| e.id.clone()) else {
            return (self.clone(), None);
        };
        let next = self.accept(&id);
        let accepted = next.get(&id).cloned();
        (next, accepted)
    }

    /// Accept a pending entry by id. Resolved or unknown ids leave the
    /// queue unchanged.
    pub fn accept(&self, id: &str) -> ActionQueue {
        let mut next = self.clone();
        if let Some(entry) = next.entries.iter_mut().find(|e| e.id == id && e.is_pending()) {
            entry.resolve(QueueStatus::Accepted, Utc::now());
        }
        next
    }

    /// Reject a pending entry by id. Resolved or unknown ids leave the
    /// queue unchanged.
    pub fn reject(&self, id: &str, reason: &str) -> ActionQueue {
        let mut next = self.clone();
        if let Some(entry) = next.entries.iter_mut().find(|e| e.id == id && e.is_pending()) {
            entry.resolve(QueueStatus::Rejected, Utc::now());
            entry.rejection_reason = Some(reason.to_string());
        }
        next
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.entries.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Accepted => stats.accepted += 1,
                QueueStatus::Rejected => stats.rejected += 1,
                QueueStatus::Superseded => stats.superseded += 1,
            }
        }
        stats
    }

    /// Keep every pending entry and the `max_resolved` most recently
    /// submitted resolved ones, preserving order.
    pub fn compact(&self, max_resolved: usize) -> ActionQueue {
        let resolved = self.entries.iter().filter(|e| !e.is_pending()).count();
        let mut skip = resolved.saturating_sub(max_resolved);
        let entries = self
            .entries
            .iter()
            .filter(|e| {
                if !e.is_pending() && skip > 0 {
                    skip -= 1;
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect();
        ActionQueue {
            max_depth: self.max_depth,
            next_sequence: self.next_sequence,
            entries,
        }
    }
}
