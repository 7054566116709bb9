//! Version history with a retention policy for automatic saves.
//!
//! Manual versions are kept until the user deletes them. Automatic versions
//! are capped: after every write only the newest `max_automatic` survive.

use crate::ids::VersionId;
use crate::story::StorySnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Default number of automatic versions kept.
pub const DEFAULT_MAX_AUTOMATIC: usize = 20;

fn default_max_automatic() -> usize {
    DEFAULT_MAX_AUTOMATIC
}

/// How a version was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionKind {
    /// Named by the user; never pruned.
    Manual,
    /// Written by the autosave scheduler; subject to retention.
    Automatic,
}

/// An immutable restore point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub kind: VersionKind,
    pub snapshot: StorySnapshot,
    /// Insertion order, breaks ties between equal timestamps.
    #[serde(default)]
    seq: u64,
}

impl Version {
    pub fn is_manual(&self) -> bool {
        self.kind == VersionKind::Manual
    }
}

/// Name given to automatic versions.
pub fn autosave_name(at: DateTime<Utc>) -> String {
    format!("Autosave {}", at.format("%Y-%m-%d %H:%M:%S"))
}

/// Append-only version log, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLog {
    versions: Vec<Version>,
    #[serde(default)]
    next_seq: u64,
    #[serde(default = "default_max_automatic")]
    max_automatic: usize,
}

impl Default for VersionLog {
    fn default() -> Self {
        Self::with_retention(DEFAULT_MAX_AUTOMATIC)
    }
}

impl VersionLog {
    /// Create a log keeping at most `max_automatic` automatic versions.
    pub fn with_retention(max_automatic: usize) -> Self {
        Self {
            versions: Vec::new(),
            next_seq: 0,
            max_automatic,
        }
    }

    /// Change the automatic-version cap and apply it immediately.
    pub fn set_retention(&mut self, max_automatic: usize) -> Vec<VersionId> {
        self.max_automatic = max_automatic;
        self.prune()
    }

    /// Save a user-named version now.
    pub fn save_manual(&mut self, name: impl Into<String>, snapshot: StorySnapshot) -> VersionId {
        self.record(VersionKind::Manual, name, snapshot, Utc::now())
    }

    /// Save an automatic version now, named after its timestamp.
    pub fn save_automatic(&mut self, snapshot: StorySnapshot) -> VersionId {
        let now = Utc::now();
        self.record(VersionKind::Automatic, autosave_name(now), snapshot, now)
    }

    /// Append a version with an explicit timestamp and apply retention.
    pub fn record(
        &mut self,
        kind: VersionKind,
        name: impl Into<String>,
        snapshot: StorySnapshot,
        created_at: DateTime<Utc>,
    ) -> VersionId {
        let id = VersionId::new();
        self.versions.push(Version {
            id,
            name: name.into(),
            created_at,
            kind,
            snapshot,
            seq: self.next_seq,
        });
        self.next_seq += 1;

        let pruned = self.prune();
        if !pruned.is_empty() {
            tracing::debug!(pruned = pruned.len(), "pruned automatic versions");
        }
        id
    }

    /// Sort newest first and drop automatic versions beyond the cap.
    fn prune(&mut self) -> Vec<VersionId> {
        self.versions
            .sort_by_key(|v| Reverse((v.created_at, v.seq)));

        let mut automatic_seen = 0;
        let mut pruned = Vec::new();
        let max = self.max_automatic;
        self.versions.retain(|v| {
            if v.is_manual() {
                return true;
            }
            automatic_seen += 1;
            if automatic_seen > max {
                pruned.push(v.id);
                false
            } else {
                true
            }
        });
        pruned
    }

    /// All versions, newest first.
    pub fn list(&self) -> &[Version] {
        &self.versions
    }

    pub fn get(&self, id: VersionId) -> Option<&Version> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// Delete a version. Returns whether it existed.
    pub fn delete(&mut self, id: VersionId) -> bool {
        let before = self.versions.len();
        self.versions.retain(|v| v.id != id);
        before != self.versions.len()
    }

    pub fn latest(&self) -> Option<&Version> {
        self.versions.first()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn manual_count(&self) -> usize {
        self.versions.iter().filter(|v| v.is_manual()).count()
    }

    pub fn automatic_count(&self) -> usize {
        self.versions.len() - self.manual_count()
    }
}
