//! Read-only collaborator contract for the backup engine.
//!
//! The status fabric never drives backup work; it only queries per-tag
//! state to enrich the snapshot it publishes. The engine side implements
//! [`BackupAgent`]; tests and embedders without an engine use
//! [`FixedBackupAgent`].

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pulsegrid_store::Txn;

use crate::error::StatusResult;

/// Lifecycle state of one backup tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagState {
    /// Accepted but not yet producing data.
    Submitted,
    /// Initial full backup in progress.
    Backup,
    /// Continuous differential mode; the backup is restorable.
    Differential,
    Completed,
    Aborted,
}

impl TagState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagState::Submitted => "submitted",
            TagState::Backup => "backing up",
            TagState::Differential => "differential",
            TagState::Completed => "completed",
            TagState::Aborted => "aborted",
        }
    }

    /// Whether a backup is actively running for this tag.
    pub fn is_running(&self) -> bool {
        matches!(self, TagState::Backup | TagState::Differential)
    }

    /// Whether the running backup can currently be restored from.
    pub fn is_restorable(&self) -> bool {
        matches!(self, TagState::Differential)
    }
}

/// Per-tag status as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagStatus {
    pub state: TagState,
    /// Destination container identifier.
    pub container: String,
    pub range_bytes_written: i64,
    pub log_bytes_written: i64,
    /// Newest version a restore could reach.
    pub last_restorable_version: u64,
}

/// Cumulative transfer counters for this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoCounters {
    pub bytes_sent: u64,
    pub requests: u64,
}

impl IoCounters {
    /// Counter delta since `earlier`. Saturates if counters reset.
    pub fn since(&self, earlier: &IoCounters) -> IoCounters {
        IoCounters {
            bytes_sent: self.bytes_sent.saturating_sub(earlier.bytes_sent),
            requests: self.requests.saturating_sub(earlier.requests),
        }
    }
}

/// Read-only queries the snapshot builder issues against the engine.
///
/// Tag enumeration follows the store's natural key order, and each
/// tag's status depends only on that tag, so `tag_status` calls for
/// different tags may be issued concurrently.
#[async_trait]
pub trait BackupAgent: Send + Sync {
    /// All tags this agent manages, in key order.
    async fn list_tags(&self, tx: &Txn) -> StatusResult<Vec<String>>;

    /// Status of one tag.
    async fn tag_status(&self, tx: &Txn, tag: &str) -> StatusResult<TagStatus>;

    /// Cumulative transfer counters for this process.
    fn io_counters(&self) -> IoCounters;
}

/// A [`BackupAgent`] with canned answers. The default has no tags and
/// zero counters, which is also the right collaborator for deployments
/// that publish status without an engine attached.
#[derive(Default)]
pub struct FixedBackupAgent {
    tags: Vec<(String, TagStatus)>,
    io: Mutex<IoCounters>,
}

impl FixedBackupAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag with its canned status. Tags are reported in insertion
    /// order; insert them sorted to mimic store key order.
    pub fn with_tag(mut self, name: &str, status: TagStatus) -> Self {
        self.tags.push((name.to_string(), status));
        self
    }

    /// Replace the cumulative counters.
    pub fn set_io_counters(&self, counters: IoCounters) {
        *self.io.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = counters;
    }
}

#[async_trait]
impl BackupAgent for FixedBackupAgent {
    async fn list_tags(&self, _tx: &Txn) -> StatusResult<Vec<String>> {
        Ok(self.tags.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn tag_status(&self, _tx: &Txn, tag: &str) -> StatusResult<TagStatus> {
        self.tags
            .iter()
            .find(|(name, _)| name == tag)
            .map(|(_, status)| status.clone())
            .ok_or_else(|| crate::error::StatusError::Agent(format!("unknown tag {tag}")))
    }

    fn io_counters(&self) -> IoCounters {
        *self.io.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
