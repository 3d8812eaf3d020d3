//! Checkpoint Manager: immutable snapshots of work-tree state keyed by
//! phase, with rollback to any prior snapshot.
//!
//! - [`SnapshotBackend`] is the version-control seam. [`GitBackend`] is the
//!   production implementation; [`MemoryBackend`] simulates a tree in memory.
//! - [`CheckpointManager`] records checkpoints in the artifact store and
//!   retries creation with backoff when the backend is unavailable.

mod backend;
mod git;
mod manager;
mod memory;

pub use backend::SnapshotBackend;
pub use git::GitBackend;
pub use manager::{BackoffPolicy, CheckpointManager};
pub use memory::MemoryBackend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable record of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub task_id: String,
    /// `<component>:<stage>` for executor checkpoints; free-form otherwise.
    pub phase_label: String,
    pub snapshot_ref: String,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn short_ref(&self) -> &str {
        &self.snapshot_ref[..self.snapshot_ref.len().min(12)]
    }
}
