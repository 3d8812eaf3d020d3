use crate::errors::EngineError;

/// Snapshot/restore primitives over a working tree.
///
/// Snapshots are content-addressed: the returned reference identifies the
/// captured tree and never changes meaning once issued.
pub trait SnapshotBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Capture the current working tree. `namespace` groups snapshots for
    /// later cleanup; `label` is descriptive only.
    ///
    /// Fails with `WorkTreeConflicted` if the tree is mid-merge or has
    /// conflicted paths, and with `CheckpointUnavailable` if the store
    /// cannot be reached.
    fn snapshot(&self, namespace: &str, label: &str) -> Result<String, EngineError>;

    /// Make the working tree match `snapshot_ref` exactly, discarding
    /// uncommitted work.
    fn restore(&self, snapshot_ref: &str) -> Result<(), EngineError>;

    fn exists(&self, snapshot_ref: &str) -> bool;

    /// Paths that differ between `snapshot_ref` and the current tree.
    fn changed_paths(&self, snapshot_ref: &str) -> Result<Vec<String>, EngineError>;

    /// Release everything retained under `namespace`. Returns the number of
    /// snapshots released.
    fn discard(&self, namespace: &str) -> Result<usize, EngineError>;
}
