//! In-memory snapshot backend over a simulated working tree.
//!
//! Used by `--simulate` runs and by engine tests that need deterministic
//! checkpointing without a git repository.

use crate::checkpoint::backend::SnapshotBackend;
use crate::errors::EngineError;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct State {
    tree: Tree,
    snapshots: BTreeMap<String, Tree>,
    namespaces: BTreeMap<String, BTreeSet<String>>,
    conflicted: Vec<String>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    failures_remaining: AtomicU32,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` snapshot calls fail with `CheckpointUnavailable`.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Mark paths as conflicted; snapshots fail until cleared with an empty list.
    pub fn set_conflicted(&self, paths: &[&str]) {
        if let Ok(mut state) = self.state.lock() {
            state.conflicted = paths.iter().map(|p| p.to_string()).collect();
        }
    }

    pub fn write_file(&self, path: &str, content: &[u8]) {
        if let Ok(mut state) = self.state.lock() {
            state.tree.insert(path.to_string(), content.to_vec());
        }
    }

    pub fn remove_file(&self, path: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.tree.remove(path);
        }
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.tree.get(path).cloned())
    }

    pub fn files(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.tree.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, EngineError> {
        self.state
            .lock()
            .map_err(|_| EngineError::CheckpointUnavailable {
                reason: "memory backend lock poisoned".to_string(),
            })
    }

    fn digest(tree: &Tree) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in tree {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(content);
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl SnapshotBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn snapshot(&self, namespace: &str, _label: &str) -> Result<String, EngineError> {
        let pending = self.failures_remaining.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures_remaining.store(pending - 1, Ordering::SeqCst);
            return Err(EngineError::CheckpointUnavailable {
                reason: "memory backend configured to fail".to_string(),
            });
        }

        let mut state = self.lock()?;
        if !state.conflicted.is_empty() {
            return Err(EngineError::WorkTreeConflicted {
                paths: state.conflicted.clone(),
            });
        }
        let sha = Self::digest(&state.tree);
        let tree = state.tree.clone();
        state.snapshots.insert(sha.clone(), tree);
        state
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(sha.clone());
        Ok(sha)
    }

    fn restore(&self, snapshot_ref: &str) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        let tree = state.snapshots.get(snapshot_ref).cloned().ok_or_else(|| {
            EngineError::CheckpointUnavailable {
                reason: format!("snapshot {} is not retained", snapshot_ref),
            }
        })?;
        state.tree = tree;
        Ok(())
    }

    fn exists(&self, snapshot_ref: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.snapshots.contains_key(snapshot_ref))
            .unwrap_or(false)
    }

    fn changed_paths(&self, snapshot_ref: &str) -> Result<Vec<String>, EngineError> {
        let state = self.lock()?;
        let Some(base) = state.snapshots.get(snapshot_ref) else {
            return Err(EngineError::CheckpointUnavailable {
                reason: format!("snapshot {} is not retained", snapshot_ref),
            });
        };
        let paths: BTreeSet<&String> = base.keys().chain(state.tree.keys()).collect();
        Ok(paths
            .into_iter()
            .filter(|p| base.get(*p) != state.tree.get(*p))
            .cloned()
            .collect())
    }

    fn discard(&self, namespace: &str) -> Result<usize, EngineError> {
        let mut state = self.lock()?;
        let Some(refs) = state.namespaces.remove(namespace) else {
            return Ok(0);
        };
        let still_referenced: BTreeSet<String> =
            state.namespaces.values().flatten().cloned().collect();
        for sha in &refs {
            if !still_referenced.contains(sha) {
                state.snapshots.remove(sha);
            }
        }
        Ok(refs.len())
    }
}
