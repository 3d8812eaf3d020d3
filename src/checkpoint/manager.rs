//! Checkpoint bookkeeping on top of a [`SnapshotBackend`].
//!
//! The manager keeps an append-only index per task in the artifact store
//! (`checkpoints/<task>.json`). Entries are immutable; the only way they go
//! away is [`CheckpointManager::cleanup`].

use crate::checkpoint::Checkpoint;
use crate::checkpoint::backend::SnapshotBackend;
use crate::errors::EngineError;
use crate::store::{JsonStore, keys};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Retry schedule for checkpoint creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

pub struct CheckpointManager {
    backend: Arc<dyn SnapshotBackend>,
    store: JsonStore,
    // Serializes read-modify-write of the per-task index across executors.
    index_lock: Mutex<()>,
}

impl CheckpointManager {
    pub fn new(backend: Arc<dyn SnapshotBackend>, store: JsonStore) -> Self {
        Self {
            backend,
            store,
            index_lock: Mutex::new(()),
        }
    }

    /// Snapshot the working tree and record a checkpoint for `phase_label`.
    pub fn create(&self, task_id: &str, phase_label: &str) -> Result<Checkpoint, EngineError> {
        let snapshot_ref = self.backend.snapshot(task_id, phase_label)?;
        self.record(task_id, phase_label, snapshot_ref)
    }

    /// Snapshot on the blocking pool so a slow repository never stalls the
    /// executors sharing this runtime.
    async fn snapshot_blocking(&self, task_id: &str, phase_label: &str) -> Result<String, EngineError> {
        let backend = self.backend.clone();
        let (namespace, label) = (task_id.to_string(), phase_label.to_string());
        tokio::task::spawn_blocking(move || backend.snapshot(&namespace, &label))
            .await
            .unwrap_or_else(|e| {
                Err(EngineError::CheckpointUnavailable {
                    reason: format!("snapshot task failed: {}", e),
                })
            })
    }

    fn record(
        &self,
        task_id: &str,
        phase_label: &str,
        snapshot_ref: String,
    ) -> Result<Checkpoint, EngineError> {
        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            phase_label: phase_label.to_string(),
            snapshot_ref,
            created_at: Utc::now(),
        };

        let _guard = self.lock()?;
        let mut index = self.load_index(task_id)?;
        index.push(checkpoint.clone());
        self.store.put(&keys::checkpoints(task_id), &index)?;

        info!(
            task = task_id,
            phase = phase_label,
            checkpoint = %checkpoint.id,
            snapshot = %checkpoint.snapshot_ref,
            "Checkpoint created"
        );
        Ok(checkpoint)
    }

    /// [`create`](Self::create), retried with exponential backoff while the
    /// failure is retryable.
    pub async fn create_with_retry(
        &self,
        task_id: &str,
        phase_label: &str,
        policy: BackoffPolicy,
    ) -> Result<Checkpoint, EngineError> {
        let mut attempt = 0;
        loop {
            let created = match self.snapshot_blocking(task_id, phase_label).await {
                Ok(snapshot_ref) => self.record(task_id, phase_label, snapshot_ref),
                Err(e) => Err(e),
            };
            match created {
                Ok(checkpoint) => return Ok(checkpoint),
                Err(e) if e.is_retryable() && attempt < policy.retries => {
                    attempt += 1;
                    let delay = policy.delay(attempt);
                    warn!(
                        task = task_id,
                        phase = phase_label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Checkpoint failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Restore the working tree to `checkpoint_id`.
    pub fn rollback(&self, task_id: &str, checkpoint_id: &str) -> Result<Checkpoint, EngineError> {
        let checkpoint = self.get(task_id, checkpoint_id)?;
        if !self.backend.exists(&checkpoint.snapshot_ref) {
            return Err(EngineError::RollbackTargetMissing {
                task_id: task_id.to_string(),
                checkpoint_id: checkpoint_id.to_string(),
            });
        }
        self.backend.restore(&checkpoint.snapshot_ref)?;
        info!(
            task = task_id,
            checkpoint = checkpoint_id,
            phase = %checkpoint.phase_label,
            "Rolled back to checkpoint"
        );
        Ok(checkpoint)
    }

    pub fn get(&self, task_id: &str, checkpoint_id: &str) -> Result<Checkpoint, EngineError> {
        self.load_index(task_id)?
            .into_iter()
            .find(|c| c.id == checkpoint_id)
            .ok_or_else(|| EngineError::RollbackTargetMissing {
                task_id: task_id.to_string(),
                checkpoint_id: checkpoint_id.to_string(),
            })
    }

    /// Checkpoints in creation order.
    pub fn list(&self, task_id: &str) -> Result<Vec<Checkpoint>, EngineError> {
        self.load_index(task_id)
    }

    pub fn latest(&self, task_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        Ok(self.load_index(task_id)?.pop())
    }

    /// Paths changed since `checkpoint` was taken.
    pub fn changed_since(&self, checkpoint: &Checkpoint) -> Result<Vec<String>, EngineError> {
        self.backend.changed_paths(&checkpoint.snapshot_ref)
    }

    /// Drop every checkpoint of the task, releasing the backend snapshots.
    pub fn cleanup(&self, task_id: &str) -> Result<usize, EngineError> {
        let _guard = self.lock()?;
        let count = self.load_index(task_id)?.len();
        self.backend.discard(task_id)?;
        self.store.delete(&keys::checkpoints(task_id))?;
        info!(task = task_id, count, "Checkpoints cleaned up");
        Ok(count)
    }

    fn load_index(&self, task_id: &str) -> Result<Vec<Checkpoint>, EngineError> {
        Ok(self
            .store
            .get::<Vec<Checkpoint>>(&keys::checkpoints(task_id))?
            .unwrap_or_default())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, EngineError> {
        self.index_lock
            .lock()
            .map_err(|_| EngineError::CheckpointUnavailable {
                reason: "checkpoint index lock poisoned".to_string(),
            })
    }
}
