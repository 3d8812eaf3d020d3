//! Key/value artifact store.
//!
//! Keys are `/`-separated relative paths (`tasks/<id>/task.json`). The engine
//! only sees [`ArtifactStore`]; [`FsArtifactStore`] maps keys to files under a
//! root directory and [`MemoryArtifactStore`] keeps everything in memory.
//!
//! Key layout:
//!
//! | Key                                  | Content                        |
//! |--------------------------------------|--------------------------------|
//! | `tasks/<id>/task.json`               | current [`Task`] state         |
//! | `tasks/<id>/spec.json`               | submitted task specification   |
//! | `sessions/<id>.json`                 | session snapshot               |
//! | `checkpoints/<id>.json`              | checkpoint index               |
//! | `escalations/<id>/<component>.json`  | escalation records             |
//! | `archive/<id>.json`                  | final state of completed tasks |
//!
//! [`Task`]: crate::task::Task

use crate::errors::EngineError;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

pub trait ArtifactStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> Result<bool>;
    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Files under a root directory. Writes go through a temporary file and a
/// rename so readers never observe a partial value.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid store key: '{}'", key);
        }
        Ok(self.root.join(relative))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, out)?;
            } else if path.extension().is_none_or(|ext| ext != "tmp")
                && let Ok(relative) = path.strip_prefix(&self.root)
            {
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(bytes))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, value)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to delete {}", path.display()))?;
        Ok(true)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.collect(&self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

#[derive(Default)]
pub struct MemoryArtifactStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries()?.remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Typed JSON access on top of an [`ArtifactStore`].
#[derive(Clone)]
pub struct JsonStore {
    inner: Arc<dyn ArtifactStore>,
}

impl JsonStore {
    pub fn new(inner: Arc<dyn ArtifactStore>) -> Self {
        Self { inner }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryArtifactStore::new()))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, EngineError> {
        let Some(bytes) = self.inner.get(key).map_err(EngineError::Store)? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse stored value '{}'", key))
            .map_err(EngineError::Store)?;
        Ok(Some(value))
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("Failed to serialize '{}'", key))
            .map_err(EngineError::Store)?;
        self.inner.put(key, &bytes).map_err(EngineError::Store)
    }

    pub fn delete(&self, key: &str) -> Result<bool, EngineError> {
        self.inner.delete(key).map_err(EngineError::Store)
    }

    pub fn list(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
        self.inner.list(prefix).map_err(EngineError::Store)
    }
}

pub mod keys {
    pub fn task(task_id: &str) -> String {
        format!("tasks/{}/task.json", task_id)
    }

    pub fn spec(task_id: &str) -> String {
        format!("tasks/{}/spec.json", task_id)
    }

    pub fn session(task_id: &str) -> String {
        format!("sessions/{}.json", task_id)
    }

    pub fn checkpoints(task_id: &str) -> String {
        format!("checkpoints/{}.json", task_id)
    }

    pub fn escalations(task_id: &str) -> String {
        format!("escalations/{}/", task_id)
    }

    pub fn escalation(task_id: &str, unit: &str) -> String {
        let safe: String = unit
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("escalations/{}/{}.json", task_id, safe)
    }

    pub fn archive(task_id: &str) -> String {
        format!("archive/{}.json", task_id)
    }
}
