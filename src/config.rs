use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::conductor_config::{CONFIG_FILE_NAME, ConductorToml};
use crate::store::{FsArtifactStore, JsonStore};

/// Runtime configuration for one project.
///
/// Resolves every path under `.conductor/` and carries the parsed
/// `conductor.toml`.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub conductor_dir: PathBuf,
    pub store_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_file: PathBuf,
    pub verbose: bool,
    pub toml: ConductorToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let conductor_dir = project_dir.join(".conductor");
        let toml = ConductorToml::load_or_default(&conductor_dir)?;

        Ok(Self {
            store_dir: conductor_dir.join("store"),
            log_dir: conductor_dir.join("logs"),
            config_file: conductor_dir.join(CONFIG_FILE_NAME),
            conductor_dir,
            project_dir,
            verbose,
            toml,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.conductor_dir.exists()
    }

    /// Create `.conductor/` and its subdirectories. The directory ignores
    /// itself so snapshots of the project never include engine state.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.store_dir).context("Failed to create store directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        let gitignore = self.conductor_dir.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n").context("Failed to write .conductor/.gitignore")?;
        }
        Ok(())
    }

    /// Artifact store rooted at `.conductor/store`.
    pub fn store(&self) -> JsonStore {
        JsonStore::new(Arc::new(FsArtifactStore::new(&self.store_dir)))
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_paths_live_under_conductor_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), true).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert!(config.verbose);
        assert_eq!(config.conductor_dir, root.join(".conductor"));
        assert_eq!(config.store_dir, root.join(".conductor/store"));
        assert_eq!(config.log_dir, root.join(".conductor/logs"));
        assert_eq!(config.config_file, root.join(".conductor/conductor.toml"));
        assert!(!config.is_initialized());
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.store_dir.exists());
        assert!(config.log_dir.exists());
        assert_eq!(
            fs::read_to_string(config.conductor_dir.join(".gitignore")).unwrap(),
            "*\n"
        );
        assert!(config.is_initialized());
    }

    #[test]
    fn test_loads_conductor_toml() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".conductor")).unwrap();
        fs::write(
            dir.path().join(".conductor/conductor.toml"),
            "[consensus]\njudges = 5\n",
        )
        .unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert_eq!(config.toml.consensus.judges, 5);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_missing_project_dir_is_an_error() {
        let dir = tempdir().unwrap();
        let result = Config::new(dir.path().join("nope"), false);
        assert!(result.is_err());
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        config.ensure_directories().unwrap();
        let store = config.store();
        store.put("tasks/t1/task.json", &vec![1, 2, 3]).unwrap();
        assert_eq!(
            store.get::<Vec<i32>>("tasks/t1/task.json").unwrap(),
            Some(vec![1, 2, 3])
        );
    }
}
