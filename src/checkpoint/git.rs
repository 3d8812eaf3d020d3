//! Git-backed snapshots.
//!
//! A snapshot stages the whole working tree, writes a commit object without
//! moving `HEAD`, and pins it under `refs/conductor/<namespace>/<sha>` so it
//! survives garbage collection until [`SnapshotBackend::discard`] removes
//! the refs. Restoring checks the commit's tree out over the working tree
//! and the index; `HEAD` is left where it is.
//!
//! Paths under `.conductor/` are never captured or restored.
//!
//! Every repository operation holds the backend's lock: parallel executors
//! share one `.git/index`, and libgit2 fails rather than waits on its lock
//! file.

use crate::checkpoint::backend::SnapshotBackend;
use crate::errors::EngineError;
use git2::{IndexAddOption, Oid, Repository, RepositoryState, Signature};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const INTERNAL_DIR: &str = ".conductor";
const REF_PREFIX: &str = "refs/conductor";

pub struct GitBackend {
    work_dir: PathBuf,
    repo_lock: Mutex<()>,
}

impl GitBackend {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            repo_lock: Mutex::new(()),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, EngineError> {
        self.repo_lock
            .lock()
            .map_err(|_| EngineError::CheckpointUnavailable {
                reason: "git: repository lock poisoned".to_string(),
            })
    }

    fn open(&self) -> Result<Repository, EngineError> {
        let repo =
            Repository::open(&self.work_dir).map_err(|e| EngineError::CheckpointUnavailable {
                reason: format!(
                    "cannot open git repository at {}: {}",
                    self.work_dir.display(),
                    e.message()
                ),
            })?;
        // Keeps engine state out of snapshots and safe from remove_untracked.
        repo.add_ignore_rule(&format!("/{}/\n", INTERNAL_DIR))
            .map_err(unavailable("register ignore rule"))?;
        Ok(repo)
    }

    fn ensure_clean(repo: &Repository) -> Result<(), EngineError> {
        let state = repo.state();
        let index = repo.index().map_err(unavailable("read index"))?;
        if index.has_conflicts() {
            let mut paths = Vec::new();
            for conflict in index.conflicts().map_err(unavailable("read conflicts"))? {
                let conflict = conflict.map_err(unavailable("read conflicts"))?;
                if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
                    paths.push(String::from_utf8_lossy(&entry.path).into_owned());
                }
            }
            paths.sort();
            paths.dedup();
            return Err(EngineError::WorkTreeConflicted { paths });
        }
        if state != RepositoryState::Clean {
            return Err(EngineError::WorkTreeConflicted {
                paths: vec![format!("<repository state: {:?}>", state)],
            });
        }
        Ok(())
    }
}

impl SnapshotBackend for GitBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    fn snapshot(&self, namespace: &str, label: &str) -> Result<String, EngineError> {
        let _guard = self.lock()?;
        let repo = self.open()?;
        Self::ensure_clean(&repo)?;

        let mut index = repo.index().map_err(unavailable("read index"))?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(unavailable("stage working tree"))?;
        index
            .update_all(["*"].iter(), None)
            .map_err(unavailable("stage deletions"))?;
        index.write().map_err(unavailable("write index"))?;

        let tree_id = index.write_tree().map_err(unavailable("write tree"))?;
        let tree = repo.find_tree(tree_id).map_err(unavailable("find tree"))?;
        let sig = Signature::now("conductor", "conductor@localhost")
            .map_err(unavailable("build signature"))?;
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let message = format!("[conductor] checkpoint {}", label);
        let commit_id = repo
            .commit(None, &sig, &sig, &message, &tree, &parents)
            .map_err(unavailable("write commit"))?;

        let ref_name = format!("{}/{}/{}", REF_PREFIX, sanitize(namespace), commit_id);
        repo.reference(&ref_name, commit_id, true, &message)
            .map_err(unavailable("pin snapshot ref"))?;

        debug!(namespace, label, sha = %commit_id, "git snapshot created");
        Ok(commit_id.to_string())
    }

    fn restore(&self, snapshot_ref: &str) -> Result<(), EngineError> {
        let _guard = self.lock()?;
        let repo = self.open()?;
        let oid = Oid::from_str(snapshot_ref).map_err(unavailable("parse snapshot ref"))?;
        let commit = repo.find_commit(oid).map_err(unavailable("find snapshot"))?;
        let tree = commit.tree().map_err(unavailable("read snapshot tree"))?;

        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.checkout_tree(tree.as_object(), Some(&mut checkout))
            .map_err(unavailable("check out snapshot"))?;

        let mut index = repo.index().map_err(unavailable("read index"))?;
        index.read_tree(&tree).map_err(unavailable("reset index"))?;
        index.write().map_err(unavailable("write index"))?;

        debug!(sha = snapshot_ref, "git snapshot restored");
        Ok(())
    }

    fn exists(&self, snapshot_ref: &str) -> bool {
        let Ok(_guard) = self.lock() else {
            return false;
        };
        let Ok(repo) = self.open() else {
            return false;
        };
        Oid::from_str(snapshot_ref)
            .ok()
            .is_some_and(|oid| repo.find_commit(oid).is_ok())
    }

    fn changed_paths(&self, snapshot_ref: &str) -> Result<Vec<String>, EngineError> {
        let _guard = self.lock()?;
        let repo = self.open()?;
        let oid = Oid::from_str(snapshot_ref).map_err(unavailable("parse snapshot ref"))?;
        let tree = repo
            .find_commit(oid)
            .and_then(|c| c.tree())
            .map_err(unavailable("read snapshot tree"))?;

        let mut opts = git2::DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let diff = repo
            .diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))
            .map_err(unavailable("diff against snapshot"))?;

        let mut paths: Vec<String> = diff
            .deltas()
            .filter_map(|delta| delta.new_file().path().or_else(|| delta.old_file().path()))
            .filter(|path| !path.starts_with(INTERNAL_DIR))
            .map(|path| path.to_string_lossy().replace('\\', "/"))
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    fn discard(&self, namespace: &str) -> Result<usize, EngineError> {
        let _guard = self.lock()?;
        let repo = self.open()?;
        let glob = format!("{}/{}/*", REF_PREFIX, sanitize(namespace));
        let names: Vec<String> = repo
            .references_glob(&glob)
            .map_err(unavailable("list snapshot refs"))?
            .filter_map(|r| r.ok().and_then(|r| r.name().map(String::from)))
            .collect();
        for name in &names {
            repo.find_reference(name)
                .and_then(|mut r| r.delete())
                .map_err(unavailable("delete snapshot ref"))?;
        }
        Ok(names.len())
    }
}

fn unavailable(action: &'static str) -> impl Fn(git2::Error) -> EngineError {
    move |e| EngineError::CheckpointUnavailable {
        reason: format!("git: failed to {}: {}", action, e.message()),
    }
}

fn sanitize(namespace: &str) -> String {
    namespace
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
