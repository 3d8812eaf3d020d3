//! Integration tests for the conductor CLI
//!
//! These tests drive the binary end to end against a temporary project,
//! using `--simulate` wherever a worker would be called.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const SPEC: &str = r#"{
  "requirements": "Add a settings page",
  "approach": "Store settings server-side",
  "components": [
    {"name": "api", "scope": ["src/api"]},
    {"name": "storage", "scope": ["src/storage"]},
    {"name": "ui", "depends_on": ["api", "storage"], "scope": ["src/ui"]}
  ]
}"#;

/// Helper to create a conductor Command with a clean environment
fn conductor() -> Command {
    let mut cmd = cargo_bin_cmd!("conductor");
    cmd.env_remove("CONDUCTOR_WORKER_CMD").env_remove("RUST_LOG");
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_project(dir: &TempDir) {
    conductor()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

/// Write `spec` into the project, start it and return the task id.
fn start_task(dir: &TempDir, spec: &str) -> String {
    let path = dir.path().join("task.json");
    fs::write(&path, spec).unwrap();
    let output = conductor()
        .current_dir(dir.path())
        .arg("start")
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success(), "start failed: {:?}", output);
    let stdout = String::from_utf8(output.stdout).unwrap();
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Started task "))
        .map(|id| id.trim().to_string())
        .expect("task id in output")
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_conductor_help() {
        conductor()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("checkpoint"));
    }

    #[test]
    fn test_conductor_version() {
        conductor().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        conductor()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized conductor project"));

        assert!(dir.path().join(".conductor/conductor.toml").exists());
        assert!(dir.path().join(".conductor/store").exists());
        assert!(dir.path().join(".conductor/logs").exists());
        assert!(dir.path().join(".conductor/.gitignore").exists());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        init_project(&dir);

        conductor()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_commands_require_init() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["status", "missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("conductor init"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_validate_defaults() {
        let dir = create_temp_project();
        init_project(&dir);

        conductor()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_reports_even_judges() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".conductor/conductor.toml"),
            "[consensus]\njudges = 4\n",
        )
        .unwrap();

        conductor()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings:"))
            .stdout(predicate::str::contains("judges"));
    }

    #[test]
    fn test_config_show_prints_sections() {
        let dir = create_temp_project();
        init_project(&dir);

        conductor()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[scheduler]"))
            .stdout(predicate::str::contains("worker command = (none)"));
    }
}

// =============================================================================
// Task Lifecycle
// =============================================================================

mod task_lifecycle {
    use super::*;

    #[test]
    fn test_start_prints_wave_plan() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(dir.path().join("task.json"), SPEC).unwrap();

        conductor()
            .current_dir(dir.path())
            .args(["start", "task.json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Started task"))
            .stdout(predicate::str::contains("api, storage"))
            .stdout(predicate::str::contains("ui"));
    }

    #[test]
    fn test_start_rejects_cycle() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join("cycle.json"),
            r#"{"requirements": "r", "components": [
                {"name": "A", "depends_on": ["B"]},
                {"name": "B", "depends_on": ["A"]}
            ]}"#,
        )
        .unwrap();

        conductor()
            .current_dir(dir.path())
            .args(["start", "cycle.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cycle detected"))
            .stderr(predicate::str::contains("A -> B -> A"));
    }

    #[test]
    fn test_start_accepts_yaml() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join("task.yaml"),
            "requirements: r\ncomponents:\n  - name: only\n",
        )
        .unwrap();

        conductor()
            .current_dir(dir.path())
            .args(["start", "task.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("only"));
    }

    #[test]
    fn test_status_of_new_task() {
        let dir = create_temp_project();
        init_project(&dir);
        let task_id = start_task(&dir, SPEC);

        conductor()
            .current_dir(dir.path())
            .args(["status", &task_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("NOT_STARTED"))
            .stdout(predicate::str::contains("storage"));
    }

    #[test]
    fn test_status_unknown_task_fails() {
        let dir = create_temp_project();
        init_project(&dir);

        conductor()
            .current_dir(dir.path())
            .args(["status", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("nope"));
    }

    #[test]
    fn test_run_without_worker_command_fails() {
        let dir = create_temp_project();
        init_project(&dir);
        let task_id = start_task(&dir, SPEC);

        conductor()
            .current_dir(dir.path())
            .args(["run", &task_id])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No worker command configured"));
    }

    #[test]
    fn test_simulated_run_completes_task() {
        let dir = create_temp_project();
        init_project(&dir);
        let task_id = start_task(&dir, SPEC);

        conductor()
            .current_dir(dir.path())
            .args(["--simulate", "run", &task_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Wave 1"))
            .stdout(predicate::str::contains("Wave 2"))
            .stdout(predicate::str::contains(format!("Task {} complete", task_id)));

        // Archived tasks stay readable
        conductor()
            .current_dir(dir.path())
            .args(["status", &task_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("COMPLETE"));
    }

    #[test]
    fn test_single_wave_stops_at_barrier() {
        let dir = create_temp_project();
        init_project(&dir);
        let task_id = start_task(&dir, SPEC);

        conductor()
            .current_dir(dir.path())
            .args(["--simulate", "run", &task_id, "--wave"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Wave 1 finished"))
            .stdout(predicate::str::contains("completed  api, storage"));

        conductor()
            .current_dir(dir.path())
            .args(["session", "show", &task_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("waves run: 1"))
            .stdout(predicate::str::contains("ui"));
    }

    #[test]
    fn test_complete_before_waves_fails() {
        let dir = create_temp_project();
        init_project(&dir);
        let task_id = start_task(&dir, SPEC);

        conductor()
            .current_dir(dir.path())
            .args(["--simulate", "complete", &task_id])
            .assert()
            .failure();
    }

    #[test]
    fn test_resume_reports_progress() {
        let dir = create_temp_project();
        init_project(&dir);
        let task_id = start_task(&dir, SPEC);

        conductor()
            .current_dir(dir.path())
            .args(["resume", &task_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("0 of 3 components complete"));
    }

    #[test]
    fn test_unblock_rejects_runnable_component() {
        let dir = create_temp_project();
        init_project(&dir);
        let task_id = start_task(&dir, SPEC);

        conductor()
            .current_dir(dir.path())
            .args(["unblock", &task_id, "api"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Checkpoints
// =============================================================================

mod checkpoints {
    use super::*;

    #[test]
    fn test_simulated_checkpoint_create_and_list() {
        let dir = create_temp_project();
        init_project(&dir);
        let task_id = start_task(&dir, SPEC);

        conductor()
            .current_dir(dir.path())
            .args(["--simulate", "checkpoint", "create", &task_id, "before-refactor"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created checkpoint"));

        conductor()
            .current_dir(dir.path())
            .args(["checkpoint", "list", &task_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("before-refactor"))
            .stdout(predicate::str::contains("1 checkpoint(s)"));

        conductor()
            .current_dir(dir.path())
            .args(["--simulate", "checkpoint", "cleanup", &task_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1 checkpoint(s)"));
    }

    #[test]
    fn test_list_without_checkpoints() {
        let dir = create_temp_project();
        init_project(&dir);
        let task_id = start_task(&dir, SPEC);

        conductor()
            .current_dir(dir.path())
            .args(["checkpoint", "list", &task_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("No checkpoints"));
    }
}
