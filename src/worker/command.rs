//! Worker backed by one external command.
//!
//! Every role is served by the same program. The request goes to stdin as a
//! JSON object with a `role` field; the response is read from stdout. Tools
//! that wrap their answer in prose or a fenced block are fine, the first
//! JSON object found is used.
//!
//! | Role                                      | Request fields          | Response          |
//! |-------------------------------------------|-------------------------|-------------------|
//! | skeleton, implementer, tester, documenter | `unit`                  | [`StageOutput`]   |
//! | fixer                                     | `unit`, `issues`        | [`StageOutput`]   |
//! | reviewer                                  | `unit`, `reviewer`, `focus_areas` | `{"issues": [..]}` |
//! | judge                                     | `ballot`, `seat`, `strategies` | [`Vote`]   |

use crate::consensus::{Ballot, Strategy, Vote};
use crate::review::findings::Issue;
use crate::review::specialists::ReviewerKind;
use crate::worker::{Fixer, Judge, Reviewer, StageOutput, StageWorker, WorkUnit, WorkerRole, Workers};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Default timeout for one worker invocation.
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandWorkerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

impl CommandWorkerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECS),
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

pub struct CommandWorker {
    config: CommandWorkerConfig,
}

#[derive(Deserialize)]
struct ReviewResponse {
    #[serde(default)]
    issues: Vec<Issue>,
}

impl CommandWorker {
    pub fn new(config: CommandWorkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandWorkerConfig {
        &self.config
    }

    /// Wrap this worker so it serves every role: one reviewer per roster
    /// entry and `judges` judge seats.
    pub fn into_workers(self, roster: &[ReviewerKind], judges: usize) -> Workers {
        let worker = Arc::new(self);
        Workers {
            stage: worker.clone(),
            reviewers: roster
                .iter()
                .map(|kind| {
                    Arc::new(CommandReviewer {
                        worker: worker.clone(),
                        kind: kind.clone(),
                    }) as Arc<dyn Reviewer>
                })
                .collect(),
            fixer: worker.clone(),
            judges: (1..=judges)
                .map(|seat| {
                    Arc::new(CommandJudge {
                        worker: worker.clone(),
                        seat: format!("judge-{}", seat),
                    }) as Arc<dyn Judge>
                })
                .collect(),
        }
    }

    /// Run the command with `request` on stdin and return its stdout.
    async fn invoke(&self, role: WorkerRole, request: Value) -> Result<String> {
        let start = Instant::now();
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .env("CONDUCTOR_ROLE", role.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn worker command '{}'", self.config.command))?;

        let payload = serde_json::to_vec(&request).context("Failed to encode worker request")?;
        let stdin = child.stdin.take();
        let write_request = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        // The request is written while the output is drained, all under one
        // deadline. Dropping the child on timeout kills it.
        let exchange = async move {
            let (written, output) = tokio::join!(write_request, child.wait_with_output());
            if let Err(e) = written {
                debug!(%role, error = %e, "Worker did not read its full request");
            }
            output
        };
        let output = tokio::time::timeout(self.config.timeout, exchange)
            .await
            .with_context(|| {
                format!(
                    "{} worker timed out after {}s",
                    role,
                    self.config.timeout.as_secs_f64()
                )
            })?
            .context("Failed to wait for worker process")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} worker exited with code {}: {}",
                role,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        debug!(
            %role,
            duration_ms = start.elapsed().as_millis() as u64,
            bytes = output.stdout.len(),
            "Worker finished"
        );
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn call<T: DeserializeOwned>(&self, role: WorkerRole, request: Value) -> Result<T> {
        let stdout = self.invoke(role, request).await?;
        parse_response(&stdout).with_context(|| format!("Invalid {} worker response", role))
    }
}

fn parse_response<T: DeserializeOwned>(output: &str) -> Result<T> {
    let json = extract_json(output).context("No JSON object in worker output")?;
    Ok(serde_json::from_str(&json)?)
}

#[async_trait]
impl StageWorker for CommandWorker {
    async fn run_stage(&self, role: WorkerRole, unit: &WorkUnit) -> Result<StageOutput> {
        self.call(role, json!({ "role": role, "unit": unit })).await
    }
}

#[async_trait]
impl Fixer for CommandWorker {
    async fn fix(&self, unit: &WorkUnit, issues: &[Issue]) -> Result<StageOutput> {
        self.call(
            WorkerRole::Fixer,
            json!({ "role": WorkerRole::Fixer, "unit": unit, "issues": issues }),
        )
        .await
    }
}

/// One roster entry served by a [`CommandWorker`].
pub struct CommandReviewer {
    worker: Arc<CommandWorker>,
    kind: ReviewerKind,
}

#[async_trait]
impl Reviewer for CommandReviewer {
    fn name(&self) -> String {
        self.kind.agent_name()
    }

    async fn review(&self, unit: &WorkUnit) -> Result<Vec<Issue>> {
        let request = json!({
            "role": WorkerRole::Reviewer,
            "reviewer": self.kind.agent_name(),
            "focus_areas": self.kind.focus_areas(),
            "unit": unit,
        });
        let response: ReviewResponse = self.worker.call(WorkerRole::Reviewer, request).await?;
        Ok(response.issues)
    }
}

/// One judge seat served by a [`CommandWorker`].
pub struct CommandJudge {
    worker: Arc<CommandWorker>,
    seat: String,
}

#[async_trait]
impl Judge for CommandJudge {
    fn name(&self) -> String {
        self.seat.clone()
    }

    async fn vote(&self, ballot: &Ballot) -> Result<Vote> {
        let request = json!({
            "role": WorkerRole::Judge,
            "seat": self.seat,
            "strategies": Strategy::all(),
            "ballot": ballot,
        });
        self.worker.call(WorkerRole::Judge, request).await
    }
}

/// Extract the first JSON object from free-form output.
///
/// Looks for a fenced ```` ```json ```` block first, then any fenced block
/// containing an object, then a bare brace-balanced object.
pub fn extract_json(output: &str) -> Option<String> {
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    if let Some(start) = output.find("```") {
        let after_marker = &output[start + 3..];
        if let Some(end) = after_marker.find("```")
            && let Some(json_start) = after_marker[..end].find('{')
        {
            return Some(after_marker[json_start..end].trim().to_string());
        }
    }

    let start = output.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in output[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(output[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Stage;
    use crate::review::findings::Severity;
    use crate::worker::UnitScope;

    fn unit() -> WorkUnit {
        WorkUnit {
            task_id: "t1".into(),
            scope: UnitScope::Component("api".into()),
            stage: Stage::Implement,
            requirements: "r".into(),
            approach: "a".into(),
            description: String::new(),
            paths: vec![],
            components: vec!["api".into()],
            guidance: None,
        }
    }

    fn shell(script: &str) -> CommandWorker {
        CommandWorker::new(
            CommandWorkerConfig::new("sh")
                .with_args(vec!["-c".into(), script.into()])
                .with_timeout(Duration::from_secs(5)),
        )
    }

    #[test]
    fn test_extract_json_from_fenced_block() {
        let output = "Here you go:\n```json\n{\"summary\": \"ok\"}\n```\nDone.";
        assert_eq!(extract_json(output).unwrap(), "{\"summary\": \"ok\"}");
    }

    #[test]
    fn test_extract_json_from_generic_block() {
        let output = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(output).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_raw_json_with_braces_in_strings() {
        let output = r#"Result: {"summary": "uses {braces}", "n": {"x": 1}} trailing"#;
        assert_eq!(
            extract_json(output).unwrap(),
            r#"{"summary": "uses {braces}", "n": {"x": 1}}"#
        );
    }

    #[test]
    fn test_extract_json_none_without_object() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("{ unbalanced").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stage_worker_parses_stdout() {
        let worker = shell(r#"cat >/dev/null; echo '{"summary":"built","artifacts":["src/api.rs"]}'"#);
        let output = worker.run_stage(WorkerRole::Implementer, &unit()).await.unwrap();
        assert_eq!(output.summary, "built");
        assert_eq!(output.artifacts, vec!["src/api.rs"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_request_carries_role() {
        let worker = shell(
            r#"if grep -q '"role":"tester"'; then echo '{"summary":"tested"}'; else exit 3; fi"#,
        );
        let output = worker.run_stage(WorkerRole::Tester, &unit()).await.unwrap();
        assert_eq!(output.summary, "tested");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reviewer_and_judge_responses() {
        let worker = shell(
            r#"cat >/dev/null; case "$CONDUCTOR_ROLE" in
              reviewer) echo '{"issues":[{"severity":"CRITICAL","location":"a.rs","description":"boom"}]}';;
              judge) echo 'I vote: {"strategy":"REFACTOR","rationale":"split it"}';;
            esac"#,
        );
        let workers = worker.into_workers(&[ReviewerKind::Security], 1);
        assert_eq!(workers.reviewers[0].name(), "security-sentinel");

        let issues = workers.reviewers[0].review(&unit()).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity(), Severity::Critical);

        let ballot = Ballot {
            task_id: "t1".into(),
            unit: "api".into(),
            requirements: "r".into(),
            approach: "a".into(),
            recurring: issues,
            attempts: vec![],
        };
        let vote = workers.judges[0].vote(&ballot).await.unwrap();
        assert_eq!(vote.strategy, Strategy::Refactor);
        assert_eq!(vote.rationale, "split it");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let worker = shell("cat >/dev/null; echo broken >&2; exit 2");
        let err = worker.run_stage(WorkerRole::Skeleton, &unit()).await.unwrap_err();
        assert!(err.to_string().contains("exited with code 2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_covers_unread_request() {
        let worker = CommandWorker::new(
            CommandWorkerConfig::new("sh")
                .with_args(vec!["-c".into(), "sleep 30".into()])
                .with_timeout(Duration::from_millis(500)),
        );
        let mut big = unit();
        big.requirements = "x".repeat(256 * 1024);

        let start = Instant::now();
        let err = worker.run_stage(WorkerRole::Implementer, &big).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_error() {
        let worker = CommandWorker::new(
            CommandWorkerConfig::new("sh")
                .with_args(vec!["-c".into(), "sleep 5".into()])
                .with_timeout(Duration::from_millis(100)),
        );
        let err = worker.run_stage(WorkerRole::Skeleton, &unit()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
