//! Metrics analyzer: runs the external metrics tool against a working copy.

use crate::checkout::WorkingCopy;
use crate::executor::{CommandSpec, Executor};
use repolens_common::hash::short_key;
use repolens_schema::{validate_metrics, FailureKind, MetricsDocument, StageResult};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Default analyzer invocation. `{repo}` is replaced by the checkout path.
pub const DEFAULT_METRICS_COMMAND: &str = "almanack table {repo}";

const REPO_PLACEHOLDER: &str = "{repo}";

/// Produces a [`MetricsDocument`] for one working copy.
#[derive(Debug, Clone)]
pub struct MetricsAnalyzer {
    command_template: String,
    timeout: Duration,
    /// When set, the analyzer runs against a private copy under this root.
    scratch_root: Option<PathBuf>,
}

impl MetricsAnalyzer {
    pub fn new(command_template: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command_template: command_template.into(),
            timeout,
            scratch_root: None,
        }
    }

    pub fn with_scratch_root(mut self, scratch_root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(scratch_root.into());
        self
    }

    fn command_for(&self, repo_path: &Path) -> Option<CommandSpec> {
        let repo = repo_path.to_string_lossy();
        let mut parts = self
            .command_template
            .split_whitespace()
            .map(|p| p.replace(REPO_PLACEHOLDER, &repo));
        let program = parts.next()?;
        Some(CommandSpec::new(program).args(parts).timeout(self.timeout))
    }

    /// Run the analyzer. Failures carry the raw tool output for diagnostics.
    pub async fn analyze(&self, executor: &dyn Executor, copy: &WorkingCopy) -> StageResult<MetricsDocument> {
        if !copy.path.is_dir() {
            return StageResult::failure(
                FailureKind::UpstreamUnavailable,
                format!("working copy {} is missing", copy.path.display()),
            );
        }

        let staged = match &self.scratch_root {
            Some(root) => {
                let dest = scratch_path(root, copy);
                let source = copy.path.clone();
                let target = dest.clone();
                match tokio::task::spawn_blocking(move || stage_copy(&source, &target)).await {
                    Ok(Ok(())) => Some(dest),
                    Ok(Err(e)) => {
                        discard_scratch(&dest).await;
                        return StageResult::failure(FailureKind::Tool, format!("failed to stage scratch copy: {}", e));
                    }
                    Err(e) => {
                        discard_scratch(&dest).await;
                        return StageResult::failure(FailureKind::Crashed, e.to_string());
                    }
                }
            }
            None => None,
        };

        let target = staged.as_deref().unwrap_or(&copy.path);
        let result = self.run_tool(executor, target).await;

        if let Some(dir) = staged {
            discard_scratch(&dir).await;
        }

        if let Some(doc) = result.value() {
            info!("Metrics for {}: {} values", copy.repo_name, doc.len());
        }
        result
    }

    async fn run_tool(&self, executor: &dyn Executor, repo_path: &Path) -> StageResult<MetricsDocument> {
        let Some(command) = self.command_for(repo_path) else {
            return StageResult::failure(FailureKind::Validation, "metrics command is empty");
        };

        let output = match executor.execute(&command).await {
            Ok(output) => output,
            Err(e) => return StageResult::from(Err::<MetricsDocument, _>(e)),
        };

        if !output.success() {
            return StageResult::failure_with_raw(
                FailureKind::Tool,
                format!("{} exited with {:?}", command.program, output.exit_code),
                output.stderr,
            );
        }

        parse_metrics_output(&output.stdout)
    }
}

async fn discard_scratch(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove scratch copy {:?}: {}", dir, e),
    }
}

/// Private per-job location inside the shared scratch root.
pub fn scratch_path(scratch_root: &Path, copy: &WorkingCopy) -> PathBuf {
    let key = short_key(&copy.path.to_string_lossy());
    scratch_root.join(format!("{}-{}", copy.repo_name, key))
}

fn stage_copy(source: &Path, dest: &Path) -> std::io::Result<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    debug!("Staged {:?} -> {:?}", source, dest);
    Ok(())
}

/// Locate the JSON payload in analyzer stdout, skipping any log preamble.
fn extract_json(stdout: &str) -> Option<Value> {
    let trimmed = stdout.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    trimmed
        .match_indices(|c: char| c == '[' || c == '{')
        .find_map(|(idx, _)| serde_json::from_str(&trimmed[idx..]).ok())
}

/// Parse and validate analyzer stdout.
pub fn parse_metrics_output(stdout: &str) -> StageResult<MetricsDocument> {
    let Some(value) = extract_json(stdout) else {
        return StageResult::failure_with_raw(FailureKind::Parse, "analyzer output is not JSON", stdout);
    };

    match validate_metrics(&value) {
        Ok(validation) if validation.valid => {}
        Ok(validation) => {
            return StageResult::failure_with_raw(FailureKind::Parse, validation.error_summary(), stdout)
        }
        Err(e) => return StageResult::failure_with_raw(FailureKind::Parse, e.to_string(), stdout),
    }

    match MetricsDocument::from_json(&value) {
        Ok(doc) => StageResult::success(doc),
        Err(e) => StageResult::failure_with_raw(FailureKind::Parse, e.to_string(), stdout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeAnalyzer {
        exit_code: i32,
        stdout: &'static str,
        seen: Mutex<Vec<CommandSpec>>,
    }

    #[async_trait]
    impl Executor for FakeAnalyzer {
        async fn execute(&self, command: &CommandSpec) -> repolens_common::Result<CommandOutput> {
            self.seen.lock().unwrap().push(command.clone());
            Ok(CommandOutput {
                exit_code: Some(self.exit_code),
                stdout: self.stdout.to_string(),
                stderr: "traceback".to_string(),
            })
        }
    }

    fn fake(exit_code: i32, stdout: &'static str) -> FakeAnalyzer {
        FakeAnalyzer {
            exit_code,
            stdout,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn copy_in(dir: &Path) -> WorkingCopy {
        let path = dir.join("POT");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("README.md"), "# POT").unwrap();
        WorkingCopy {
            repo_name: "POT".into(),
            path,
        }
    }

    #[test]
    fn test_parse_with_log_preamble() {
        let stdout = "INFO computing metrics\n[{\"name\": \"repo-includes-readme\", \"result\": true}]";
        let doc = parse_metrics_output(stdout).into_value().unwrap();
        assert_eq!(doc.flag("repo-includes-readme"), Some(true));
    }

    #[test]
    fn test_parse_garbage_keeps_raw() {
        let result = parse_metrics_output("Segmentation fault");
        let failure = result.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::Parse);
        assert_eq!(failure.raw.as_deref(), Some("Segmentation fault"));
    }

    #[tokio::test]
    async fn test_substitutes_repo_path() {
        let dir = tempfile::tempdir().unwrap();
        let copy = copy_in(dir.path());
        let executor = fake(0, "{\"repo-unique-contributors\": 4}");
        let analyzer = MetricsAnalyzer::new(DEFAULT_METRICS_COMMAND, Duration::from_secs(5));

        let doc = analyzer.analyze(&executor, &copy).await.into_value().unwrap();
        assert_eq!(doc.number("repo-unique-contributors"), Some(4.0));

        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen[0].program, "almanack");
        assert_eq!(seen[0].args, vec!["table".to_string(), copy.path.to_string_lossy().to_string()]);
    }

    #[tokio::test]
    async fn test_scratch_copy_is_private_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let copy = copy_in(dir.path());
        let executor = fake(0, "{}");
        let analyzer = MetricsAnalyzer::new("almanack table {repo}", Duration::from_secs(5)).with_scratch_root(&scratch);

        analyzer.analyze(&executor, &copy).await.into_value().unwrap();

        let expected = scratch_path(&scratch, &copy);
        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen[0].args[1], expected.to_string_lossy());
        assert!(!expected.exists());
        assert!(copy.path.join("README.md").exists());
    }

    #[tokio::test]
    async fn test_failed_scratch_copy_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let copy = copy_in(dir.path());
        // Fits under the working copy but not under the deeply nested scratch root.
        std::fs::write(copy.path.join("n".repeat(250)), "x").unwrap();

        let mut scratch = dir.path().join("scratch");
        while scratch.as_os_str().len() < 3800 {
            scratch.push("d".repeat(200));
        }
        std::fs::create_dir_all(&scratch).unwrap();
        let executor = fake(0, "{}");
        let analyzer = MetricsAnalyzer::new("almanack table {repo}", Duration::from_secs(5)).with_scratch_root(&scratch);

        let result = analyzer.analyze(&executor, &copy).await;
        let failure = result.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::Tool);
        assert!(failure.message.contains("failed to stage scratch copy"));
        assert!(!scratch_path(&scratch, &copy).exists());
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
        assert!(executor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let copy = copy_in(dir.path());
        let analyzer = MetricsAnalyzer::new(DEFAULT_METRICS_COMMAND, Duration::from_secs(5));

        let result = analyzer.analyze(&fake(1, ""), &copy).await;
        let failure = result.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::Tool);
        assert_eq!(failure.raw.as_deref(), Some("traceback"));
    }
}
