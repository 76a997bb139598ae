//! Per-job artifact layout under `<output_dir>/<repo_name>/`.

use repolens_common::Result;
use repolens_schema::{StageFailure, StageKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STATUS_FILE: &str = "status_repo.txt";
pub const METRICS_FILE: &str = "metrics_results.json";
pub const TEST_RESULTS_FILE: &str = "test_results.json";
pub const RUBRIC_FILE: &str = "rubric_report.json";
pub const NARRATIVE_JSON_FILE: &str = "narrative.json";
pub const NARRATIVE_HTML_FILE: &str = "narrative.html";
pub const PUBLISH_RECEIPT_FILE: &str = "publish_receipt.json";
pub const AUDIT_FILE: &str = "stage_audit.jsonl";

pub const CONSOLIDATED_CSV_FILE: &str = "consolidated_report.csv";
pub const CONSOLIDATED_JSON_FILE: &str = "consolidated_report.json";

/// Directory under the output root holding working copies. Hidden so it is
/// never mistaken for a job directory.
pub const WORK_DIR: &str = ".work";

/// Name of the file recording a stage's failure payload.
pub fn failure_file(stage: StageKind) -> String {
    format!("{}_failure.json", stage)
}

/// Files written by every job, used to recognize job directories.
pub const JOB_MARKER_FILES: &[&str] = &[STATUS_FILE, AUDIT_FILE];

/// Handle on one job's artifact directory.
#[derive(Debug, Clone)]
pub struct JobArtifacts {
    dir: PathBuf,
}

impl JobArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Start from an empty directory so a re-run never mixes in stale artifacts.
    pub async fn prepare(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.dir).await? {
            tokio::fs::remove_dir_all(&self.dir).await?;
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub async fn write_text(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.path(name);
        tokio::fs::write(&path, content).await?;
        debug!("Wrote {:?}", path);
        Ok(path)
    }

    pub async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let content = serde_json::to_string_pretty(value)?;
        self.write_text(name, &content).await
    }

    pub async fn write_failure(&self, stage: StageKind, failure: &StageFailure) -> Result<PathBuf> {
        self.write_json(&failure_file(stage), failure).await
    }

    /// Read a JSON artifact. `None` if the file does not exist.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Option<Result<T>> {
        let path = self.path(name);
        if !path.is_file() {
            return None;
        }
        Some(
            std::fs::read_to_string(&path)
                .map_err(Into::into)
                .and_then(|content| serde_json::from_str(&content).map_err(Into::into)),
        )
    }

    pub fn read_text(&self, name: &str) -> Option<Result<String>> {
        let path = self.path(name);
        path.is_file().then(|| std::fs::read_to_string(&path).map_err(Into::into))
    }

    /// Whether this directory looks like a job's artifact directory.
    pub fn is_job_dir(&self) -> bool {
        JOB_MARKER_FILES.iter().any(|f| self.path(f).is_file())
    }
}
