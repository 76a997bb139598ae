//! Report Aggregator: joins per-job terminal artifacts into the batch report.
//!
//! The aggregator only ever sees terminal state. It runs once per batch,
//! after every job has been joined, either from in-memory outcomes or from
//! the per-job directories on disk (`repolens report`).

use crate::artifacts::{self, JobArtifacts};
use crate::scheduler::JobOutcome;
use repolens_common::{CheckStatus, Error, Result};
use repolens_schema::{
    ConsolidatedReport, ConsolidatedReportRow, FailureKind, MetricsDocument, RubricReport, StageFailure, StageKind,
    StageResult, StatusRow, TestExecutionResult,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The artifacts of one job the aggregator reads. Absent values stay `None`.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub status: StatusRow,
    pub metrics: Option<StageResult<MetricsDocument>>,
    pub tests: Option<StageResult<TestExecutionResult>>,
    pub rubric: Option<RubricReport>,
}

impl JobRecord {
    pub fn from_outcome(outcome: &JobOutcome) -> Self {
        Self {
            status: outcome.status_row(),
            metrics: outcome.metrics.clone(),
            tests: outcome.tests.clone(),
            rubric: outcome.rubric.as_ref().and_then(StageResult::value).cloned(),
        }
    }

    /// Load a job's record from its artifact directory.
    ///
    /// Unreadable or missing files degrade to absent values; a missing status
    /// file leaves every status column `UNKNOWN`.
    pub fn load(dir: &Path, repo_name: &str) -> Self {
        let artifacts = JobArtifacts::new(dir);

        let status = match artifacts.read_text(artifacts::STATUS_FILE) {
            Some(Ok(content)) => StatusRow::from_csv(&content).unwrap_or_else(|e| {
                warn!("Unreadable status file for {}: {}", repo_name, e);
                unknown_status(repo_name)
            }),
            Some(Err(e)) => {
                warn!("Unreadable status file for {}: {}", repo_name, e);
                unknown_status(repo_name)
            }
            None => unknown_status(repo_name),
        };

        Self {
            status,
            metrics: load_stage(&artifacts, StageKind::Metrics, artifacts::METRICS_FILE),
            tests: load_stage(&artifacts, StageKind::Tests, artifacts::TEST_RESULTS_FILE),
            rubric: artifacts.read_json(artifacts::RUBRIC_FILE).and_then(Result::ok),
        }
    }

    /// Render the consolidated row for this job.
    pub fn to_row(&self) -> ConsolidatedReportRow {
        let cloned = self.status.clone_status.is_pass();
        ConsolidatedReportRow {
            tool: self.status.repo_name.clone(),
            clone_repository: self.status.clone_status,
            check_readme: self.status.readme_status,
            check_dependencies: self.status.dependency_status,
            check_tests: self.status.tests_status,
            almanack: column_status(self.metrics.as_ref(), |_| CheckStatus::Pass),
            test_execution: column_status(self.tests.as_ref(), |t| t.status),
            overall_score: if cloned {
                self.rubric.as_ref().map(RubricReport::overall_score)
            } else {
                None
            },
        }
    }
}

fn unknown_status(repo_name: &str) -> StatusRow {
    StatusRow {
        repo_name: repo_name.to_string(),
        clone_status: CheckStatus::Unknown,
        readme_status: CheckStatus::Unknown,
        dependency_status: CheckStatus::Unknown,
        tests_status: CheckStatus::Unknown,
    }
}

/// A value file means success, a failure file means failure, neither means absent.
fn load_stage<T: serde::de::DeserializeOwned>(
    artifacts: &JobArtifacts,
    stage: StageKind,
    value_file: &str,
) -> Option<StageResult<T>> {
    match artifacts.read_json::<T>(value_file) {
        Some(Ok(value)) => return Some(StageResult::success(value)),
        Some(Err(e)) => {
            return Some(StageResult::failure(
                FailureKind::Parse,
                format!("unreadable {}: {}", value_file, e),
            ))
        }
        None => {}
    }
    match artifacts.read_json::<StageFailure>(&artifacts::failure_file(stage)) {
        Some(Ok(failure)) => Some(StageResult::Failure(failure)),
        Some(Err(e)) => Some(StageResult::failure(FailureKind::Parse, e.to_string())),
        None => None,
    }
}

/// Column value for a stage: the stage's own verdict on success, `FAIL` when
/// the stage itself failed, `UNKNOWN` when it never got to run.
fn column_status<T>(result: Option<&StageResult<T>>, on_success: impl Fn(&T) -> CheckStatus) -> CheckStatus {
    match result {
        Some(StageResult::Success { value }) => on_success(value),
        Some(StageResult::Failure(f)) => match f.kind {
            FailureKind::UpstreamUnavailable | FailureKind::Skipped | FailureKind::Crashed => CheckStatus::Unknown,
            _ => CheckStatus::Fail,
        },
        None => CheckStatus::Unknown,
    }
}

/// Build the report. Rows keep the order of `records`.
pub fn build_report(records: &[JobRecord]) -> ConsolidatedReport {
    ConsolidatedReport::new(records.iter().map(JobRecord::to_row).collect())
}

/// Write `consolidated_report.csv` and `consolidated_report.json`.
pub async fn write_report(output_dir: &Path, report: &ConsolidatedReport) -> Result<(PathBuf, PathBuf)> {
    tokio::fs::create_dir_all(output_dir).await?;

    let csv_path = output_dir.join(artifacts::CONSOLIDATED_CSV_FILE);
    tokio::fs::write(&csv_path, report.to_csv()).await?;

    let json_path = output_dir.join(artifacts::CONSOLIDATED_JSON_FILE);
    tokio::fs::write(&json_path, serde_json::to_string_pretty(report)?).await?;

    info!(
        "Consolidated report: {} rows ({} scored, {} degraded) -> {:?}",
        report.summary.total, report.summary.scored, report.summary.degraded, csv_path
    );
    Ok((csv_path, json_path))
}

/// Load every job directory under `output_dir`, sorted by repo name.
pub fn load_records(output_dir: &Path) -> Result<Vec<JobRecord>> {
    if !output_dir.is_dir() {
        return Err(Error::Config(format!(
            "output directory {:?} does not exist",
            output_dir
        )));
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(output_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.file_type()?.is_dir() {
            continue;
        }
        if !JobArtifacts::new(entry.path()).is_job_dir() {
            debug!("Skipping {:?}: not a job directory", entry.path());
            continue;
        }
        names.push(name);
    }
    names.sort();

    Ok(names
        .iter()
        .map(|name| JobRecord::load(&output_dir.join(name), name))
        .collect())
}

/// Rebuild and rewrite the consolidated report from artifacts on disk.
pub async fn rebuild_report(output_dir: &Path) -> Result<ConsolidatedReport> {
    let records = load_records(output_dir)?;
    let report = build_report(&records);
    write_report(output_dir, &report).await?;
    Ok(report)
}
