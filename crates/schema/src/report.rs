//! Per-job status rows and the consolidated batch report.

use chrono::{DateTime, Utc};
use repolens_common::csv::{join_record, split_record};
use repolens_common::{CheckStatus, Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header of the per-job status file.
pub const STATUS_HEADER: [&str; 5] = [
    "repo_name",
    "clone_status",
    "readme_status",
    "dependency_status",
    "tests_status",
];

/// Header of the consolidated report.
pub const CONSOLIDATED_HEADER: [&str; 8] = [
    "Tool",
    "CloneRepository",
    "CheckReadme",
    "CheckDependencies",
    "CheckTests",
    "Almanack",
    "TestExecution",
    "OverallScore",
];

/// Sentinel for an absent numeric value.
pub const NOT_AVAILABLE: &str = "NA";

/// Contents of `status_repo.txt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub repo_name: String,
    pub clone_status: CheckStatus,
    pub readme_status: CheckStatus,
    pub dependency_status: CheckStatus,
    pub tests_status: CheckStatus,
}

impl StatusRow {
    pub fn to_csv(&self) -> String {
        format!(
            "{}\n{}\n",
            STATUS_HEADER.join(","),
            join_record([
                self.repo_name.as_str(),
                self.clone_status.as_str(),
                self.readme_status.as_str(),
                self.dependency_status.as_str(),
                self.tests_status.as_str(),
            ])
        )
    }

    pub fn from_csv(content: &str) -> Result<Self> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| Error::Parse("empty status file".to_string()))?;
        if split_record(header) != STATUS_HEADER {
            return Err(Error::Parse(format!("unexpected status header: {}", header)));
        }
        let record = lines
            .next()
            .ok_or_else(|| Error::Parse("status file has no data row".to_string()))?;
        let fields = split_record(record);
        if fields.len() != STATUS_HEADER.len() {
            return Err(Error::Parse(format!("malformed status row: {}", record)));
        }

        Ok(Self {
            repo_name: fields[0].clone(),
            clone_status: fields[1].parse()?,
            readme_status: fields[2].parse()?,
            dependency_status: fields[3].parse()?,
            tests_status: fields[4].parse()?,
        })
    }
}

/// One row of the consolidated report, keyed by repository name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedReportRow {
    pub tool: String,
    pub clone_repository: CheckStatus,
    pub check_readme: CheckStatus,
    pub check_dependencies: CheckStatus,
    pub check_tests: CheckStatus,
    pub almanack: CheckStatus,
    pub test_execution: CheckStatus,
    pub overall_score: Option<f64>,
}

impl ConsolidatedReportRow {
    pub fn to_csv_record(&self) -> String {
        let score = self
            .overall_score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        join_record([
            self.tool.as_str(),
            self.clone_repository.as_str(),
            self.check_readme.as_str(),
            self.check_dependencies.as_str(),
            self.check_tests.as_str(),
            self.almanack.as_str(),
            self.test_execution.as_str(),
            score.as_str(),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub cloned: usize,
    pub scored: usize,
    pub degraded: usize,
}

/// The batch-level report. Written once, after every job is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub rows: Vec<ConsolidatedReportRow>,
}

impl ConsolidatedReport {
    pub fn new(rows: Vec<ConsolidatedReportRow>) -> Self {
        let summary = ReportSummary {
            total: rows.len(),
            cloned: rows.iter().filter(|r| r.clone_repository.is_pass()).count(),
            scored: rows.iter().filter(|r| r.overall_score.is_some()).count(),
            degraded: rows.iter().filter(|r| r.overall_score.is_none()).count(),
        };

        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            summary,
            rows,
        }
    }

    pub fn to_csv(&self) -> String {
        let mut out = CONSOLIDATED_HEADER.join(",");
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.to_csv_record());
            out.push('\n');
        }
        out
    }
}
