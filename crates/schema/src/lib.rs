//! Data model for repolens.
//!
//! This crate defines the per-job and per-batch documents that flow between
//! pipeline stages: job identity, stage results, check verdicts, metrics,
//! test results, rubric reports, narrative summaries and the consolidated
//! report.

pub mod audit;
pub mod checks;
pub mod job;
pub mod metrics;
pub mod narrative;
pub mod report;
pub mod rubric;
pub mod schema;
pub mod stage;
pub mod testing;
pub mod validation;

pub use audit::{AuditLog, StageAuditEntry};
pub use checks::{CheckBatteryResult, CheckName, CheckOutcome};
pub use job::{canonical_repo_name, validate_repo_url, JobSpec};
pub use metrics::{MetricValue, MetricsDocument};
pub use narrative::{NarrativeSummary, Readiness};
pub use report::{ConsolidatedReport, ConsolidatedReportRow, ReportSummary, StatusRow};
pub use rubric::{Criterion, CriterionResult, CriterionStatus, RubricReport, RubricSummary};
pub use stage::{FailureKind, StageFailure, StageKind, StageResult};
pub use testing::{ProjectType, TestExecutionResult};
pub use validation::{validate_metrics, validate_narrative};
