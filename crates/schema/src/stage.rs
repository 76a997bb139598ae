//! Stage identities and the per-stage result envelope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One unit of work in a job's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Checkout,
    CheckBattery,
    Metrics,
    Tests,
    Rubric,
    Narrative,
    Publish,
}

impl StageKind {
    pub const ALL: [StageKind; 7] = [
        StageKind::Checkout,
        StageKind::CheckBattery,
        StageKind::Metrics,
        StageKind::Tests,
        StageKind::Rubric,
        StageKind::Narrative,
        StageKind::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Checkout => "checkout",
            StageKind::CheckBattery => "check_battery",
            StageKind::Metrics => "metrics",
            StageKind::Tests => "tests",
            StageKind::Rubric => "rubric",
            StageKind::Narrative => "narrative",
            StageKind::Publish => "publish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a tolerated stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Input rejected before any I/O (e.g. malformed URL).
    Validation,
    /// External tool exited non-zero or could not be spawned.
    Tool,
    /// Remote service unreachable or returned an error status.
    Network,
    /// Wall-clock bound exceeded.
    Timeout,
    /// Output could not be parsed into the expected shape.
    Parse,
    /// A required upstream stage did not produce a value.
    UpstreamUnavailable,
    /// Stage not run because its launch condition was not met.
    Skipped,
    /// Stage task panicked or was aborted.
    Crashed,
}

/// Failure payload: always data, never a control signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Raw unparsed payload kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// Terminal result of one stage for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageResult<T> {
    Success { value: T },
    Failure(StageFailure),
}

impl<T> StageResult<T> {
    pub fn success(value: T) -> Self {
        StageResult::Success { value }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        StageResult::Failure(StageFailure {
            kind,
            message: message.into(),
            raw: None,
        })
    }

    /// Failure carrying the raw payload that could not be handled.
    pub fn failure_with_raw(kind: FailureKind, message: impl Into<String>, raw: impl Into<String>) -> Self {
        StageResult::Failure(StageFailure {
            kind,
            message: message.into(),
            raw: Some(raw.into()),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            StageResult::Success { value } => Some(value),
            StageResult::Failure(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            StageResult::Success { value } => Some(value),
            StageResult::Failure(_) => None,
        }
    }

    pub fn failure_info(&self) -> Option<&StageFailure> {
        match self {
            StageResult::Success { .. } => None,
            StageResult::Failure(f) => Some(f),
        }
    }
}

impl<T> From<repolens_common::Result<T>> for StageResult<T> {
    fn from(result: repolens_common::Result<T>) -> Self {
        use repolens_common::Error;

        match result {
            Ok(value) => StageResult::success(value),
            Err(e) => {
                let kind = match &e {
                    Error::InvalidRepoUrl { .. } | Error::Config(_) => FailureKind::Validation,
                    Error::CommandTimeout { .. } => FailureKind::Timeout,
                    Error::Http(_) => FailureKind::Network,
                    Error::Json(_) | Error::Parse(_) | Error::SchemaValidation(_) => FailureKind::Parse,
                    Error::Io(_) | Error::CommandExecution { .. } | Error::Other(_) => FailureKind::Tool,
                };
                StageResult::failure(kind, e.to_string())
            }
        }
    }
}
