//! Normalized test execution results.

use repolens_common::CheckStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ecosystem detected from marker files in the working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectType {
    #[serde(rename = "python")]
    Python,
    #[serde(rename = "node")]
    Node,
    #[serde(rename = "java-maven")]
    JavaMaven,
    #[serde(rename = "java-gradle")]
    JavaGradle,
    #[serde(rename = "r")]
    R,
    #[serde(rename = "rust")]
    Rust,
    #[serde(rename = "go")]
    Go,
    #[serde(rename = "unknown")]
    Unknown,
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProjectType::Python => "python",
            ProjectType::Node => "node",
            ProjectType::JavaMaven => "java-maven",
            ProjectType::JavaGradle => "java-gradle",
            ProjectType::R => "r",
            ProjectType::Rust => "rust",
            ProjectType::Go => "go",
            ProjectType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Outcome of running a project's native test suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestExecutionResult {
    pub project_type: ProjectType,
    /// Test framework actually invoked (pytest, unittest, npm, cargo, ...).
    pub framework: String,
    pub status: CheckStatus,
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    #[serde(default)]
    pub skipped: u32,
    pub output: String,
    pub error: String,
}

impl TestExecutionResult {
    pub fn new(project_type: ProjectType, framework: impl Into<String>) -> Self {
        Self {
            project_type,
            framework: framework.into(),
            status: CheckStatus::Fail,
            total_tests: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            output: String::new(),
            error: String::new(),
        }
    }

    /// Terminal result for a project whose test setup could not be determined.
    pub fn unknown() -> Self {
        Self {
            status: CheckStatus::Unknown,
            error: "Unsupported project type: unknown".to_string(),
            ..Self::new(ProjectType::Unknown, "unknown")
        }
    }

    /// Whether any evidence of a test suite was found.
    pub fn has_tests(&self) -> bool {
        self.total_tests > 0 || self.passed > 0 || self.failed > 0
    }

    /// Append a line to the error text without discarding earlier diagnostics.
    pub fn push_error(&mut self, message: &str) {
        if !self.error.is_empty() {
            self.error.push('\n');
        }
        self.error.push_str(message);
    }
}
