//! Natural-language interpretation of a rubric report.

use serde::{Deserialize, Serialize};

/// Publication readiness verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    #[serde(rename = "Ready")]
    Ready,
    #[serde(rename = "Needs Work")]
    NeedsWork,
    #[serde(rename = "Not Ready")]
    NotReady,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeSummary {
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    /// Highest priority first.
    pub recommendations: Vec<String>,
    pub readiness: Readiness,
}
