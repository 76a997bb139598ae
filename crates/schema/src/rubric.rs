//! Rubric report types.
//!
//! The overall score and summary counts are always derived from the criteria
//! map; they are emitted on serialization and ignored on deserialization.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Rubric criteria, in recommendation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    License,
    Documentation,
    Tests,
    Community,
}

impl Criterion {
    pub const ALL: [Criterion; 4] = [
        Criterion::License,
        Criterion::Documentation,
        Criterion::Tests,
        Criterion::Community,
    ];
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Criterion::License => "license",
            Criterion::Documentation => "documentation",
            Criterion::Tests => "tests",
            Criterion::Community => "community",
        };
        f.write_str(name)
    }
}

/// Per-criterion verdict. Bucketed criteria use good/ok/bad, binary ones pass/fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriterionStatus {
    Good,
    Ok,
    Bad,
    Pass,
    Fail,
}

/// How a status counts toward the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standing {
    Met,
    PartiallyMet,
    Failed,
}

impl CriterionStatus {
    pub fn standing(&self) -> Standing {
        match self {
            CriterionStatus::Good | CriterionStatus::Pass => Standing::Met,
            CriterionStatus::Ok => Standing::PartiallyMet,
            CriterionStatus::Bad | CriterionStatus::Fail => Standing::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub status: CriterionStatus,
    /// Numeric score in [0, 1].
    pub score: f64,
    pub details: String,
}

impl CriterionResult {
    pub fn new(status: CriterionStatus, score: f64, details: impl Into<String>) -> Self {
        Self {
            status,
            score: score.clamp(0.0, 1.0),
            details: details.into(),
        }
    }
}

/// Counts of criteria by standing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricSummary {
    pub total_criteria: usize,
    pub met_criteria: usize,
    pub partially_met_criteria: usize,
    pub failed_criteria: usize,
}

/// Scored rubric for one repository.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RubricReport {
    criteria: BTreeMap<Criterion, CriterionResult>,
    #[serde(default)]
    recommendations: Vec<String>,
}

impl RubricReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a criterion; derived values follow automatically.
    pub fn set_criterion(&mut self, criterion: Criterion, result: CriterionResult) {
        self.criteria.insert(criterion, result);
    }

    pub fn criterion(&self, criterion: Criterion) -> Option<&CriterionResult> {
        self.criteria.get(&criterion)
    }

    pub fn criteria(&self) -> &BTreeMap<Criterion, CriterionResult> {
        &self.criteria
    }

    /// Arithmetic mean of the per-criterion scores; 0.0 when empty.
    pub fn overall_score(&self) -> f64 {
        if self.criteria.is_empty() {
            return 0.0;
        }
        self.criteria.values().map(|c| c.score).sum::<f64>() / self.criteria.len() as f64
    }

    pub fn summary(&self) -> RubricSummary {
        let mut summary = RubricSummary {
            total_criteria: self.criteria.len(),
            ..Default::default()
        };
        for result in self.criteria.values() {
            match result.status.standing() {
                Standing::Met => summary.met_criteria += 1,
                Standing::PartiallyMet => summary.partially_met_criteria += 1,
                Standing::Failed => summary.failed_criteria += 1,
            }
        }
        summary
    }

    pub fn push_recommendation(&mut self, recommendation: impl Into<String>) {
        self.recommendations.push(recommendation.into());
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }
}

impl Serialize for RubricReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RubricReport", 4)?;
        state.serialize_field("criteria", &self.criteria)?;
        state.serialize_field("overall_score", &self.overall_score())?;
        state.serialize_field("summary", &self.summary())?;
        state.serialize_field("recommendations", &self.recommendations)?;
        state.end()
    }
}
