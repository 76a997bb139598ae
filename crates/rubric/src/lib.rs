//! RepoLens rubric evaluator.
//!
//! A pure function from the upstream stage artifacts of one job to a scored
//! [`RubricReport`]. Missing inputs degrade scores; evaluation never fails.

pub mod criteria;
pub mod scoring;

pub use criteria::Inputs;

use repolens_schema::{CheckBatteryResult, Criterion, MetricsDocument, RubricReport, TestExecutionResult};
use tracing::debug;

/// Evaluate the rubric for one repository.
pub fn evaluate(
    metrics: Option<&MetricsDocument>,
    tests: Option<&TestExecutionResult>,
    checks: Option<&CheckBatteryResult>,
) -> RubricReport {
    evaluate_inputs(&Inputs { metrics, tests, checks })
}

pub fn evaluate_inputs(inputs: &Inputs<'_>) -> RubricReport {
    let mut report = RubricReport::new();

    // Criteria are evaluated in recommendation order
    for criterion in Criterion::ALL {
        let (result, recommendations) = match criterion {
            Criterion::License => criteria::license(inputs),
            Criterion::Documentation => criteria::documentation(inputs),
            Criterion::Tests => criteria::tests(inputs),
            Criterion::Community => criteria::community(inputs),
        };
        debug!("Criterion {}: {:?} ({:.2})", criterion, result.status, result.score);
        report.set_criterion(criterion, result);
        for recommendation in recommendations {
            report.push_recommendation(recommendation);
        }
    }

    report
}
