//! Per-criterion evaluation.
//!
//! Each function returns the criterion verdict together with the
//! recommendations for its unmet sub-conditions, in a fixed order.

use crate::scoring::{self, keys};
use repolens_common::CheckStatus;
use repolens_schema::{
    CheckBatteryResult, CheckName, CriterionResult, CriterionStatus, MetricsDocument, TestExecutionResult,
};

/// Upstream artifacts available to the rubric. Any of them may be missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inputs<'a> {
    pub metrics: Option<&'a MetricsDocument>,
    pub tests: Option<&'a TestExecutionResult>,
    pub checks: Option<&'a CheckBatteryResult>,
}

impl Inputs<'_> {
    fn flag(&self, key: &str) -> bool {
        self.metrics.and_then(|m| m.flag(key)).unwrap_or(false)
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.metrics.and_then(|m| m.number(key))
    }

    fn check_passed(&self, name: CheckName) -> bool {
        self.checks.is_some_and(|c| c.passed(name))
    }
}

pub type Evaluation = (CriterionResult, Vec<String>);

/// Recognized license identifier reported by the metrics document.
pub fn license_identifier<'a>(inputs: &Inputs<'a>) -> Option<&'a str> {
    let license = inputs.metrics?.text(keys::PRIMARY_LICENSE)?.trim();
    let lowered = license.to_lowercase();
    if scoring::UNRECOGNIZED_LICENSES.contains(&lowered.as_str()) {
        None
    } else {
        Some(license)
    }
}

pub fn license(inputs: &Inputs<'_>) -> Evaluation {
    match license_identifier(inputs) {
        Some(id) => (
            CriterionResult::new(CriterionStatus::Pass, scoring::SCORE_PASS, format!("License detected: {}", id)),
            Vec::new(),
        ),
        None => (
            CriterionResult::new(CriterionStatus::Fail, scoring::SCORE_FAIL, "No recognized license detected"),
            vec!["Add an OSI-approved open source license (e.g. a LICENSE file with MIT, BSD-3-Clause or Apache-2.0).".to_string()],
        ),
    }
}

pub fn documentation(inputs: &Inputs<'_>) -> Evaluation {
    let flags: [(&str, bool, &str); scoring::DOC_FLAG_COUNT] = [
        (
            "README",
            inputs.flag(keys::INCLUDES_README) || inputs.check_passed(CheckName::Readme),
            "Add a README describing the purpose, installation and usage of the software.",
        ),
        (
            "contributing guidelines",
            inputs.flag(keys::INCLUDES_CONTRIBUTING),
            "Add a CONTRIBUTING file explaining how others can contribute.",
        ),
        (
            "license file",
            inputs.flag(keys::INCLUDES_LICENSE),
            "Add a LICENSE file to the repository root.",
        ),
        (
            "API documentation",
            inputs.flag(keys::INCLUDES_COMMON_DOCS),
            "Add API documentation (e.g. a docs/ directory or generated reference).",
        ),
        (
            "examples",
            inputs.flag(keys::INCLUDES_EXAMPLES),
            "Add usage examples or tutorials.",
        ),
        (
            "dependency manifest",
            inputs.check_passed(CheckName::Dependencies),
            "Declare dependencies in a standard manifest (e.g. requirements.txt, package.json, DESCRIPTION).",
        ),
    ];

    let present: Vec<&str> = flags.iter().filter(|(_, ok, _)| *ok).map(|(name, _, _)| *name).collect();
    let missing: Vec<&str> = flags.iter().filter(|(_, ok, _)| !*ok).map(|(name, _, _)| *name).collect();
    let count = present.len();

    let status = if count >= scoring::DOC_GOOD_MIN {
        CriterionStatus::Good
    } else if count >= scoring::DOC_OK_MIN {
        CriterionStatus::Ok
    } else {
        CriterionStatus::Bad
    };

    let mut details = format!("{}/{} documentation items present", count, scoring::DOC_FLAG_COUNT);
    if !missing.is_empty() {
        details.push_str(&format!("; missing: {}", missing.join(", ")));
    }

    let recommendations = flags
        .iter()
        .filter(|(_, ok, _)| !*ok)
        .map(|(_, _, advice)| advice.to_string())
        .collect();

    (
        CriterionResult::new(status, count as f64 / scoring::DOC_FLAG_COUNT as f64, details),
        recommendations,
    )
}

pub fn tests(inputs: &Inputs<'_>) -> Evaluation {
    let status = inputs.tests.map(|t| t.status).unwrap_or(CheckStatus::Unknown);
    let tests_present = inputs.check_passed(CheckName::Tests) || inputs.tests.is_some_and(|t| t.has_tests());
    let ci_ratio = inputs.number(keys::WORKFLOW_SUCCESS_RATIO);
    let ci_ok = ci_ratio.is_some_and(|r| r >= scoring::CI_SUCCESS_MIN);

    let ci_text = match ci_ratio {
        Some(r) => format!("CI success ratio {:.2}", r),
        None => "no CI signal".to_string(),
    };

    let mut recommendations = Vec::new();
    if !tests_present {
        recommendations.push("Add an automated test suite (e.g. a tests/ directory run by the project's test framework).".to_string());
    } else if status == CheckStatus::Fail {
        recommendations.push("Fix the failing tests so the suite passes.".to_string());
    }
    if !ci_ok {
        recommendations.push(format!(
            "Run tests in continuous integration and keep the workflow success ratio at or above {:.0}%.",
            scoring::CI_SUCCESS_MIN * 100.0
        ));
    }

    let result = if status == CheckStatus::Pass && ci_ok {
        CriterionResult::new(
            CriterionStatus::Good,
            scoring::SCORE_GOOD,
            format!("Tests pass; {}", ci_text),
        )
    } else if tests_present {
        CriterionResult::new(
            CriterionStatus::Ok,
            scoring::SCORE_OK,
            format!("Tests present (status {}); {}", status, ci_text),
        )
    } else {
        CriterionResult::new(CriterionStatus::Bad, scoring::SCORE_BAD, "No tests detected")
    };

    (result, recommendations)
}

pub fn community(inputs: &Inputs<'_>) -> Evaluation {
    let contributors = inputs.number(keys::UNIQUE_CONTRIBUTORS);
    let count = contributors.unwrap_or(0.0);

    let (status, score) = if count >= scoring::CONTRIBUTORS_GOOD {
        (CriterionStatus::Good, scoring::SCORE_GOOD)
    } else if count >= scoring::CONTRIBUTORS_OK {
        (CriterionStatus::Ok, scoring::SCORE_OK)
    } else {
        (CriterionStatus::Bad, scoring::SCORE_BAD)
    };

    let details = match contributors {
        Some(n) => format!("{} unique contributors", n),
        None => "Contributor count unavailable".to_string(),
    };

    let recommendations = if status == CriterionStatus::Good {
        Vec::new()
    } else {
        vec![format!(
            "Grow the contributor community (at least {} unique contributors); document how to get involved.",
            scoring::CONTRIBUTORS_GOOD
        )]
    };

    (CriterionResult::new(status, score, details), recommendations)
}
