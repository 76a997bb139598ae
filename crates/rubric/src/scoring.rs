//! Fixed rubric weights and thresholds.
//!
//! These values have no empirical derivation; they are kept here so a
//! calibration pass can change them without touching evaluation logic.

/// Score for a criterion in the "good" bucket.
pub const SCORE_GOOD: f64 = 1.0;
/// Score for a criterion in the "ok" bucket.
pub const SCORE_OK: f64 = 0.7;
/// Score for a criterion in the "bad" bucket.
pub const SCORE_BAD: f64 = 0.3;

pub const SCORE_PASS: f64 = 1.0;
pub const SCORE_FAIL: f64 = 0.0;

/// Documentation flags needed for "good" (out of [`DOC_FLAG_COUNT`]).
pub const DOC_GOOD_MIN: usize = 5;
/// Documentation flags needed for "ok".
pub const DOC_OK_MIN: usize = 3;
pub const DOC_FLAG_COUNT: usize = 6;

/// Minimum CI workflow success ratio for the "good" tests bucket.
pub const CI_SUCCESS_MIN: f64 = 0.9;

/// Unique contributors for the "good" community bucket.
pub const CONTRIBUTORS_GOOD: f64 = 5.0;
/// Unique contributors for the "ok" community bucket.
pub const CONTRIBUTORS_OK: f64 = 2.0;

/// Metric keys read from the metrics document.
pub mod keys {
    pub const PRIMARY_LICENSE: &str = "repo-primary-license";
    pub const INCLUDES_README: &str = "repo-includes-readme";
    pub const INCLUDES_CONTRIBUTING: &str = "repo-includes-contributing";
    pub const INCLUDES_LICENSE: &str = "repo-includes-license";
    pub const INCLUDES_COMMON_DOCS: &str = "repo-includes-common-docs";
    pub const INCLUDES_EXAMPLES: &str = "repo-includes-examples";
    pub const WORKFLOW_SUCCESS_RATIO: &str = "repo-gh-workflow-success-ratio";
    pub const UNIQUE_CONTRIBUTORS: &str = "repo-unique-contributors";
}

/// License values that do not identify an actual license.
pub const UNRECOGNIZED_LICENSES: &[&str] = &["", "none", "null", "noassertion", "other", "unknown", "nan"];
