//! Check battery results.

use repolens_common::CheckStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The fixed set of file-presence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    Readme,
    Dependencies,
    Tests,
}

impl CheckName {
    pub const ALL: [CheckName; 3] = [CheckName::Readme, CheckName::Dependencies, CheckName::Tests];
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckName::Readme => "readme",
            CheckName::Dependencies => "dependencies",
            CheckName::Tests => "tests",
        };
        f.write_str(name)
    }
}

/// Verdict of one check plus the candidate that satisfied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    /// First matching candidate, relative to the working copy root.
    pub matched: Option<String>,
}

impl CheckOutcome {
    pub fn pass(matched: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Pass,
            matched: Some(matched.into()),
        }
    }

    pub fn fail() -> Self {
        Self {
            status: CheckStatus::Fail,
            matched: None,
        }
    }
}

/// Mapping from check name to verdict. Keys are ordered, so the value is
/// independent of the order in which checks were evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckBatteryResult {
    checks: BTreeMap<CheckName, CheckOutcome>,
}

impl CheckBatteryResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: CheckName, outcome: CheckOutcome) {
        self.checks.insert(name, outcome);
    }

    pub fn get(&self, name: CheckName) -> Option<&CheckOutcome> {
        self.checks.get(&name)
    }

    /// Status for a check; `Unknown` when it was never evaluated.
    pub fn status(&self, name: CheckName) -> CheckStatus {
        self.checks
            .get(&name)
            .map(|o| o.status)
            .unwrap_or(CheckStatus::Unknown)
    }

    pub fn passed(&self, name: CheckName) -> bool {
        self.status(name).is_pass()
    }
}
