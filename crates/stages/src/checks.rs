//! Check battery: file-presence checks over a working copy.

use crate::checkout::WorkingCopy;
use repolens_schema::{CheckBatteryResult, CheckName, CheckOutcome, FailureKind, StageResult};
use std::path::Path;
use tracing::{debug, info};

/// README candidates, in priority order.
pub const README_CANDIDATES: &[&str] = &["README.md", "README.rst", "README.txt", "README"];

/// Dependency manifests across supported ecosystems.
pub const DEPENDENCY_CANDIDATES: &[&str] = &[
    "requirements.txt",
    "setup.py",
    "pyproject.toml",
    "Pipfile",
    "environment.yml",
    "package.json",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "DESCRIPTION",
    "Cargo.toml",
    "go.mod",
    "Gemfile",
    "composer.json",
    "Project.toml",
];

/// Directories that conventionally hold a test suite.
pub const TEST_DIR_CANDIDATES: &[&str] = &["tests", "test"];

/// Suffixes of top-level test files.
pub const TEST_FILE_SUFFIXES: &[&str] = &[".test.js", ".test.py", ".test.java"];

/// First README candidate present as a file.
pub fn find_readme(root: &Path) -> Option<String> {
    first_file(root, README_CANDIDATES)
}

/// First dependency manifest present as a file.
pub fn find_dependency_manifest(root: &Path) -> Option<String> {
    first_file(root, DEPENDENCY_CANDIDATES)
}

/// A test directory, or failing that the first top-level `*.test.*` file by name.
pub fn find_tests(root: &Path) -> Option<String> {
    if let Some(dir) = TEST_DIR_CANDIDATES.iter().find(|d| root.join(d).is_dir()) {
        return Some(format!("{}/", dir));
    }

    let mut names: Vec<String> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| TEST_FILE_SUFFIXES.iter().any(|s| name.ends_with(s)))
        .collect();
    names.sort();
    names.into_iter().next()
}

fn first_file(root: &Path, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|c| root.join(c).is_file())
        .map(|c| c.to_string())
}

fn run_check(root: &Path, name: CheckName) -> CheckOutcome {
    let found = match name {
        CheckName::Readme => find_readme(root),
        CheckName::Dependencies => find_dependency_manifest(root),
        CheckName::Tests => find_tests(root),
    };
    debug!("Check {} -> {:?}", name, found);
    found.map(CheckOutcome::pass).unwrap_or_else(CheckOutcome::fail)
}

/// Evaluate the given checks against `root`. The result does not depend on `order`.
pub fn evaluate(root: &Path, order: &[CheckName]) -> CheckBatteryResult {
    let mut result = CheckBatteryResult::new();
    for name in order {
        result.insert(*name, run_check(root, *name));
    }
    result
}

/// Run the full battery against a working copy.
pub async fn run(copy: &WorkingCopy) -> StageResult<CheckBatteryResult> {
    if !copy.path.is_dir() {
        return StageResult::failure(
            FailureKind::UpstreamUnavailable,
            format!("working copy {} is missing", copy.path.display()),
        );
    }

    let root = copy.path.clone();
    match tokio::task::spawn_blocking(move || evaluate(&root, &CheckName::ALL)).await {
        Ok(result) => {
            info!(
                "Check battery for {}: readme={} dependencies={} tests={}",
                copy.repo_name,
                result.status(CheckName::Readme),
                result.status(CheckName::Dependencies),
                result.status(CheckName::Tests)
            );
            StageResult::success(result)
        }
        Err(e) => StageResult::failure(FailureKind::Crashed, format!("check battery task failed: {}", e)),
    }
}
