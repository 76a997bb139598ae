//! Test runner: detects a project's ecosystem and runs its native test suite.

use crate::checkout::WorkingCopy;
use crate::executor::{CommandOutput, CommandSpec, Executor};
use crate::parsers::{self, TestCounts};
use repolens_schema::{FailureKind, ProjectType, StageResult, TestExecutionResult};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Marker files per ecosystem, evaluated first-match-wins.
pub const DETECTION_RULES: &[(&[&str], ProjectType)] = &[
    (&["requirements.txt", "setup.py", "pyproject.toml"], ProjectType::Python),
    (&["package.json"], ProjectType::Node),
    (&["pom.xml"], ProjectType::JavaMaven),
    (&["build.gradle", "build.gradle.kts"], ProjectType::JavaGradle),
    (&["DESCRIPTION"], ProjectType::R),
    (&["Cargo.toml"], ProjectType::Rust),
    (&["go.mod"], ProjectType::Go),
];

/// Markers that select pytest over unittest.
const PYTEST_MARKERS: &[&str] = &["pytest.ini", "conftest.py", "tests"];

/// Detect the project type of a checkout.
pub fn detect_project_type(root: &Path) -> ProjectType {
    DETECTION_RULES
        .iter()
        .find(|(markers, _)| markers.iter().any(|m| root.join(m).is_file()))
        .map(|(_, project_type)| *project_type)
        .unwrap_or(ProjectType::Unknown)
}

/// Commands for one ecosystem: best-effort setup, then the test command.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub framework: &'static str,
    pub setup: Vec<CommandSpec>,
    pub test: CommandSpec,
    parser: fn(&str) -> TestCounts,
}

impl RunPlan {
    fn new(framework: &'static str, test: CommandSpec, parser: fn(&str) -> TestCounts) -> Self {
        Self {
            framework,
            setup: Vec::new(),
            test,
            parser,
        }
    }

    fn with_setup(mut self, command: CommandSpec) -> Self {
        self.setup.push(command);
        self
    }
}

/// Runs test suites under a per-command timeout.
#[derive(Debug, Clone)]
pub struct TestRunner {
    timeout: Duration,
}

impl TestRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(&self, program: &str, root: &Path) -> CommandSpec {
        CommandSpec::new(program).current_dir(root).timeout(self.timeout)
    }

    /// Build the run plan for a detected project type.
    pub fn plan(&self, project_type: ProjectType, root: &Path) -> Option<RunPlan> {
        let plan = match project_type {
            ProjectType::Python => {
                let uses_pytest = PYTEST_MARKERS.iter().any(|m| root.join(m).exists());
                let mut plan = if uses_pytest {
                    RunPlan::new(
                        "pytest",
                        self.command("python3", root).args(["-m", "pytest", "-v"]),
                        parsers::parse_pytest,
                    )
                } else {
                    RunPlan::new(
                        "unittest",
                        self.command("python3", root).args(["-m", "unittest", "discover", "-v"]),
                        parsers::parse_unittest,
                    )
                };
                if root.join("requirements.txt").is_file() {
                    plan = plan.with_setup(
                        self.command("python3", root)
                            .args(["-m", "pip", "install", "-r", "requirements.txt"]),
                    );
                }
                if root.join("setup.py").is_file() || root.join("pyproject.toml").is_file() {
                    plan = plan.with_setup(self.command("python3", root).args(["-m", "pip", "install", "-e", "."]));
                }
                plan
            }
            ProjectType::Node => RunPlan::new("npm", self.command("npm", root).arg("test"), parsers::parse_npm)
                .with_setup(self.command("npm", root).arg("install")),
            ProjectType::JavaMaven => RunPlan::new(
                "maven",
                self.command("mvn", root).args(["-B", "test"]),
                parsers::parse_maven,
            ),
            ProjectType::JavaGradle => {
                let program = if root.join("gradlew").is_file() { "./gradlew" } else { "gradle" };
                RunPlan::new(
                    "gradle",
                    self.command(program, root).args(["test", "--console=plain"]),
                    parsers::parse_gradle,
                )
            }
            ProjectType::R => RunPlan::new(
                "testthat",
                self.command("Rscript", root).args(["-e", "testthat::test_local()"]),
                parsers::parse_testthat,
            ),
            ProjectType::Rust => RunPlan::new("cargo", self.command("cargo", root).arg("test"), parsers::parse_cargo),
            ProjectType::Go => RunPlan::new(
                "go",
                self.command("go", root).args(["test", "./...", "-v"]),
                parsers::parse_go,
            ),
            ProjectType::Unknown => return None,
        };
        Some(plan)
    }

    /// Detect, install, run and parse. An undetectable project is a
    /// successful result with status UNKNOWN.
    pub async fn run(&self, executor: &dyn Executor, copy: &WorkingCopy) -> StageResult<TestExecutionResult> {
        if !copy.path.is_dir() {
            return StageResult::failure(
                FailureKind::UpstreamUnavailable,
                format!("working copy {} is missing", copy.path.display()),
            );
        }

        let project_type = detect_project_type(&copy.path);
        debug!("Detected project type {} for {}", project_type, copy.repo_name);

        let Some(plan) = self.plan(project_type, &copy.path) else {
            info!("No test runner for {}", copy.repo_name);
            return StageResult::success(TestExecutionResult::unknown());
        };

        let mut result = TestExecutionResult::new(project_type, plan.framework);

        for step in &plan.setup {
            match executor.execute(step).await {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    warn!("Dependency install failed for {}: {}", copy.repo_name, step.display());
                    result.push_error(&format!(
                        "Failed to install dependencies ({}): {}",
                        step.display(),
                        output.stderr.trim()
                    ));
                }
                Err(e) => {
                    warn!("Dependency install could not run for {}: {}", copy.repo_name, e);
                    result.push_error(&format!("Failed to install dependencies: {}", e));
                }
            }
        }

        let output = match executor.execute(&plan.test).await {
            Ok(output) => output,
            Err(e) => return StageResult::from(Err::<TestExecutionResult, _>(e)),
        };

        apply_output(&mut result, &output, plan.parser);
        info!(
            "Tests for {} ({}): {} total, {} passed, {} failed -> {}",
            copy.repo_name, result.framework, result.total_tests, result.passed, result.failed, result.status
        );
        StageResult::success(result)
    }
}

fn apply_output(result: &mut TestExecutionResult, output: &CommandOutput, parser: fn(&str) -> TestCounts) {
    // Some runners report to stderr; fall back to it when stdout has no counts.
    let counts = parsers::or_else(parser(&output.stdout), || parser(&output.stderr));

    result.total_tests = counts.total;
    result.passed = counts.passed;
    result.failed = counts.failed;
    result.skipped = counts.skipped;
    result.status = parsers::status_for(&counts, output.exit_code);
    result.output = output.stdout.clone();
    if !output.stderr.trim().is_empty() {
        result.push_error(output.stderr.trim());
    }
}
