//! Parsers for test runner outputs.
//!
//! Each parser extracts counts from a framework's console output. The
//! final status is decided separately by [`status_for`], which falls back
//! to the exit code when no counts could be found.

use regex::Regex;
use repolens_common::CheckStatus;
use std::sync::LazyLock;

/// Counts extracted from a test run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl TestCounts {
    fn from_parts(passed: u32, failed: u32, skipped: u32) -> Self {
        Self {
            total: passed.saturating_add(failed).saturating_add(skipped),
            passed,
            failed,
            skipped,
        }
    }

    fn seen(&self) -> u32 {
        self.passed.saturating_add(self.failed).saturating_add(self.skipped)
    }

    fn is_empty(&self) -> bool {
        self.total == 0 && self.passed == 0 && self.failed == 0
    }
}

/// Final status rule shared by every runner.
pub fn status_for(counts: &TestCounts, exit_code: Option<i32>) -> CheckStatus {
    if counts.failed > 0 {
        CheckStatus::Fail
    } else if counts.total > 0 {
        CheckStatus::Pass
    } else {
        CheckStatus::from_bool(exit_code == Some(0))
    }
}

fn num(caps: &regex::Captures<'_>, group: usize) -> u32 {
    caps.get(group)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// pytest final summary, e.g. `==== 2 failed, 10 passed, 1 skipped in 0.52s ====`.
static PYTEST_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^=+ (.*\d+ (?:passed|failed|skipped|errors?|xfailed|xpassed).*) in [\d.]+s").unwrap());

static PYTEST_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) (passed|failed|skipped|errors?|xfailed|xpassed|deselected)").unwrap());

static PYTEST_COLLECTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"collected (\d+) items?").unwrap());

/// Parse pytest `-v` output.
pub fn parse_pytest(output: &str) -> TestCounts {
    let collected = PYTEST_COLLECTED
        .captures(output)
        .map(|c| num(&c, 1))
        .unwrap_or(0);

    if let Some(summary) = PYTEST_SUMMARY.captures_iter(output).last() {
        let (mut passed, mut failed, mut skipped) = (0u32, 0u32, 0u32);
        for caps in PYTEST_COUNT.captures_iter(&summary[1]) {
            let n = num(&caps, 1);
            match &caps[2] {
                "passed" | "xpassed" => passed = passed.saturating_add(n),
                "failed" | "error" | "errors" => failed = failed.saturating_add(n),
                "skipped" | "xfailed" => skipped = skipped.saturating_add(n),
                _ => {}
            }
        }
        let mut counts = TestCounts::from_parts(passed, failed, skipped);
        counts.total = counts.total.max(collected);
        return counts;
    }

    // Interrupted runs may lack a summary line; count per-test verdicts.
    let mut counts = TestCounts::default();
    for line in output.lines() {
        if line.contains(" PASSED") || line.contains(" XPASS") {
            counts.passed = counts.passed.saturating_add(1);
        } else if line.contains(" FAILED") || line.contains(" ERROR") {
            counts.failed = counts.failed.saturating_add(1);
        } else if line.contains(" SKIPPED") || line.contains(" XFAIL") {
            counts.skipped = counts.skipped.saturating_add(1);
        }
    }
    counts.total = counts.seen().max(collected);
    counts
}

static UNITTEST_RAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Ran (\d+) tests? in").unwrap());

static UNITTEST_DETAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(failures|errors|skipped|expected failures|unexpected successes)=(\d+)").unwrap());

/// Parse `python -m unittest discover -v` output.
pub fn parse_unittest(output: &str) -> TestCounts {
    let Some(total) = UNITTEST_RAN.captures(output).map(|c| num(&c, 1)) else {
        return TestCounts::default();
    };

    let (mut failed, mut skipped) = (0u32, 0u32);
    for line in output.lines().filter(|l| l.starts_with("OK") || l.starts_with("FAILED")) {
        for caps in UNITTEST_DETAIL.captures_iter(line) {
            let n = num(&caps, 2);
            match &caps[1] {
                "failures" | "errors" | "unexpected successes" => failed = failed.saturating_add(n),
                "skipped" | "expected failures" => skipped = skipped.saturating_add(n),
                _ => {}
            }
        }
    }

    TestCounts {
        total,
        passed: total.saturating_sub(failed.saturating_add(skipped)),
        failed,
        skipped,
    }
}

static JEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^Tests:\s+(.*?)(\d+) total").unwrap());

static JEST_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) (failed|passed|skipped|todo)").unwrap());

static MOCHA_PASSING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) passing").unwrap());
static MOCHA_FAILING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) failing").unwrap());
static MOCHA_PENDING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) pending").unwrap());

/// Parse `npm test` output from jest or mocha.
pub fn parse_npm(output: &str) -> TestCounts {
    if let Some(caps) = JEST_SUMMARY.captures_iter(output).last() {
        let (mut passed, mut failed, mut skipped) = (0u32, 0u32, 0u32);
        for part in JEST_COUNT.captures_iter(&caps[1]) {
            let n = num(&part, 1);
            match &part[2] {
                "passed" => passed = passed.saturating_add(n),
                "failed" => failed = failed.saturating_add(n),
                _ => skipped = skipped.saturating_add(n),
            }
        }
        return TestCounts {
            total: num(&caps, 2),
            passed,
            failed,
            skipped,
        };
    }

    let sum = |re: &Regex| {
        re.captures_iter(output)
            .map(|c| num(&c, 1))
            .fold(0u32, u32::saturating_add)
    };
    TestCounts::from_parts(sum(&MOCHA_PASSING), sum(&MOCHA_FAILING), sum(&MOCHA_PENDING))
}

static MAVEN_RESULTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+)").unwrap()
});

/// Parse `mvn test` output. The last `Tests run:` line is the aggregate.
pub fn parse_maven(output: &str) -> TestCounts {
    let Some(caps) = MAVEN_RESULTS.captures_iter(output).last() else {
        return TestCounts::default();
    };
    let total = num(&caps, 1);
    let failed = num(&caps, 2).saturating_add(num(&caps, 3));
    let skipped = num(&caps, 4);
    TestCounts {
        total,
        passed: total.saturating_sub(failed.saturating_add(skipped)),
        failed,
        skipped,
    }
}

static GRADLE_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) tests? completed, (\d+) failed(?:, (\d+) skipped)?").unwrap());

static GRADLE_EVENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^.+ > .+ (PASSED|FAILED|SKIPPED)\s*$").unwrap());

/// Parse `gradle test` output.
///
/// Gradle only prints a count summary on failure; passing runs are counted
/// from test events when the build logs them.
pub fn parse_gradle(output: &str) -> TestCounts {
    if let Some(caps) = GRADLE_SUMMARY.captures_iter(output).last() {
        let total = num(&caps, 1);
        let failed = num(&caps, 2);
        let skipped = num(&caps, 3);
        return TestCounts {
            total,
            passed: total.saturating_sub(failed.saturating_add(skipped)),
            failed,
            skipped,
        };
    }

    let mut counts = TestCounts::default();
    for caps in GRADLE_EVENT.captures_iter(output) {
        match &caps[1] {
            "PASSED" => counts.passed = counts.passed.saturating_add(1),
            "FAILED" => counts.failed = counts.failed.saturating_add(1),
            _ => counts.skipped = counts.skipped.saturating_add(1),
        }
    }
    counts.total = counts.seen();
    counts
}

static TESTTHAT_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*FAIL (\d+) \| WARN \d+ \| SKIP (\d+) \| PASS (\d+)\s*\]").unwrap()
});

/// Parse testthat reporter output.
pub fn parse_testthat(output: &str) -> TestCounts {
    TESTTHAT_SUMMARY
        .captures_iter(output)
        .last()
        .map(|caps| TestCounts::from_parts(num(&caps, 3), num(&caps, 1), num(&caps, 2)))
        .unwrap_or_default()
}

static CARGO_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored").unwrap()
});

/// Parse `cargo test` output. Each test binary prints its own result line.
pub fn parse_cargo(output: &str) -> TestCounts {
    let mut counts = TestCounts::default();
    for caps in CARGO_RESULT.captures_iter(output) {
        counts.passed = counts.passed.saturating_add(num(&caps, 1));
        counts.failed = counts.failed.saturating_add(num(&caps, 2));
        counts.skipped = counts.skipped.saturating_add(num(&caps, 3));
    }
    counts.total = counts.seen();
    counts
}

/// Parse `go test -v` output.
pub fn parse_go(output: &str) -> TestCounts {
    let mut counts = TestCounts::default();
    for line in output.lines().map(str::trim_start) {
        if line.starts_with("--- PASS:") {
            counts.passed = counts.passed.saturating_add(1);
        } else if line.starts_with("--- FAIL:") {
            counts.failed = counts.failed.saturating_add(1);
        } else if line.starts_with("--- SKIP:") {
            counts.skipped = counts.skipped.saturating_add(1);
        }
    }
    counts.total = counts.seen();
    counts
}

/// Merge counts from a secondary source when the primary found nothing.
pub fn or_else(primary: TestCounts, fallback: impl FnOnce() -> TestCounts) -> TestCounts {
    if primary.is_empty() {
        fallback()
    } else {
        primary
    }
}
