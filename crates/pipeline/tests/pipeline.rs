mod common;

use common::{CannedNarrative, DelayingExecutor, MemoryStore, RepoScript, ScriptedExecutor, VALID_NARRATIVE};
use pretty_assertions::assert_eq;
use repolens_common::CheckStatus;
use repolens_pipeline::artifacts::{self, failure_file, JobArtifacts};
use repolens_pipeline::config::JobInput;
use repolens_pipeline::{expand_jobs, rebuild_report, Orchestrator, Publisher, StageContext};
use repolens_schema::{
    AuditLog, Criterion, CriterionStatus, FailureKind, JobSpec, StageFailure, StageKind, StatusRow,
};
use repolens_stages::NarrativeInterpreter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(30);

fn context(executor: Arc<ScriptedExecutor>, output: &Path) -> StageContext {
    StageContext::new(executor, output, TIMEOUT, "almanack table {repo}")
}

fn jobs(urls: &[&str], output: &Path) -> Vec<JobSpec> {
    urls.iter().map(|u| JobSpec::new(u, output)).collect()
}

fn read_status(output: &Path, repo: &str) -> StatusRow {
    let content = std::fs::read_to_string(output.join(repo).join(artifacts::STATUS_FILE)).unwrap();
    StatusRow::from_csv(&content).unwrap()
}

fn read_failure(output: &Path, repo: &str, stage: StageKind) -> StageFailure {
    let content = std::fs::read_to_string(output.join(repo).join(failure_file(stage))).unwrap();
    serde_json::from_str(&content).unwrap()
}

#[tokio::test]
async fn test_healthy_repository_scores_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let executor = Arc::new(ScriptedExecutor::new().with_repo("POT", RepoScript::healthy()));

    let orchestrator = Orchestrator::new(context(executor.clone(), output), output, 2).unwrap();
    let batch = orchestrator
        .run(jobs(&["https://github.com/PythonOT/POT.git"], output))
        .await
        .unwrap();

    assert_eq!(batch.report.rows.len(), 1);
    let row = &batch.report.rows[0];
    assert_eq!(row.tool, "POT");
    assert_eq!(row.clone_repository, CheckStatus::Pass);
    assert_eq!(row.check_readme, CheckStatus::Pass);
    assert_eq!(row.check_dependencies, CheckStatus::Pass);
    assert_eq!(row.check_tests, CheckStatus::Pass);
    assert_eq!(row.almanack, CheckStatus::Pass);
    assert_eq!(row.test_execution, CheckStatus::Pass);
    assert!((row.overall_score.unwrap() - 1.0).abs() < 1e-9);
    assert!(!row.to_csv_record().contains("NA"));

    let outcome = &batch.outcomes[0];
    let rubric = outcome.rubric.as_ref().and_then(|r| r.value()).unwrap();
    assert_eq!(rubric.criterion(Criterion::License).unwrap().status, CriterionStatus::Pass);
    assert_eq!(rubric.criterion(Criterion::Tests).unwrap().status, CriterionStatus::Good);

    let job_dir = output.join("POT");
    for file in [
        artifacts::STATUS_FILE,
        artifacts::METRICS_FILE,
        artifacts::TEST_RESULTS_FILE,
        artifacts::RUBRIC_FILE,
        artifacts::AUDIT_FILE,
    ] {
        assert!(job_dir.join(file).is_file(), "missing {}", file);
    }
    assert!(!job_dir.join(artifacts::NARRATIVE_HTML_FILE).exists());
    assert!(output.join(artifacts::CONSOLIDATED_CSV_FILE).is_file());

    // Working copy is released once the job is terminal.
    assert!(!output.join(artifacts::WORK_DIR).join("POT").exists());

    let audit = AuditLog::from_jsonl(&std::fs::read_to_string(job_dir.join(artifacts::AUDIT_FILE)).unwrap()).unwrap();
    assert_eq!(audit.entries().len(), 5);
    assert_eq!(audit.entries()[0].stage, StageKind::Checkout);
    assert_eq!(audit.entries().last().unwrap().stage, StageKind::Rubric);
    assert!(audit.entries().iter().all(|e| e.success));
}

#[tokio::test]
async fn test_bare_repository_degrades_without_failing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let executor = Arc::new(ScriptedExecutor::new().with_repo("TARGet", RepoScript::bare()));

    let orchestrator = Orchestrator::new(context(executor, output), output, 1).unwrap();
    let batch = orchestrator
        .run(jobs(&["https://github.com/datascience/TARGet"], output))
        .await
        .unwrap();

    let status = read_status(output, "TARGet");
    assert_eq!(status.clone_status, CheckStatus::Pass);
    assert_eq!(status.readme_status, CheckStatus::Pass);
    assert_eq!(status.dependency_status, CheckStatus::Fail);
    assert_eq!(status.tests_status, CheckStatus::Fail);

    let row = &batch.report.rows[0];
    assert_eq!(row.test_execution, CheckStatus::Unknown);

    let rubric = batch.outcomes[0].rubric.as_ref().and_then(|r| r.value()).unwrap();
    let tests = rubric.criterion(Criterion::Tests).unwrap();
    assert_eq!(tests.status, CriterionStatus::Bad);
    assert!(tests.score <= 0.3);
    assert_eq!(rubric.criterion(Criterion::License).unwrap().status, CriterionStatus::Fail);
    assert!(!rubric.recommendations().is_empty());
}

#[tokio::test]
async fn test_checkout_failure_keeps_row() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_repo("POT", RepoScript::healthy())
            .with_repo("gone", RepoScript::unreachable()),
    );

    let orchestrator = Orchestrator::new(context(executor.clone(), output), output, 4).unwrap();
    let batch = orchestrator
        .run(jobs(
            &["https://github.com/org/gone", "https://github.com/PythonOT/POT.git"],
            output,
        ))
        .await
        .unwrap();

    assert_eq!(batch.report.rows.len(), 2);
    let gone = &batch.report.rows[0];
    assert_eq!(gone.tool, "gone");
    assert_eq!(gone.clone_repository, CheckStatus::Fail);
    assert_eq!(gone.check_readme, CheckStatus::Unknown);
    assert_eq!(gone.almanack, CheckStatus::Unknown);
    assert_eq!(gone.test_execution, CheckStatus::Unknown);
    assert_eq!(gone.overall_score, None);
    assert!(gone.to_csv_record().ends_with(",NA"));

    assert_eq!(batch.report.rows[1].clone_repository, CheckStatus::Pass);
    assert_eq!(batch.report.summary.cloned, 1);

    let checkout = read_failure(output, "gone", StageKind::Checkout);
    assert_eq!(checkout.kind, FailureKind::Network);
    assert!(checkout.raw.unwrap().contains("not found"));
    let metrics = read_failure(output, "gone", StageKind::Metrics);
    assert_eq!(metrics.kind, FailureKind::UpstreamUnavailable);

    // No tool ran against the missing working copy.
    assert_eq!(executor.calls_mentioning("gone"), 1);
}

#[tokio::test]
async fn test_invalid_sheet_url_never_reaches_executor() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results");
    let sheet = dir.path().join("sheet.csv");
    std::fs::write(&sheet, "repo_url\nhttps://github.com/PythonOT/POT.git\nnot a url\n").unwrap();

    let jobs = expand_jobs(&JobInput::SampleSheet(sheet), &output).unwrap();
    assert_eq!(jobs.len(), 2);

    let executor = Arc::new(ScriptedExecutor::new().with_repo("POT", RepoScript::healthy()));
    let orchestrator = Orchestrator::new(context(executor.clone(), &output), &output, 2).unwrap();
    let batch = orchestrator.run(jobs).await.unwrap();

    assert_eq!(batch.report.rows.len(), 2);
    let invalid = &batch.outcomes[1];
    let failure = invalid.checkout.as_ref().and_then(|r| r.failure_info()).unwrap();
    assert_eq!(failure.kind, FailureKind::Validation);

    let git_calls = executor.calls().iter().filter(|c| c.program == "git").count();
    assert_eq!(git_calls, 1);
    assert_eq!(executor.calls_mentioning("not a url"), 0);
}

#[tokio::test]
async fn test_one_row_per_job_in_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let names = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let mut executor = ScriptedExecutor::new();
    for name in names {
        executor = executor.with_repo(name, RepoScript::healthy());
    }
    let urls: Vec<String> = names.iter().map(|n| format!("https://github.com/org/{}", n)).collect();
    let urls: Vec<&str> = urls.iter().map(String::as_str).collect();

    let orchestrator = Orchestrator::new(context(Arc::new(executor), output), output, 2).unwrap();
    let batch = orchestrator.run(jobs(&urls, output)).await.unwrap();

    let tools: Vec<&str> = batch.report.rows.iter().map(|r| r.tool.as_str()).collect();
    assert_eq!(tools, names.to_vec());
    assert_eq!(batch.report.summary.total, 5);
    assert_eq!(batch.report.summary.scored, 5);
}

#[tokio::test]
async fn test_report_rebuilt_from_disk_matches_batch() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_repo("POT", RepoScript::healthy())
            .with_repo("TARGet", RepoScript::bare())
            .with_repo("gone", RepoScript::unreachable()),
    );

    let orchestrator = Orchestrator::new(context(executor, output), output, 3).unwrap();
    let batch = orchestrator
        .run(jobs(
            &[
                "https://github.com/PythonOT/POT.git",
                "https://github.com/datascience/TARGet",
                "https://github.com/org/gone",
            ],
            output,
        ))
        .await
        .unwrap();

    let rebuilt = rebuild_report(output).await.unwrap();
    let mut expected = batch.report.rows.clone();
    expected.sort_by(|a, b| a.tool.cmp(&b.tool));
    assert_eq!(rebuilt.rows, expected);
    assert_eq!(rebuilt.to_csv().lines().count(), 4);
}

#[tokio::test]
async fn test_narrative_written_as_json_and_html() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let executor = Arc::new(ScriptedExecutor::new().with_repo("POT", RepoScript::healthy()));
    let interpreter = NarrativeInterpreter::new(Arc::new(CannedNarrative(VALID_NARRATIVE)), TIMEOUT);

    let ctx = context(executor, output).with_narrative(interpreter);
    let orchestrator = Orchestrator::new(ctx, output, 1).unwrap();
    let batch = orchestrator
        .run(jobs(&["https://github.com/PythonOT/POT.git"], output))
        .await
        .unwrap();

    assert!(batch.outcomes[0].narrative.as_ref().unwrap().is_success());
    let job = JobArtifacts::new(output.join("POT"));
    assert!(job.path(artifacts::NARRATIVE_JSON_FILE).is_file());
    let html = job.read_text(artifacts::NARRATIVE_HTML_FILE).unwrap().unwrap();
    assert!(html.contains("Well maintained optimal transport library."));
}

#[tokio::test]
async fn test_malformed_narrative_writes_error_page() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let executor = Arc::new(ScriptedExecutor::new().with_repo("POT", RepoScript::healthy()));
    let interpreter = NarrativeInterpreter::new(Arc::new(CannedNarrative("I think it is fine")), TIMEOUT);

    let ctx = context(executor, output).with_narrative(interpreter);
    let orchestrator = Orchestrator::new(ctx, output, 1).unwrap();
    let batch = orchestrator
        .run(jobs(&["https://github.com/PythonOT/POT.git"], output))
        .await
        .unwrap();

    // The rest of the job is unaffected.
    assert!(batch.report.rows[0].overall_score.is_some());

    let job = JobArtifacts::new(output.join("POT"));
    assert!(!job.path(artifacts::NARRATIVE_JSON_FILE).exists());
    let html = job.read_text(artifacts::NARRATIVE_HTML_FILE).unwrap().unwrap();
    assert!(html.contains("Error in AI Analysis"));

    let failure = read_failure(output, "POT", StageKind::Narrative);
    assert_eq!(failure.kind, FailureKind::Parse);
    assert_eq!(failure.raw.as_deref(), Some("I think it is fine"));
}

#[tokio::test]
async fn test_publish_uploads_metrics_once_per_job() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let executor = Arc::new(ScriptedExecutor::new().with_repo("POT", RepoScript::healthy()));
    let store = Arc::new(MemoryStore::default());

    let ctx = context(executor, output).with_publisher(Publisher {
        store: store.clone(),
        folder_id: "syn1".to_string(),
    });
    let orchestrator = Orchestrator::new(ctx, output, 1).unwrap();
    let batch = orchestrator
        .run(jobs(&["https://github.com/PythonOT/POT.git"], output))
        .await
        .unwrap();

    let receipt = batch.outcomes[0].publish.as_ref().and_then(|r| r.value()).unwrap();
    assert_eq!(receipt.files.len(), 1);
    assert_eq!(receipt.files[0].name, artifacts::METRICS_FILE);
    assert_eq!(store.uploads(), vec![(receipt.folder_id.clone(), artifacts::METRICS_FILE.to_string())]);
    assert_eq!(store.folder_count(), 1);
    assert!(output.join("POT").join(artifacts::PUBLISH_RECEIPT_FILE).is_file());

    // A second run reuses the folder.
    orchestrator
        .run(jobs(&["https://github.com/PythonOT/POT.git"], output))
        .await
        .unwrap();
    assert_eq!(store.folder_count(), 1);
    assert_eq!(store.uploads().len(), 2);
}

#[tokio::test]
async fn test_publish_skipped_when_metrics_failed() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let executor = Arc::new(ScriptedExecutor::new().with_repo("POT", RepoScript::healthy().without_metrics()));
    let store = Arc::new(MemoryStore::default());

    let ctx = context(executor, output).with_publisher(Publisher {
        store: store.clone(),
        folder_id: "syn1".to_string(),
    });
    let orchestrator = Orchestrator::new(ctx, output, 1).unwrap();
    let batch = orchestrator
        .run(jobs(&["https://github.com/PythonOT/POT.git"], output))
        .await
        .unwrap();

    let row = &batch.report.rows[0];
    assert_eq!(row.almanack, CheckStatus::Fail);
    assert!(row.overall_score.is_some());

    let publish = read_failure(output, "POT", StageKind::Publish);
    assert_eq!(publish.kind, FailureKind::Skipped);
    assert!(store.uploads().is_empty());

    let metrics = read_failure(output, "POT", StageKind::Metrics);
    assert_eq!(metrics.kind, FailureKind::Tool);
    assert!(metrics.raw.unwrap().contains("Traceback"));
}

#[tokio::test]
async fn test_panicking_stage_is_crashed_and_batch_completes() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_repo("broken", RepoScript::healthy().panicking_metrics())
            .with_repo("POT", RepoScript::healthy()),
    );

    let orchestrator = Orchestrator::new(context(executor, output), output, 2).unwrap();
    let batch = orchestrator
        .run(jobs(
            &["https://github.com/org/broken", "https://github.com/PythonOT/POT.git"],
            output,
        ))
        .await
        .unwrap();

    assert_eq!(batch.report.rows.len(), 2);
    let broken = &batch.outcomes[0];
    let failure = broken.metrics.as_ref().and_then(|r| r.failure_info()).unwrap();
    assert_eq!(failure.kind, FailureKind::Crashed);
    assert_eq!(read_failure(output, "broken", StageKind::Metrics).kind, FailureKind::Crashed);

    // Stages that do not depend on metrics still ran, and the rubric scored the rest.
    assert!(broken.tests.as_ref().unwrap().is_success());
    assert!(broken.rubric.as_ref().unwrap().is_success());

    let row = &batch.report.rows[0];
    assert_eq!(row.tool, "broken");
    assert_eq!(row.clone_repository, CheckStatus::Pass);
    assert_eq!(row.almanack, CheckStatus::Unknown);
    assert_eq!(row.test_execution, CheckStatus::Pass);
    assert!(row.overall_score.is_some());

    let healthy = &batch.report.rows[1];
    assert_eq!(healthy.tool, "POT");
    assert_eq!(healthy.almanack, CheckStatus::Pass);
    assert_eq!(healthy.test_execution, CheckStatus::Pass);
    assert!((healthy.overall_score.unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(read_status(output, "POT").clone_status, CheckStatus::Pass);
}

#[tokio::test]
async fn test_stages_of_one_job_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let executor = Arc::new(DelayingExecutor::new(
        ScriptedExecutor::new().with_repo("POT", RepoScript::healthy()),
        Duration::from_millis(200),
    ));

    let ctx = StageContext::new(executor.clone(), output, TIMEOUT, "almanack table {repo}");
    let orchestrator = Orchestrator::new(ctx, output, 1).unwrap();
    let batch = orchestrator
        .run(jobs(&["https://github.com/PythonOT/POT.git"], output))
        .await
        .unwrap();

    assert_eq!(batch.report.rows[0].almanack, CheckStatus::Pass);
    // Metrics and tests both hold a call open after checkout.
    assert!(executor.peak_calls() >= 2, "peak {}", executor.peak_calls());
    assert_eq!(executor.peak_repos(), 1);
}

#[tokio::test]
async fn test_jobs_never_exceed_parallel_limit() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let names = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let mut scripted = ScriptedExecutor::new();
    for name in names {
        scripted = scripted.with_repo(name, RepoScript::healthy());
    }
    let executor = Arc::new(DelayingExecutor::new(scripted, Duration::from_millis(50)));
    let urls: Vec<String> = names.iter().map(|n| format!("https://github.com/org/{}", n)).collect();
    let urls: Vec<&str> = urls.iter().map(String::as_str).collect();

    let ctx = StageContext::new(executor.clone(), output, TIMEOUT, "almanack table {repo}");
    let orchestrator = Orchestrator::new(ctx, output, 2).unwrap();
    let batch = orchestrator.run(jobs(&urls, output)).await.unwrap();

    assert_eq!(batch.report.summary.scored, 5);
    assert_eq!(executor.peak_repos(), 2);
}

#[tokio::test]
async fn test_fast_job_finishes_before_slow_job() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();
    let scripted = ScriptedExecutor::new()
        .with_repo("slow", RepoScript::healthy())
        .with_repo("fast", RepoScript::healthy());
    let executor = Arc::new(
        DelayingExecutor::new(scripted, Duration::ZERO).with_delay("slow", Duration::from_millis(300)),
    );

    let ctx = StageContext::new(executor.clone(), output, TIMEOUT, "almanack table {repo}");
    let orchestrator = Orchestrator::new(ctx, output, 2).unwrap();
    let batch = orchestrator
        .run(jobs(&["https://github.com/org/slow", "https://github.com/org/fast"], output))
        .await
        .unwrap();

    let finished = executor.finished();
    let last_fast = finished.iter().rposition(|r| r == "fast").unwrap();
    let first_slow = finished.iter().position(|r| r == "slow").unwrap();
    assert!(last_fast < first_slow, "completion order {:?}", finished);

    // The report still follows input order.
    let tools: Vec<&str> = batch.report.rows.iter().map(|r| r.tool.as_str()).collect();
    assert_eq!(tools, vec!["slow", "fast"]);
}
