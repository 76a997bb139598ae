//! Per-job stage scheduler.
//!
//! Walks a job's [`StageGraph`]: a stage is launched as soon as all of its
//! upstream stages are terminal, independent stages run concurrently, and
//! every stage leaves exactly one [`StageResult`] plus an audit entry.
//! Failures are recorded as data; nothing a stage does can abort the job.

use crate::artifacts::{self, JobArtifacts};
use crate::config::{NarrativeConfig, PipelineConfig};
use crate::graph::{Capabilities, GraphError, LaunchPolicy, StageGraph};
use repolens_common::{CheckStatus, Timestamp};
use repolens_schema::{
    AuditLog, CheckBatteryResult, CheckName, FailureKind, JobSpec, MetricsDocument, NarrativeSummary, RubricReport,
    StageAuditEntry, StageFailure, StageKind, StageResult, StatusRow, TestExecutionResult,
};
use repolens_stages::checkout::{self, WorkingCopy};
use repolens_stages::narrative::{self, NarrativeBackend, NarrativeInterpreter, OpenAiBackend, SynapseAgentBackend};
use repolens_stages::publish::{self, ArtifactStore, PublishReceipt, SynapseStore};
use repolens_stages::{checks, Executor, MetricsAnalyzer, TestRunner};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

/// Destination for the publish stage.
#[derive(Clone)]
pub struct Publisher {
    pub store: Arc<dyn ArtifactStore>,
    pub folder_id: String,
}

/// Services shared by every job of a run.
#[derive(Clone)]
pub struct StageContext {
    pub executor: Arc<dyn Executor>,
    pub work_root: PathBuf,
    pub tool_timeout: Duration,
    pub metrics: MetricsAnalyzer,
    pub tests: TestRunner,
    pub narrative: Option<NarrativeInterpreter>,
    pub publisher: Option<Publisher>,
}

impl StageContext {
    /// Context with the core stages only. Working copies go to `<output_root>/.work`.
    pub fn new(
        executor: Arc<dyn Executor>,
        output_root: impl Into<PathBuf>,
        tool_timeout: Duration,
        metrics_command: &str,
    ) -> Self {
        Self {
            executor,
            work_root: output_root.into().join(artifacts::WORK_DIR),
            tool_timeout,
            metrics: MetricsAnalyzer::new(metrics_command, tool_timeout),
            tests: TestRunner::new(tool_timeout),
            narrative: None,
            publisher: None,
        }
    }

    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.metrics = self.metrics.with_scratch_root(scratch_dir);
        self
    }

    pub fn with_narrative(mut self, interpreter: NarrativeInterpreter) -> Self {
        self.narrative = Some(interpreter);
        self
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Build the production context for a validated configuration.
    pub fn from_config(config: &PipelineConfig, executor: Arc<dyn Executor>) -> Self {
        let mut ctx = Self::new(
            executor.clone(),
            &config.output_dir,
            config.tool_timeout,
            &config.metrics_command,
        );

        if let Some(scratch) = &config.scratch_dir {
            ctx = ctx.with_scratch_dir(scratch);
        }

        if let Some(narrative) = &config.narrative {
            let backend: Arc<dyn NarrativeBackend> = match narrative {
                NarrativeConfig::OpenAi { api_key, model } => Arc::new(OpenAiBackend::new(api_key.expose(), model)),
                NarrativeConfig::SynapseAgent { agent_id, auth_token } => {
                    Arc::new(SynapseAgentBackend::new(auth_token.expose(), agent_id))
                }
            };
            ctx = ctx.with_narrative(NarrativeInterpreter::new(backend, config.narrative_timeout));
        }

        if let Some(publish) = &config.publish {
            let store = SynapseStore::new(publish.auth_token.expose(), executor, config.tool_timeout);
            ctx = ctx.with_publisher(Publisher {
                store: Arc::new(store),
                folder_id: publish.folder_id.clone(),
            });
        }

        ctx
    }

    /// Optional stages this context can run.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            narrative: self.narrative.is_some(),
            publish: self.publisher.is_some(),
        }
    }
}

/// Terminal result of one stage, tagged by stage.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Checkout(StageResult<WorkingCopy>),
    CheckBattery(StageResult<CheckBatteryResult>),
    Metrics(StageResult<MetricsDocument>),
    Tests(StageResult<TestExecutionResult>),
    Rubric(StageResult<RubricReport>),
    Narrative(StageResult<NarrativeSummary>),
    Publish(StageResult<PublishReceipt>),
}

impl StageOutput {
    /// A failure output for any stage.
    pub fn failed(kind: StageKind, failure: StageFailure) -> Self {
        match kind {
            StageKind::Checkout => StageOutput::Checkout(StageResult::Failure(failure)),
            StageKind::CheckBattery => StageOutput::CheckBattery(StageResult::Failure(failure)),
            StageKind::Metrics => StageOutput::Metrics(StageResult::Failure(failure)),
            StageKind::Tests => StageOutput::Tests(StageResult::Failure(failure)),
            StageKind::Rubric => StageOutput::Rubric(StageResult::Failure(failure)),
            StageKind::Narrative => StageOutput::Narrative(StageResult::Failure(failure)),
            StageKind::Publish => StageOutput::Publish(StageResult::Failure(failure)),
        }
    }

    pub fn kind(&self) -> StageKind {
        match self {
            StageOutput::Checkout(_) => StageKind::Checkout,
            StageOutput::CheckBattery(_) => StageKind::CheckBattery,
            StageOutput::Metrics(_) => StageKind::Metrics,
            StageOutput::Tests(_) => StageKind::Tests,
            StageOutput::Rubric(_) => StageKind::Rubric,
            StageOutput::Narrative(_) => StageKind::Narrative,
            StageOutput::Publish(_) => StageKind::Publish,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            StageOutput::Checkout(r) => r.failure_info(),
            StageOutput::CheckBattery(r) => r.failure_info(),
            StageOutput::Metrics(r) => r.failure_info(),
            StageOutput::Tests(r) => r.failure_info(),
            StageOutput::Rubric(r) => r.failure_info(),
            StageOutput::Narrative(r) => r.failure_info(),
            StageOutput::Publish(r) => r.failure_info(),
        }
    }
}

fn failure(kind: FailureKind, message: impl Into<String>) -> StageFailure {
    StageFailure {
        kind,
        message: message.into(),
        raw: None,
    }
}

/// Everything one job produced. Stages that never ran stay `None`.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: JobSpec,
    pub checkout: Option<StageResult<WorkingCopy>>,
    pub checks: Option<StageResult<CheckBatteryResult>>,
    pub metrics: Option<StageResult<MetricsDocument>>,
    pub tests: Option<StageResult<TestExecutionResult>>,
    pub rubric: Option<StageResult<RubricReport>>,
    pub narrative: Option<StageResult<NarrativeSummary>>,
    pub publish: Option<StageResult<PublishReceipt>>,
    pub audit: AuditLog,
}

impl JobOutcome {
    pub fn new(job: JobSpec) -> Self {
        Self {
            job,
            checkout: None,
            checks: None,
            metrics: None,
            tests: None,
            rubric: None,
            narrative: None,
            publish: None,
            audit: AuditLog::new(),
        }
    }

    /// Outcome for a job whose task died before producing anything.
    pub fn crashed(job: JobSpec, message: &str) -> Self {
        warn!("Job {} crashed: {}", job.repo_name(), message);
        Self::new(job)
    }

    fn record(&mut self, output: StageOutput) {
        match output {
            StageOutput::Checkout(r) => self.checkout = Some(r),
            StageOutput::CheckBattery(r) => self.checks = Some(r),
            StageOutput::Metrics(r) => self.metrics = Some(r),
            StageOutput::Tests(r) => self.tests = Some(r),
            StageOutput::Rubric(r) => self.rubric = Some(r),
            StageOutput::Narrative(r) => self.narrative = Some(r),
            StageOutput::Publish(r) => self.publish = Some(r),
        }
    }

    /// `Some(succeeded)` once the stage is terminal.
    pub fn stage_state(&self, kind: StageKind) -> Option<bool> {
        match kind {
            StageKind::Checkout => self.checkout.as_ref().map(StageResult::is_success),
            StageKind::CheckBattery => self.checks.as_ref().map(StageResult::is_success),
            StageKind::Metrics => self.metrics.as_ref().map(StageResult::is_success),
            StageKind::Tests => self.tests.as_ref().map(StageResult::is_success),
            StageKind::Rubric => self.rubric.as_ref().map(StageResult::is_success),
            StageKind::Narrative => self.narrative.as_ref().map(StageResult::is_success),
            StageKind::Publish => self.publish.as_ref().map(StageResult::is_success),
        }
    }

    pub fn is_terminal(&self, kind: StageKind) -> bool {
        self.stage_state(kind).is_some()
    }

    /// Clone/check status summary for `status_repo.txt`.
    pub fn status_row(&self) -> StatusRow {
        let clone_status = match &self.checkout {
            Some(r) => CheckStatus::from_bool(r.is_success()),
            None => CheckStatus::Unknown,
        };
        let checks = self.checks.as_ref().and_then(StageResult::value);
        let check = |name: CheckName| checks.map(|c| c.status(name)).unwrap_or(CheckStatus::Unknown);

        StatusRow {
            repo_name: self.job.repo_name().to_string(),
            clone_status,
            readme_status: check(CheckName::Readme),
            dependency_status: check(CheckName::Dependencies),
            tests_status: check(CheckName::Tests),
        }
    }

    /// Working copy for downstream stages, or the reason there is none.
    fn working_copy(&self) -> Result<WorkingCopy, StageFailure> {
        match &self.checkout {
            Some(StageResult::Success { value }) => Ok(value.clone()),
            Some(StageResult::Failure(f)) => Err(failure(
                FailureKind::UpstreamUnavailable,
                format!("checkout failed: {}", f.message),
            )),
            None => Err(failure(FailureKind::UpstreamUnavailable, "checkout did not run")),
        }
    }
}

struct StageCompletion {
    started: Timestamp,
    output: StageOutput,
}

/// Runs one job's stage graph to completion.
pub struct JobRunner {
    ctx: Arc<StageContext>,
    graph: Arc<StageGraph>,
}

impl JobRunner {
    pub fn new(ctx: Arc<StageContext>, graph: Arc<StageGraph>) -> Self {
        Self { ctx, graph }
    }

    /// Build a runner whose graph matches the context's capabilities.
    pub fn for_context(ctx: StageContext) -> Result<Self, GraphError> {
        let graph = StageGraph::build(ctx.capabilities())?;
        Ok(Self::new(Arc::new(ctx), Arc::new(graph)))
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Run every stage of `job`. Never fails: problems end up in the outcome.
    pub async fn run(&self, job: JobSpec) -> JobOutcome {
        let span = info_span!("job", repo = %job.repo_name());
        self.run_job(job).instrument(span).await
    }

    async fn run_job(&self, job: JobSpec) -> JobOutcome {
        info!("Starting job for {}", job.repo_url());
        let artifacts = JobArtifacts::new(job.output_dir());
        if let Err(e) = artifacts.prepare().await {
            warn!("Could not prepare {:?}: {}", artifacts.dir(), e);
        }

        let mut outcome = JobOutcome::new(job);
        let mut pending: Vec<StageKind> = self.graph.stages().to_vec();
        let mut running: JoinSet<StageCompletion> = JoinSet::new();

        loop {
            self.launch_ready(&mut pending, &mut outcome, &artifacts, &mut running).await;

            match running.join_next().await {
                Some(Ok(completion)) => self.complete(&mut outcome, &artifacts, completion).await,
                Some(Err(e)) => warn!("Stage supervisor task failed: {}", e),
                None => break,
            }
        }

        for kind in pending {
            // Only reachable if a supervisor task died; record it so the stage is terminal.
            let output = StageOutput::failed(kind, failure(FailureKind::Crashed, "stage never completed"));
            let started = Timestamp::now();
            self.complete(&mut outcome, &artifacts, StageCompletion { started, output }).await;
        }

        if let Err(e) = artifacts.write_text(artifacts::STATUS_FILE, &outcome.status_row().to_csv()).await {
            warn!("Could not write status file: {}", e);
        }
        if let Err(e) = artifacts.write_text(artifacts::AUDIT_FILE, &outcome.audit.to_jsonl()).await {
            warn!("Could not write audit log: {}", e);
        }

        if let Some(copy) = outcome.checkout.as_ref().and_then(StageResult::value) {
            checkout::release(copy).await;
        }

        info!("Job for {} finished", outcome.job.repo_name());
        outcome
    }

    /// Launch (or skip) every pending stage whose upstream stages are terminal.
    async fn launch_ready(
        &self,
        pending: &mut Vec<StageKind>,
        outcome: &mut JobOutcome,
        artifacts: &JobArtifacts,
        running: &mut JoinSet<StageCompletion>,
    ) {
        loop {
            let ready = pending.iter().copied().find(|kind| {
                self.graph
                    .upstream(*kind)
                    .iter()
                    .all(|up| outcome.is_terminal(*up))
            });
            let Some(kind) = ready else {
                return;
            };
            pending.retain(|k| *k != kind);

            let upstream = self.graph.upstream(kind);
            let failed: Vec<String> = upstream
                .iter()
                .filter(|up| outcome.stage_state(**up) == Some(false))
                .map(|up| up.to_string())
                .collect();

            if self.graph.policy(kind) == LaunchPolicy::RequireSuccess && !failed.is_empty() {
                debug!("Skipping {}: upstream {} did not succeed", kind, failed.join(", "));
                let output = StageOutput::failed(
                    kind,
                    failure(
                        FailureKind::Skipped,
                        format!("upstream stage(s) did not succeed: {}", failed.join(", ")),
                    ),
                );
                let started = Timestamp::now();
                self.complete(outcome, artifacts, StageCompletion { started, output }).await;
                continue;
            }

            self.spawn_stage(kind, outcome, artifacts, running);
        }
    }

    fn spawn_stage(
        &self,
        kind: StageKind,
        outcome: &JobOutcome,
        artifacts: &JobArtifacts,
        running: &mut JoinSet<StageCompletion>,
    ) {
        let ctx = self.ctx.clone();
        match kind {
            StageKind::Checkout => {
                let job = outcome.job.clone();
                supervise(running, kind, async move {
                    let result = checkout::acquire(&*ctx.executor, &job, &ctx.work_root, ctx.tool_timeout).await;
                    StageOutput::Checkout(result)
                });
            }
            StageKind::CheckBattery => {
                let copy = outcome.working_copy();
                supervise(running, kind, async move {
                    StageOutput::CheckBattery(match copy {
                        Ok(copy) => checks::run(&copy).await,
                        Err(f) => StageResult::Failure(f),
                    })
                });
            }
            StageKind::Metrics => {
                let copy = outcome.working_copy();
                supervise(running, kind, async move {
                    StageOutput::Metrics(match copy {
                        Ok(copy) => ctx.metrics.analyze(&*ctx.executor, &copy).await,
                        Err(f) => StageResult::Failure(f),
                    })
                });
            }
            StageKind::Tests => {
                let copy = outcome.working_copy();
                supervise(running, kind, async move {
                    StageOutput::Tests(match copy {
                        Ok(copy) => ctx.tests.run(&*ctx.executor, &copy).await,
                        Err(f) => StageResult::Failure(f),
                    })
                });
            }
            StageKind::Rubric => {
                let metrics = outcome.metrics.as_ref().and_then(StageResult::value).cloned();
                let tests = outcome.tests.as_ref().and_then(StageResult::value).cloned();
                let checks = outcome.checks.as_ref().and_then(StageResult::value).cloned();
                supervise(running, kind, async move {
                    let report = repolens_rubric::evaluate(metrics.as_ref(), tests.as_ref(), checks.as_ref());
                    StageOutput::Rubric(StageResult::success(report))
                });
            }
            StageKind::Narrative => {
                let url = outcome.job.repo_url().to_string();
                let metrics = outcome.metrics.as_ref().and_then(StageResult::value).cloned();
                let rubric = outcome.rubric.as_ref().and_then(StageResult::value).cloned();
                supervise(running, kind, async move {
                    StageOutput::Narrative(match (&ctx.narrative, rubric) {
                        (Some(interpreter), Some(rubric)) => interpreter.interpret(&url, metrics.as_ref(), &rubric).await,
                        (None, _) => StageResult::failure(FailureKind::Skipped, "no narrative backend configured"),
                        (_, None) => StageResult::failure(FailureKind::UpstreamUnavailable, "rubric report unavailable"),
                    })
                });
            }
            StageKind::Publish => {
                let repo_name = outcome.job.repo_name().to_string();
                let files = vec![artifacts.path(artifacts::METRICS_FILE)];
                supervise(running, kind, async move {
                    StageOutput::Publish(match &ctx.publisher {
                        Some(p) => publish::publish(&*p.store, &p.folder_id, &repo_name, &files).await,
                        None => StageResult::failure(FailureKind::Skipped, "no artifact store configured"),
                    })
                });
            }
        }
    }

    /// Record a terminal stage result: audit entry, log line, per-stage artifact.
    async fn complete(&self, outcome: &mut JobOutcome, artifacts: &JobArtifacts, completion: StageCompletion) {
        let StageCompletion { started, output } = completion;
        let kind = output.kind();
        let finished = Timestamp::now();

        let failure = output.failure().cloned();
        outcome.audit.add(StageAuditEntry::new(
            kind,
            started.inner(),
            finished.inner(),
            failure.as_ref().map(|f| (f.kind, f.message.clone())),
        ));

        match &failure {
            None => info!("Stage {} succeeded in {}ms", kind, started.millis_until(&finished)),
            Some(f) => warn!("Stage {} failed ({:?}): {}", kind, f.kind, f.message),
        }

        if let Err(e) = write_stage_artifacts(artifacts, &output, outcome.job.repo_name()).await {
            warn!("Could not write artifacts for stage {}: {}", kind, e);
        }

        outcome.record(output);
    }
}

/// Run a stage future on its own task so a panic becomes a `Crashed` failure.
fn supervise<F>(running: &mut JoinSet<StageCompletion>, kind: StageKind, stage: F)
where
    F: Future<Output = StageOutput> + Send + 'static,
{
    let span = info_span!("stage", stage = %kind);
    running.spawn(async move {
        let started = Timestamp::now();
        let output = match tokio::spawn(stage.instrument(span)).await {
            Ok(output) => output,
            Err(e) => StageOutput::failed(kind, failure(FailureKind::Crashed, format!("stage task failed: {}", e))),
        };
        StageCompletion { started, output }
    });
}

async fn write_stage_artifacts(
    artifacts: &JobArtifacts,
    output: &StageOutput,
    repo_name: &str,
) -> repolens_common::Result<()> {
    if let Some(f) = output.failure() {
        artifacts.write_failure(output.kind(), f).await?;
    }

    match output {
        StageOutput::Metrics(StageResult::Success { value }) => {
            artifacts.write_json(artifacts::METRICS_FILE, value).await?;
        }
        StageOutput::Tests(StageResult::Success { value }) => {
            artifacts.write_json(artifacts::TEST_RESULTS_FILE, value).await?;
        }
        StageOutput::Rubric(StageResult::Success { value }) => {
            artifacts.write_json(artifacts::RUBRIC_FILE, value).await?;
        }
        StageOutput::Narrative(StageResult::Success { value }) => {
            artifacts.write_json(artifacts::NARRATIVE_JSON_FILE, value).await?;
            let html = narrative::render_html(repo_name, value)?;
            artifacts.write_text(artifacts::NARRATIVE_HTML_FILE, &html).await?;
        }
        StageOutput::Narrative(StageResult::Failure(f)) => {
            let html = narrative::render_error_html(repo_name, f)?;
            artifacts.write_text(artifacts::NARRATIVE_HTML_FILE, &html).await?;
        }
        StageOutput::Publish(StageResult::Success { value }) => {
            artifacts.write_json(artifacts::PUBLISH_RECEIPT_FILE, value).await?;
        }
        _ => {}
    }
    Ok(())
}
