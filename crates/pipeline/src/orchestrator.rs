//! Batch orchestrator: fans jobs out under a concurrency bound, then runs the
//! Report Aggregator exactly once after every job is terminal.

use crate::aggregate::{self, JobRecord};
use crate::graph::GraphError;
use crate::scheduler::{JobOutcome, JobRunner, StageContext};
use repolens_common::Result;
use repolens_schema::{ConsolidatedReport, JobSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Result of a whole batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub report: ConsolidatedReport,
    /// One outcome per input job, in input order.
    pub outcomes: Vec<JobOutcome>,
}

pub struct Orchestrator {
    runner: Arc<JobRunner>,
    output_dir: PathBuf,
    max_parallel_jobs: usize,
}

impl Orchestrator {
    pub fn new(
        ctx: StageContext,
        output_dir: impl Into<PathBuf>,
        max_parallel_jobs: usize,
    ) -> std::result::Result<Self, GraphError> {
        Ok(Self {
            runner: Arc::new(JobRunner::for_context(ctx)?),
            output_dir: output_dir.into(),
            max_parallel_jobs: max_parallel_jobs.max(1),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run every job, then aggregate.
    ///
    /// Job failures never surface here; only an unwritable report does.
    pub async fn run(&self, jobs: Vec<JobSpec>) -> Result<BatchOutcome> {
        info!(
            "Running {} job(s), at most {} at a time, stages: {:?}",
            jobs.len(),
            self.max_parallel_jobs,
            self.runner.graph().stages()
        );

        // Step 1: Prepare the output root
        tokio::fs::create_dir_all(&self.output_dir).await?;

        // Step 2: Fan out, bounded by the semaphore
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_jobs));
        let mut running = JoinSet::new();
        for (index, job) in jobs.iter().cloned().enumerate() {
            let runner = self.runner.clone();
            let semaphore = semaphore.clone();
            running.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, runner.run(job).await)
            });
        }

        // Step 3: Join every job; a lost task still yields an outcome
        let mut slots: Vec<Option<JobOutcome>> = vec![None; jobs.len()];
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!("Job task failed: {}", e),
            }
        }
        let outcomes: Vec<JobOutcome> = slots
            .into_iter()
            .zip(jobs)
            .map(|(slot, job)| slot.unwrap_or_else(|| JobOutcome::crashed(job, "job task did not complete")))
            .collect();

        // Step 4: Aggregate once, after the barrier
        let records: Vec<JobRecord> = outcomes.iter().map(JobRecord::from_outcome).collect();
        let report = aggregate::build_report(&records);
        aggregate::write_report(&self.output_dir, &report).await?;

        info!(
            "Batch finished: {} job(s), {} cloned, {} scored",
            report.summary.total, report.summary.cloned, report.summary.scored
        );
        Ok(BatchOutcome { report, outcomes })
    }
}
