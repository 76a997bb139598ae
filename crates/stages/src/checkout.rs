//! Checkout acquisition: one isolated working copy per job.

use crate::executor::{CommandSpec, Executor};
use repolens_schema::{FailureKind, JobSpec, StageResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A local checkout owned by exactly one job. Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    pub repo_name: String,
    pub path: PathBuf,
}

/// stderr fragments that indicate the remote could not be reached or read.
const NETWORK_ERROR_MARKERS: &[&str] = &[
    "could not resolve host",
    "repository not found",
    "authentication failed",
    "could not read username",
    "connection timed out",
    "failed to connect",
    "unable to access",
];

/// Path of a job's working copy under the shared work root.
pub fn working_copy_path(work_root: &Path, job: &JobSpec) -> PathBuf {
    work_root.join(job.repo_name())
}

/// Clone a job's repository into `<work_root>/<repo_name>`.
///
/// Re-invocation for the same job replaces the previous checkout. A job
/// whose URL failed validation is rejected here without running git.
pub async fn acquire(
    executor: &dyn Executor,
    job: &JobSpec,
    work_root: &Path,
    timeout: Duration,
) -> StageResult<WorkingCopy> {
    if let Some(reason) = job.url_error() {
        warn!("Skipping clone of {}: {}", job.repo_url(), reason);
        return StageResult::failure(FailureKind::Validation, reason);
    }

    let dest = working_copy_path(work_root, job);
    if let Err(e) = reset_destination(&dest).await {
        return StageResult::failure(
            FailureKind::Tool,
            format!("failed to prepare {}: {}", dest.display(), e),
        );
    }

    let command = CommandSpec::new("git")
        .args(["clone", "--depth", "1", "--quiet"])
        .arg(job.repo_url())
        .arg(dest.to_string_lossy())
        .env("GIT_TERMINAL_PROMPT", "0")
        .timeout(timeout);

    info!("Cloning {} into {:?}", job.repo_url(), dest);
    let output = match executor.execute(&command).await {
        Ok(output) => output,
        Err(e) => return StageResult::from(Err::<WorkingCopy, _>(e)),
    };

    if !output.success() {
        let stderr = output.stderr.trim().to_string();
        let lowered = stderr.to_lowercase();
        let kind = if NETWORK_ERROR_MARKERS.iter().any(|m| lowered.contains(m)) {
            FailureKind::Network
        } else {
            FailureKind::Tool
        };
        return StageResult::failure_with_raw(
            kind,
            format!("git clone exited with {:?}", output.exit_code),
            stderr,
        );
    }

    if !dest.is_dir() {
        return StageResult::failure(
            FailureKind::Tool,
            format!("git clone reported success but {} is missing", dest.display()),
        );
    }

    debug!("Working copy ready at {:?}", dest);
    StageResult::success(WorkingCopy {
        repo_name: job.repo_name().to_string(),
        path: dest,
    })
}

async fn reset_destination(dest: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(dest).await? {
        tokio::fs::remove_dir_all(dest).await?;
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Remove a working copy once the job's artifacts are written. Best-effort.
pub async fn release(copy: &WorkingCopy) {
    if let Err(e) = tokio::fs::remove_dir_all(&copy.path).await {
        debug!("Could not remove working copy {:?}: {}", copy.path, e);
    }
}
