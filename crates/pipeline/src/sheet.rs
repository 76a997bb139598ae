//! Input expansion: one [`JobSpec`] per sample-sheet row, or one for a single URL.

use crate::config::{ConfigError, JobInput};
use repolens_common::csv::split_record;
use repolens_schema::JobSpec;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Required sample-sheet column.
pub const REPO_URL_COLUMN: &str = "repo_url";

/// Expand the configured input into jobs.
///
/// A malformed single URL is fatal. A malformed URL in a sample-sheet row
/// only fails that row's job at checkout. Jobs whose repository names
/// collide are rejected.
pub fn expand_jobs(input: &JobInput, output_dir: &Path) -> Result<Vec<JobSpec>, ConfigError> {
    let jobs = match input {
        JobInput::SingleUrl(url) => {
            let job = JobSpec::validated(url, output_dir).map_err(|e| ConfigError::InvalidRepoUrl(e.to_string()))?;
            vec![job]
        }
        JobInput::SampleSheet(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SampleSheet {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            parse_sample_sheet(&content, output_dir).map_err(|reason| ConfigError::SampleSheet {
                path: path.clone(),
                reason,
            })?
        }
    };

    reject_duplicates(&jobs)?;
    info!("Expanded input into {} job(s)", jobs.len());
    Ok(jobs)
}

/// Parse sample-sheet CSV content. Blank lines are ignored.
pub fn parse_sample_sheet(content: &str, output_dir: &Path) -> Result<Vec<JobSpec>, String> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let header = lines.next().ok_or_else(|| "sample sheet is empty".to_string())?;
    let columns = split_record(header.trim_start_matches('\u{feff}'));
    let column = columns
        .iter()
        .position(|c| c.trim() == REPO_URL_COLUMN)
        .ok_or_else(|| format!("missing required column '{}'", REPO_URL_COLUMN))?;

    let jobs: Vec<JobSpec> = lines
        .map(|line| {
            let fields = split_record(line);
            let url = fields.get(column).map(|f| f.trim()).unwrap_or_default();
            let job = JobSpec::new(url, output_dir);
            if let Some(reason) = job.url_error() {
                warn!("Row with repo_url '{}' will fail validation: {}", url, reason);
            }
            job
        })
        .collect();

    if jobs.is_empty() {
        return Err("sample sheet has no rows".to_string());
    }
    Ok(jobs)
}

fn reject_duplicates(jobs: &[JobSpec]) -> Result<(), ConfigError> {
    let mut by_name: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for job in jobs {
        by_name.entry(job.repo_name()).or_default().push(job.repo_url());
    }
    match by_name.into_iter().find(|(_, urls)| urls.len() > 1) {
        Some((name, urls)) => Err(ConfigError::DuplicateRepoName {
            name: name.to_string(),
            urls: urls.join(", "),
        }),
        None => Ok(()),
    }
}
