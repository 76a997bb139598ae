//! Job identity: one repository URL per job, keyed by its canonical name.

use regex::Regex;
use repolens_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Accepted repository URL grammar: `https://<host>/<owner>/<repo>(.git)?`.
static REPO_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://[A-Za-z0-9.-]+(?::\d+)?/[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").unwrap()
});

/// Validate a repository URL against the accepted grammar.
///
/// Pure string check; never touches the network.
pub fn validate_repo_url(url: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidRepoUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    if !REPO_URL_PATTERN.is_match(url) {
        return Err(invalid("expected https://<host>/<owner>/<repo>[.git]"));
    }

    let mut segments = url.trim_start_matches("https://").split('/').skip(1);
    let owner = segments.next().unwrap_or_default();
    let repo = segments.next().unwrap_or_default();
    if matches!(owner, "." | "..") || matches!(repo, "." | "..") {
        return Err(invalid("path segments must not be relative"));
    }
    if canonical_repo_name(url).is_empty() || repo.strip_suffix(".git") == Some("") {
        return Err(invalid("repository name is empty"));
    }

    Ok(())
}

/// Derive the canonical repository name: final path segment, `.git` stripped.
///
/// This is the only place the join key is derived; every later stage and the
/// aggregator key on its output. Characters outside `[A-Za-z0-9._-]` are
/// replaced so the name is always safe as a directory component.
pub fn canonical_repo_name(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let name = last.strip_suffix(".git").unwrap_or(last);

    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// One repository assessment job. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    repo_url: String,
    repo_name: String,
    output_dir: PathBuf,
    /// Reason the URL failed validation, if it did.
    url_error: Option<String>,
}

impl JobSpec {
    /// Create a job, recording (not raising) URL validation failures.
    ///
    /// Used for sample-sheet rows: a malformed URL fails only that job's
    /// checkout, never the batch.
    pub fn new(repo_url: &str, output_root: &Path) -> Self {
        let repo_url = repo_url.trim().to_string();
        let url_error = validate_repo_url(&repo_url).err().map(|e| e.to_string());
        let mut repo_name = canonical_repo_name(&repo_url);
        if repo_name.is_empty() {
            repo_name = "unnamed".to_string();
        }
        let output_dir = output_root.join(&repo_name);

        Self {
            repo_url,
            repo_name,
            output_dir,
            url_error,
        }
    }

    /// Create a job, failing on a malformed URL.
    pub fn validated(repo_url: &str, output_root: &Path) -> Result<Self> {
        validate_repo_url(repo_url.trim())?;
        Ok(Self::new(repo_url, output_root))
    }

    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    /// Canonical join key for this job.
    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    /// Per-job artifact namespace.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn url_error(&self) -> Option<&str> {
        self.url_error.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.url_error.is_none()
    }
}
