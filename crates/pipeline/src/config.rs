//! Run configuration and pre-flight validation.
//!
//! Values come from an optional YAML params file overlaid by command-line
//! flags. Credentials are read from the environment only, and everything is
//! validated before any job is launched.

use repolens_stages::metrics::DEFAULT_METRICS_COMMAND;
use repolens_stages::narrative::{DEFAULT_NARRATIVE_TIMEOUT, DEFAULT_OPENAI_MODEL};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const SYNAPSE_AUTH_TOKEN_VAR: &str = "SYNAPSE_AUTH_TOKEN";

pub const DEFAULT_OUTPUT_DIR: &str = "results";
pub const DEFAULT_MAX_PARALLEL_JOBS: usize = 4;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 1800;

/// Fatal configuration problems. Reported before any job starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("either --repo-url or --sample-sheet is required")]
    MissingInput,

    #[error("--repo-url and --sample-sheet cannot be used together")]
    ConflictingInput,

    #[error("invalid --repo-url: {0}")]
    InvalidRepoUrl(String),

    #[error("sample sheet {path}: {reason}")]
    SampleSheet { path: PathBuf, reason: String },

    #[error("duplicate repository name '{name}' derived from: {urls}")]
    DuplicateRepoName { name: String, urls: String },

    #[error("--upload-to-synapse requires --synapse-folder-id")]
    MissingSynapseFolder,

    #[error("--use-gpt and --synapse-agent-id select different narrative backends; choose one")]
    ConflictingNarrative,

    #[error("{option} requires the {var} environment variable")]
    MissingCredential { option: &'static str, var: &'static str },

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("metrics command must not be empty")]
    EmptyMetricsCommand,

    #[error("params file {path}: {reason}")]
    ParamsFile { path: PathBuf, reason: String },

    #[error("required tool '{0}' was not found on PATH")]
    ToolNotFound(String),
}

/// A credential value. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Raw, unvalidated parameters. Every field is optional so a params file
/// and command-line flags can be layered.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Params {
    pub repo_url: Option<String>,
    pub sample_sheet: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub upload_to_synapse: Option<bool>,
    pub synapse_folder_id: Option<String>,
    pub use_gpt: Option<bool>,
    pub synapse_agent_id: Option<String>,
    pub max_parallel_jobs: Option<usize>,
    pub tool_timeout_secs: Option<u64>,
    pub narrative_timeout_secs: Option<u64>,
    pub scratch_dir: Option<PathBuf>,
    pub metrics_command: Option<String>,
    pub openai_model: Option<String>,
}

impl Params {
    /// Load parameters from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParamsFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParamsFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Overlay `overrides` on top of `self`; set fields in `overrides` win.
    pub fn overlay(self, overrides: Params) -> Params {
        Params {
            repo_url: overrides.repo_url.or(self.repo_url),
            sample_sheet: overrides.sample_sheet.or(self.sample_sheet),
            output_dir: overrides.output_dir.or(self.output_dir),
            upload_to_synapse: overrides.upload_to_synapse.or(self.upload_to_synapse),
            synapse_folder_id: overrides.synapse_folder_id.or(self.synapse_folder_id),
            use_gpt: overrides.use_gpt.or(self.use_gpt),
            synapse_agent_id: overrides.synapse_agent_id.or(self.synapse_agent_id),
            max_parallel_jobs: overrides.max_parallel_jobs.or(self.max_parallel_jobs),
            tool_timeout_secs: overrides.tool_timeout_secs.or(self.tool_timeout_secs),
            narrative_timeout_secs: overrides.narrative_timeout_secs.or(self.narrative_timeout_secs),
            scratch_dir: overrides.scratch_dir.or(self.scratch_dir),
            metrics_command: overrides.metrics_command.or(self.metrics_command),
            openai_model: overrides.openai_model.or(self.openai_model),
        }
    }
}

/// Where the batch's jobs come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobInput {
    SingleUrl(String),
    SampleSheet(PathBuf),
}

/// Narrative backend selection.
#[derive(Debug, Clone)]
pub enum NarrativeConfig {
    OpenAi { api_key: Secret, model: String },
    SynapseAgent { agent_id: String, auth_token: Secret },
}

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub folder_id: String,
    pub auth_token: Secret,
}

/// Validated configuration for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: JobInput,
    pub output_dir: PathBuf,
    pub narrative: Option<NarrativeConfig>,
    pub publish: Option<PublishConfig>,
    pub max_parallel_jobs: usize,
    pub tool_timeout: Duration,
    pub narrative_timeout: Duration,
    pub scratch_dir: Option<PathBuf>,
    pub metrics_command: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl PipelineConfig {
    /// Validate parameters, reading credentials from the process environment.
    pub fn resolve(params: Params) -> Result<Self, ConfigError> {
        Self::resolve_with_env(params, |var| std::env::var(var).ok())
    }

    /// Validate parameters with an explicit environment lookup.
    pub fn resolve_with_env(params: Params, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let credential = |option: &'static str, var: &'static str| {
            non_empty(env(var))
                .map(Secret::new)
                .ok_or(ConfigError::MissingCredential { option, var })
        };

        let input = match (non_empty(params.repo_url), params.sample_sheet) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingInput),
            (None, None) => return Err(ConfigError::MissingInput),
            (Some(url), None) => JobInput::SingleUrl(url),
            (None, Some(sheet)) => JobInput::SampleSheet(sheet),
        };

        let publish = if params.upload_to_synapse.unwrap_or(false) {
            let folder_id = non_empty(params.synapse_folder_id).ok_or(ConfigError::MissingSynapseFolder)?;
            Some(PublishConfig {
                folder_id,
                auth_token: credential("--upload-to-synapse", SYNAPSE_AUTH_TOKEN_VAR)?,
            })
        } else {
            None
        };

        let narrative = match (params.use_gpt.unwrap_or(false), non_empty(params.synapse_agent_id)) {
            (true, Some(_)) => return Err(ConfigError::ConflictingNarrative),
            (true, None) => Some(NarrativeConfig::OpenAi {
                api_key: credential("--use-gpt", OPENAI_API_KEY_VAR)?,
                model: non_empty(params.openai_model).unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            }),
            (false, Some(agent_id)) => Some(NarrativeConfig::SynapseAgent {
                agent_id,
                auth_token: credential("--synapse-agent-id", SYNAPSE_AUTH_TOKEN_VAR)?,
            }),
            (false, None) => None,
        };

        let max_parallel_jobs = params.max_parallel_jobs.unwrap_or(DEFAULT_MAX_PARALLEL_JOBS);
        if max_parallel_jobs == 0 {
            return Err(ConfigError::NotPositive("--max-parallel-jobs"));
        }
        let tool_timeout_secs = params.tool_timeout_secs.unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS);
        if tool_timeout_secs == 0 {
            return Err(ConfigError::NotPositive("--tool-timeout-secs"));
        }
        let narrative_timeout = match params.narrative_timeout_secs {
            Some(0) => return Err(ConfigError::NotPositive("--narrative-timeout-secs")),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_NARRATIVE_TIMEOUT,
        };

        let metrics_command = match params.metrics_command {
            Some(cmd) if cmd.trim().is_empty() => return Err(ConfigError::EmptyMetricsCommand),
            Some(cmd) => cmd,
            None => DEFAULT_METRICS_COMMAND.to_string(),
        };

        Ok(Self {
            input,
            output_dir: params.output_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            narrative,
            publish,
            max_parallel_jobs,
            tool_timeout: Duration::from_secs(tool_timeout_secs),
            narrative_timeout,
            scratch_dir: params.scratch_dir,
            metrics_command,
        })
    }

    /// External programs the run cannot start without.
    pub fn required_tools(&self) -> Vec<&'static str> {
        let mut tools = vec!["git"];
        if self.publish.is_some() {
            tools.push("synapse");
        }
        tools
    }
}

/// Fail unless every tool resolves on PATH.
pub fn check_required_tools(tools: &[&str]) -> Result<(), ConfigError> {
    for tool in tools {
        which::which(tool).map_err(|_| ConfigError::ToolNotFound(tool.to_string()))?;
    }
    Ok(())
}
