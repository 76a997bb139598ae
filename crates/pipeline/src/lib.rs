//! Orchestration core for repolens.
//!
//! Turns a validated configuration into a set of jobs, runs each job's stage
//! graph, and aggregates the terminal results into the consolidated report.

pub mod aggregate;
pub mod artifacts;
pub mod config;
pub mod graph;
pub mod orchestrator;
pub mod scheduler;
pub mod sheet;

pub use aggregate::{build_report, rebuild_report, JobRecord};
pub use artifacts::JobArtifacts;
pub use config::{check_required_tools, ConfigError, JobInput, Params, PipelineConfig};
pub use graph::{Capabilities, LaunchPolicy, StageGraph};
pub use orchestrator::{BatchOutcome, Orchestrator};
pub use scheduler::{JobOutcome, JobRunner, Publisher, StageContext, StageOutput};
pub use sheet::expand_jobs;
