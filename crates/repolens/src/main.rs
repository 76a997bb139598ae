//! RepoLens - Repository quality assessment pipeline.

use clap::{Parser, Subcommand, ValueEnum};
use repolens_pipeline::config::{check_required_tools, ConfigError, Params, PipelineConfig};
use repolens_pipeline::{expand_jobs, rebuild_report, Orchestrator, StageContext};
use repolens_stages::LocalExecutor;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "repolens")]
#[command(
    author,
    version,
    about = "Assess repository quality: checks, metrics, tests, rubric and optional AI narrative"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess one repository or every repository of a sample sheet
    Run {
        /// Repository URL (https://host/owner/repo[.git])
        #[arg(long)]
        repo_url: Option<String>,

        /// CSV file with a repo_url column
        #[arg(long)]
        sample_sheet: Option<PathBuf>,

        /// Output directory [default: results]
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// YAML parameters file; command-line flags take precedence
        #[arg(long)]
        params_file: Option<PathBuf>,

        /// Upload each job's metrics to Synapse (needs SYNAPSE_AUTH_TOKEN).
        /// Pass `false` to override the params file
        #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
        upload_to_synapse: Option<bool>,

        /// Synapse folder receiving the per-repository folders
        #[arg(long)]
        synapse_folder_id: Option<String>,

        /// Interpret results with the OpenAI API (needs OPENAI_API_KEY).
        /// Pass `false` to override the params file
        #[arg(long, num_args = 0..=1, default_missing_value = "true", value_name = "BOOL")]
        use_gpt: Option<bool>,

        /// Interpret results with a Synapse agent (needs SYNAPSE_AUTH_TOKEN)
        #[arg(long)]
        synapse_agent_id: Option<String>,

        /// OpenAI model for --use-gpt [default: gpt-4o-mini]
        #[arg(long)]
        openai_model: Option<String>,

        /// Maximum number of repositories assessed at once [default: 4]
        #[arg(long)]
        max_parallel_jobs: Option<usize>,

        /// Timeout for each external tool, in seconds [default: 1800]
        #[arg(long)]
        tool_timeout_secs: Option<u64>,

        /// Timeout for the narrative request, in seconds [default: 300]
        #[arg(long)]
        narrative_timeout_secs: Option<u64>,

        /// Fast local directory for the metrics analyzer's copy of each repository
        #[arg(long)]
        scratch_dir: Option<PathBuf>,

        /// Metrics analyzer command; {repo} is replaced by the repository path
        #[arg(long)]
        metrics_command: Option<String>,
    },

    /// Rebuild the consolidated report from an existing output directory
    Report {
        /// Output directory of a previous run
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with((!json).then(|| fmt::layer().with_target(false)))
        .with(json.then(|| fmt::layer().json()))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// 2 for configuration problems, 1 for anything else.
fn exit_code(e: &anyhow::Error) -> u8 {
    let is_config = e.downcast_ref::<ConfigError>().is_some()
        || matches!(e.downcast_ref::<repolens_common::Error>(), Some(repolens_common::Error::Config(_)));
    if is_config {
        2
    } else {
        1
    }
}

async fn execute(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            repo_url,
            sample_sheet,
            output_dir,
            params_file,
            upload_to_synapse,
            synapse_folder_id,
            use_gpt,
            synapse_agent_id,
            openai_model,
            max_parallel_jobs,
            tool_timeout_secs,
            narrative_timeout_secs,
            scratch_dir,
            metrics_command,
        } => {
            let flags = Params {
                repo_url,
                sample_sheet,
                output_dir,
                upload_to_synapse,
                synapse_folder_id,
                use_gpt,
                synapse_agent_id,
                max_parallel_jobs,
                tool_timeout_secs,
                narrative_timeout_secs,
                scratch_dir,
                metrics_command,
                openai_model,
            };
            let params = match params_file {
                Some(path) => Params::from_yaml_file(&path)?.overlay(flags),
                None => flags,
            };

            // Step 1: Validate configuration and input
            let config = PipelineConfig::resolve(params)?;
            let jobs = expand_jobs(&config.input, &config.output_dir)?;
            check_required_tools(&config.required_tools())?;
            info!("Assessing {} repository(ies) into {:?}", jobs.len(), config.output_dir);

            // Step 2: Run every job and aggregate
            let ctx = StageContext::from_config(&config, Arc::new(LocalExecutor::new()));
            let orchestrator = Orchestrator::new(ctx, &config.output_dir, config.max_parallel_jobs)?;
            let batch = orchestrator.run(jobs).await?;

            info!(
                "Done: {} repositories, {} scored, {} degraded",
                batch.report.summary.total, batch.report.summary.scored, batch.report.summary.degraded
            );
        }

        Commands::Report { output_dir } => {
            info!("Rebuilding consolidated report in {:?}", output_dir);
            let report = rebuild_report(&output_dir).await?;
            info!("Report rebuilt with {} rows", report.rows.len());
        }
    }

    Ok(())
}
