//! ryg - Red-Yellow-Green TDD orchestration
//!
//! Drives an external agent command through test-first cycles.

use clap::{Parser, Subcommand};
use colored::Colorize;
use ryg::{
    FeatureResult, OrchestratorConfig, ProcessInvoker, RygError, TddFeature, TddOrchestrator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ryg")]
#[command(version)]
#[command(about = "Drive pluggable agents through Red-Yellow-Green TDD cycles", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "RYG_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive one feature through a TDD cycle
    Run {
        /// Feature description
        description: String,

        /// Agent command, invoked as `<cmd> <capability>` with JSON on stdin
        #[arg(short, long, env = "RYG_AGENT_CMD")]
        agent_cmd: String,

        /// Test criteria passed to the test writer (repeatable)
        #[arg(long = "criteria", value_name = "CRITERION")]
        criteria: Vec<String>,

        /// Feature id (derived from the description when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Attempts allowed per phase
        #[arg(long, env = "RYG_MAX_PHASE_RETRIES")]
        max_phase_retries: Option<u32>,

        /// Retries allowed per feature across all phases
        #[arg(long, env = "RYG_MAX_TOTAL_RETRIES")]
        max_total_retries: Option<u32>,

        /// Per-invocation timeout in seconds
        #[arg(long, env = "RYG_TIMEOUT_SECONDS")]
        timeout: Option<u64>,

        /// Require reviewer approval after YELLOW
        #[arg(long)]
        require_review: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved configuration
    Config {
        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "ryg=debug,info" } else { "ryg=info,warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(project: &Path, explicit: Option<&Path>) -> ryg::Result<OrchestratorConfig> {
    match explicit {
        Some(path) => OrchestratorConfig::load(path),
        None => OrchestratorConfig::discover(project),
    }
}

fn print_result(result: &FeatureResult) {
    let attempts = result.get_total_attempts();
    if result.success {
        println!(
            "{} {} completed ({} cycle(s), {} attempt(s), {:.1}s)",
            "✓".green().bold(),
            result.feature_id.cyan(),
            result.cycles.len(),
            attempts,
            result.total_duration_seconds
        );
    } else {
        println!(
            "{} {} failed ({} cycle(s), {} attempt(s), {:.1}s)",
            "✗".red().bold(),
            result.feature_id.cyan(),
            result.cycles.len(),
            attempts,
            result.total_duration_seconds
        );
        for error in &result.errors {
            println!("  {} {}", "-".dimmed(), error);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = match load_config(&cli.project, cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };

    match cli.command {
        Commands::Config { json } => {
            let report = config.report();
            let rendered = if json {
                serde_json::to_string_pretty(&config)?
            } else {
                toml::to_string_pretty(&config)?
            };
            println!("{}", rendered.trim_end());
            for warning in &report.warnings {
                eprintln!("{} {}", "Warning:".yellow().bold(), warning);
            }
            for error in &report.errors {
                eprintln!("{} {}", "Error:".red().bold(), error);
            }
            if let Err(e) = config.validate() {
                std::process::exit(e.exit_code());
            }
        }

        Commands::Run {
            description,
            agent_cmd,
            criteria,
            id,
            max_phase_retries,
            max_total_retries,
            timeout,
            require_review,
            json,
        } => {
            let mut config = config;
            if let Some(max) = max_phase_retries {
                config = config.with_max_phase_retries(max);
            }
            if let Some(max) = max_total_retries {
                config = config.with_max_total_retries(max);
            }
            if let Some(seconds) = timeout {
                config = config.with_timeout_seconds(seconds);
            }
            if require_review {
                config = config.with_review_approval(true);
            }
            if cli.verbose {
                config = config.with_verbose_output(true);
            }

            let Some(invoker) = ProcessInvoker::from_command_line(&agent_cmd) else {
                exit_with(&RygError::MissingInvoker);
            };
            let invoker = invoker.with_working_dir(&cli.project);

            let orchestrator = match TddOrchestrator::builder()
                .config(config)
                .invoker(Arc::new(invoker))
                .build()
            {
                Ok(orchestrator) => orchestrator,
                Err(e) => exit_with(&e),
            };

            let mut feature = TddFeature::new(description).with_criteria(criteria);
            if let Some(id) = id {
                feature = feature.with_id(id);
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling feature");
                    on_signal.cancel();
                }
            });

            info!(feature = %feature.id, "Running feature");
            let result = orchestrator
                .execute_feature_with_cancel(feature, cancel.clone())
                .await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }

            if cancel.is_cancelled() {
                exit_with(&RygError::Cancelled {
                    feature_id: result.feature_id,
                });
            }
            if !result.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn exit_with(error: &RygError) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), error);
    std::process::exit(error.exit_code());
}
