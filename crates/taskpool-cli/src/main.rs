mod plan;
mod simulate;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use taskpool_core::{PoolConfig, TaskPoolManager};
use tracing::info;

use crate::plan::Plan;
use crate::simulate::{SimulationOptions, run_plan};

#[derive(Parser)]
#[command(
    name = "taskpool",
    about = "Run a plan of tasks through the agent task pool with simulated workers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a plan, simulate workers until nothing can move, print metrics
    Run(RunArgs),

    /// Print an example plan to stdout
    SamplePlan,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Plan file (JSON: agents + tasks)
    #[arg(long)]
    plan: PathBuf,

    /// Pool configuration file (JSON); defaults apply when omitted
    #[arg(long, env = "TASKPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Probability that a simulated worker reports failure
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// Simulated work time per task, in milliseconds
    #[arg(long, default_value_t = 50)]
    work_ms: u64,

    /// Seed for the failure dice (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::SamplePlan => {
            println!("{}", serde_json::to_string_pretty(&Plan::sample())?);
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => PoolConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PoolConfig::default(),
    };
    let plan = Plan::from_file(&args.plan)?;

    let pool = TaskPoolManager::builder()
        .config(config)
        .build()
        .context("invalid pool configuration")?;

    let opts = SimulationOptions {
        failure_rate: args.failure_rate,
        work: Duration::from_millis(args.work_ms),
        seed: args.seed,
        timeout: Duration::from_secs(args.timeout_secs),
    };
    let metrics = run_plan(&pool, &plan, &opts).await?;
    info!(
        completed = metrics.counts.completed,
        failed = metrics.counts.failed,
        token_savings = metrics.token_savings,
        "simulation finished"
    );

    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
