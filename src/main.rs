use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use volley::config::Config;
use volley::engine::{CapabilitySet, MetricsSink, PlanExecutor, Rate, RateLimiter, RunContext};
use volley::plan::{parse_plan_file, validate_plan};
use volley::telemetry::{init_telemetry, shutdown_telemetry, OtelConfig};

#[derive(Parser)]
#[command(name = "volley")]
#[command(about = "Multi-protocol load generation engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan YAML file
    Run {
        /// Path to plan YAML file
        file: PathBuf,
        /// Operations per second across all leaves
        #[arg(short, long)]
        rate: Option<f64>,
        /// Burst allowance for the rate limiter
        #[arg(short, long)]
        burst: Option<u64>,
    },
    /// Validate a plan YAML file
    Validate {
        /// Path to plan YAML file
        file: PathBuf,
    },
    /// List the protocols this build can drive
    Capabilities,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let provider = match init_telemetry(&OtelConfig::default()) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("failed to initialize telemetry: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = dispatch(cli).await;
    shutdown_telemetry(provider);

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error [{}]: {}", e.code(), e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> volley::Result<()> {
    match cli.command {
        Commands::Run { file, rate, burst } => run_plan(file, rate, burst).await,
        Commands::Validate { file } => {
            let plan = parse_plan_file(&file)?;
            validate_plan(&plan)?;
            println!(
                "plan '{}' is valid ({} stages, protocols: {})",
                plan.name,
                plan.stage_count(),
                plan.protocols()
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Ok(())
        }
        Commands::Capabilities => {
            for (protocol, description) in CapabilitySet::with_defaults().descriptions() {
                println!("{:<8} {}", protocol.as_str(), description);
            }
            Ok(())
        }
    }
}

async fn run_plan(file: PathBuf, rate: Option<f64>, burst: Option<u64>) -> volley::Result<()> {
    let config = Config::load();
    volley::metrics::init_metrics();

    let plan = parse_plan_file(&file)?;

    let mut executor = PlanExecutor::new(CapabilitySet::with_defaults());
    if let Some(rate) = rate.or(config.run.rate) {
        let mut rate = Rate::per_second(rate);
        if let Some(burst) = burst.or(config.run.burst) {
            rate = rate.with_burst(burst);
        }
        let limiter = RateLimiter::new(Some(rate)).with_sink(Arc::new(MetricsSink));
        executor = executor.with_rate_limiter(Arc::new(limiter));
    }

    let ctx = RunContext::new();
    let cancel = ctx.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    executor.execute(&ctx, &plan).await?;
    println!("plan '{}' completed", plan.name);
    Ok(())
}
