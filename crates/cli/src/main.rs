//! `orderflow-sim` - runs one order-processing simulation and prints its report.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use orderflow_core::{run_simulation, SimulationConfig, SimulationReport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "orderflow_core=info,orderflow_sim=info";

#[derive(Parser)]
#[command(name = "orderflow-sim")]
#[command(about = "Bounded worker pool order-processing simulation")]
#[command(version)]
struct Cli {
    /// TOML configuration file layered over the defaults
    #[arg(long, short, env = "ORDERFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Number of items to submit (overrides configuration)
    #[arg(long)]
    items: Option<u32>,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "ORDERFLOW_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to initialize JSON logging")?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_thread_names(true))
            .try_init()
            .context("failed to initialize logging")?;
    }
    Ok(())
}

fn print_report(report: &SimulationReport, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(report).context("failed to serialize report")?;
        println!("{rendered}");
    } else {
        println!("{report}");
    }
    Ok(())
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration
    fn apply_overrides(&self, config: &mut SimulationConfig) {
        if let Some(items) = self.items {
            config.workload.items = items;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let mut config = SimulationConfig::load(cli.config.as_deref())
        .context("failed to load simulation configuration")?;
    cli.apply_overrides(&mut config);

    tracing::info!(
        core_threads = config.pool.core_threads,
        max_threads = config.pool.max_threads,
        queue_capacity = config.pool.queue_capacity,
        items = config.workload.items,
        "Configuration loaded"
    );

    let report = run_simulation(config).context("simulation failed to start")?;
    print_report(&report, cli.json)
}
