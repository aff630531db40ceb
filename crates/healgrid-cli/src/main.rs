//! healgrid — command-line front end for the self-healing control loop.
//!
//! ```text
//! healgrid policies --config heal.toml
//! healgrid check-config heal.toml
//! healgrid simulate --endpoint /api/v1/checkout --predicted-latency 600 --cpu 75
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "healgrid",
    about = "healgrid — predictive self-healing for API endpoints",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective policy set in evaluation order
    Policies {
        /// Config file (defaults to the built-in policies)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Parse and validate a config file, compiling every policy
    CheckConfig {
        path: PathBuf,
    },
    /// Run one prediction through the full loop against in-memory
    /// infrastructure and print the result and healing status.
    Simulate {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "/api/v1/checkout")]
        endpoint: String,
        #[arg(long, default_value = "600")]
        predicted_latency: f64,
        #[arg(long, default_value = "0.5")]
        risk_level: f64,
        /// Observed latency in ms
        #[arg(long, default_value = "480")]
        latency: f64,
        #[arg(long, default_value = "75")]
        cpu: f64,
        #[arg(long, default_value = "40")]
        memory: f64,
        #[arg(long, default_value = "0.02")]
        error_rate: f64,
        #[arg(long)]
        cache_hit_rate: Option<f64>,
        /// Instances running before the simulation
        #[arg(long, default_value = "2")]
        instances: u32,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,healgrid=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Policies { config } => commands::policies::run(config.as_deref()),
        Commands::CheckConfig { path } => commands::check::run(&path),
        Commands::Simulate {
            config,
            endpoint,
            predicted_latency,
            risk_level,
            latency,
            cpu,
            memory,
            error_rate,
            cache_hit_rate,
            instances,
        } => {
            let scenario = commands::simulate::Scenario {
                endpoint,
                predicted_latency,
                risk_level,
                latency_ms: latency,
                cpu_utilization: cpu,
                memory_utilization: memory,
                error_rate,
                cache_hit_rate,
                instances,
            };
            commands::simulate::run(config.as_deref(), scenario).await
        }
    }
}
