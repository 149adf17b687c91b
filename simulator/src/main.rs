use anyhow::Result;
use clap::{Parser, Subcommand};
use kinsync_sim::{load_sync_config, run_simulation, run_stress, SimulatorConfig, StressConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// kinsync synchronization core simulator
#[derive(Parser, Debug)]
#[command(name = "kinsync-sim")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Optional TOML file with `SyncConfig` overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a seeded simulation with injected rejections and disconnects
    Simulate {
        /// Number of operations to simulate
        #[arg(long = "ops", default_value_t = 1_000)]
        operations: u64,

        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,

        #[arg(long, default_value_t = 3)]
        tenants: usize,

        /// Administrator sessions per tenant
        #[arg(long, default_value_t = 2)]
        sessions: usize,

        /// Chance of severing a session after each operation
        #[arg(long, default_value_t = 0.02)]
        disconnect_rate: f64,

        /// Stop at the first violation
        #[arg(long)]
        stop_on_violation: bool,
    },

    /// Race concurrent writers and report throughput
    Stress {
        #[arg(long, default_value_t = 4)]
        tenants: usize,

        /// Administrator sessions per tenant
        #[arg(long, default_value_t = 4)]
        sessions: usize,

        /// Operations across all writers
        #[arg(long = "ops", default_value_t = 5_000)]
        operations: u64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let sync = load_sync_config(cli.config.as_deref())?;

    let passed = match cli.command {
        Commands::Simulate {
            operations,
            seed,
            tenants,
            sessions,
            disconnect_rate,
            stop_on_violation,
        } => {
            println!("Running kinsync simulator...");
            println!("Operations: {operations}");
            println!("Seed: {seed}");
            println!();

            let config = SimulatorConfig {
                seed,
                total_operations: operations,
                tenants,
                sessions_per_tenant: sessions,
                disconnect_rate,
                stop_on_first_violation: stop_on_violation,
                sync,
                ..SimulatorConfig::default()
            };
            let report = run_simulation(config).await?;
            println!("{}", report.generate_text());
            report.passed()
        }
        Commands::Stress {
            tenants,
            sessions,
            operations,
        } => {
            println!("Running stress test...");
            println!("Tenants: {tenants}");
            println!("Sessions per tenant: {sessions}");
            println!();

            let config = StressConfig {
                tenants,
                sessions_per_tenant: sessions,
                total_operations: operations,
                sync,
                ..StressConfig::default()
            };
            let report = run_stress(config).await?;
            println!("{}", report.generate_text());
            report.passed()
        }
    };

    Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
