use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use clusterpool::config;

#[derive(Parser)]
#[command(name = "clusterpool")]
#[command(version, about = "Connection pooling across the nodes of a cluster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (defaults to CLUSTERPOOL_* environment variables)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show per-node connection counts
    Nodes,

    /// Show running statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Acquire and release from concurrent workers
    Soak {
        /// Number of concurrent workers
        #[arg(long, default_value = "10")]
        workers: usize,

        /// Test duration in seconds
        #[arg(long, default_value = "10")]
        duration: u64,

        /// How long each connection is held, in milliseconds
        #[arg(long, default_value = "1")]
        hold_ms: u64,
    },

    /// Connect once to every configured node
    Probe,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref())?;

    if let Commands::Probe = cli.command {
        let failures = cli::commands::cmd_probe(&config).await?;
        if failures > 0 {
            anyhow::bail!("{} node(s) failed the probe", failures);
        }
        return Ok(());
    }

    let pool = cli::build_pool(&config).await?;

    let result = match cli.command {
        Commands::Nodes => cli::commands::cmd_nodes(&pool),
        Commands::Stats { json } => cli::commands::cmd_stats(&pool, json),
        Commands::Soak {
            workers,
            duration,
            hold_ms,
        } => cli::commands::cmd_soak(&pool, workers, duration, hold_ms).await,
        Commands::Probe => Ok(()),
    };

    pool.shutdown().await;
    result
}
