use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use beacon::config::Config;
use beacon::deploy::{self, DeployConfig};
use beacon::monitor::Monitor;

const DEFAULT_MONITOR_CONFIG: &str = "beacon.monitor.yml";

#[derive(Parser, Debug)]
#[command(name = "beacon", version, about = "Lightweight deploy and monitoring agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the monitoring agent
    Monitor {
        /// Path to the monitor configuration file
        config: Option<PathBuf>,
    },
    /// Run the deploy agent (configured via BEACON_* environment variables)
    Deploy,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    match cli.command {
        Commands::Monitor { config } => {
            let path = config.unwrap_or_else(|| PathBuf::from(DEFAULT_MONITOR_CONFIG));
            let config = Config::load(&path)?;
            let monitor = Monitor::new(config)?;
            monitor.run(shutdown).await;
        }
        Commands::Deploy => {
            let config = DeployConfig::from_env()?;
            deploy::run(config, shutdown).await?;
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Cancel the root token on SIGINT or SIGTERM
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install interrupt handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("interrupt received, shutting down"),
        _ = terminate => info!("terminate received, shutting down"),
    }
    shutdown.cancel();
}
