//! Meridian node entry point.
//!
//! Starts a routing node with configuration from a TOML file or defaults.

// Some node accessors are only exercised by tests.
#![allow(dead_code)]

mod api;
mod config;
mod node;
mod transport;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::MeridianConfig;
use node::MeridianNode;

/// Meridian Node
#[derive(Parser, Debug)]
#[command(name = "meridian-node", version, about = "Meridian routing node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "meridian.toml")]
    config: PathBuf,

    /// Override the node's own address.
    #[arg(long)]
    address: Option<String>,

    /// Override the API port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle --init flag
    if args.init {
        init_tracing(args.log_level.as_deref().unwrap_or("info"), "text");
        let config = MeridianConfig::default();
        config.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "wrote default config");
        return Ok(());
    }

    // Load configuration
    let mut config = MeridianConfig::load(&args.config)?;

    // Apply CLI overrides
    if let Some(address) = args.address {
        config.node.address = address;
    }
    if let Some(api_port) = args.api_port {
        config.api.port = api_port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging.level, &config.logging.format);
    tracing::info!("Meridian Node v{}", env!("CARGO_PKG_VERSION"));

    // Create and start the node
    let mut node = MeridianNode::new(config)?;
    node.start().await?;

    // Set up graceful shutdown on SIGINT
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("received shutdown signal");
    };

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "node event loop error");
            }
        }
        _ = shutdown => {
            tracing::info!("initiating graceful shutdown");
        }
    }

    node.shutdown().await?;
    tracing::info!("Meridian node exited cleanly");
    Ok(())
}
