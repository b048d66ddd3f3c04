//! gnat Server
//!
//! A standalone broker that accepts client connections and routes published
//! messages to subscribers.

use anyhow::{Context, Result};
use clap::Parser;
use gnat_broker::{Broker, BrokerConfig};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gnat-server")]
#[command(about = "gnat publish/subscribe broker")]
#[command(version)]
struct Cli {
    /// Config file path (TOML)
    #[arg(short, long, env = "GNAT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Server name announced in INFO, overrides the config file
    #[arg(short, long)]
    name: Option<String>,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Milliseconds a client has to answer the initial PING
    #[arg(long)]
    pong_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Load the config file, if any, and apply command line overrides
    fn broker_config(&self) -> Result<BrokerConfig> {
        let mut config = match &self.config {
            Some(path) => BrokerConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => BrokerConfig::default(),
        };

        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(timeout) = self.pong_timeout_ms {
            config.pong_timeout_ms = timeout;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    let config = cli.broker_config()?;
    let listen = config.listen.clone();

    info!("Starting gnat server v{}", gnat_core::VERSION);
    info!("Listening on: {}", listen);

    let broker = Broker::new(config);
    let serving = broker.clone();
    let server = tokio::spawn(async move { serving.serve(&listen).await });

    tokio::select! {
        result = server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Server error: {}", e);
                    return Err(e).context("Broker failed");
                }
                Err(e) => return Err(e).context("Broker task panicked"),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl+c")?;
            info!("Received shutdown signal");
            broker.stop();
        }
    }

    info!(
        connections = broker.connection_count(),
        subscriptions = broker.subscription_count(),
        "Server stopped"
    );
    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}
