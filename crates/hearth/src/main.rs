//! Hearth Hub
//!
//! Hosts the plugin broker, the plugin registry and the device state pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hearth::{Hub, HubConfig, load_config};
use hearth_bus::{EventBus, TcpBroker, TopicRouter};

/// Hearth Home Automation Hub
#[derive(Parser, Debug)]
#[command(name = "hearth")]
#[command(about = "Hearth Home Automation Hub", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker listen address, overrides the configuration
    #[arg(long)]
    broker: Option<String>,

    /// Device database path, or "memory"
    #[arg(long)]
    database: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(broker) = args.broker {
        config.broker_addr = broker;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    config.validate()?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Hearth hub v{}", env!("CARGO_PKG_VERSION"));

    run(config).await?;

    info!("Hub shutdown complete");
    Ok(())
}

async fn run(config: HubConfig) -> Result<()> {
    let router = TopicRouter::with_capacity(config.router_capacity);
    let broker = TcpBroker::bind(&config.broker_addr, Arc::new(router))
        .await
        .with_context(|| format!("Failed to bind broker on {}", config.broker_addr))?;
    info!("Broker listening on {}", broker.local_addr()?);

    let repository = Hub::open_repository(&config)?;
    let hub = Hub::start(
        EventBus::new(broker.transport()),
        repository,
        config.command_timeout(),
    )
    .await?;

    let shutdown = CancellationToken::new();
    let broker_task = tokio::spawn(broker.run(shutdown.clone()));

    shutdown_signal().await;

    info!("Shutting down...");
    hub.shutdown();
    shutdown.cancel();
    if let Err(e) = broker_task.await {
        warn!("Broker task ended abnormally: {}", e);
    }

    let connected = hub.registry().len();
    if connected > 0 {
        info!(plugins = connected, "Plugins still registered at shutdown");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
