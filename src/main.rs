//! discoveryd
//!
//! Runs one discovery role per process.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────┐
//!   discovery.toml ────▶│ config (load, validate, watch → ArcSwap)      │
//!                       └───────────────┬──────────────────────────────┘
//!                                       ▼
//!                       ┌──────────────────────────────────────────────┐
//!                       │ Suit: backend (memory | cached proxy)         │
//!                       │       + resolver Builder                      │
//!                       └──────┬──────────────────────┬────────────────┘
//!                              │                      │
//!              ┌───────────────▼─────┐     ┌──────────▼──────────────┐
//!              │ proxy: sync loop +  │     │ health: sweep loop +    │
//!              │ config watch, disk  │     │ elastic probe pool      │
//!              │ mirror              │     │ (POST /health/ping)     │
//!              └─────────────────────┘     └─────────────────────────┘
//!
//!   reporter: answers POST /health/ping for the names this host serves
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use rpc_discovery::config::validation::validate_daemon_backend;
use rpc_discovery::config::watcher::shared;
use rpc_discovery::config::{load_config, ConfigWatcher, Settings, SharedSettings};
use rpc_discovery::discovery::MemoryConnector;
use rpc_discovery::health::{HealthReporter, HttpProber};
use rpc_discovery::lifecycle::{wait_for_signal, Shutdown};
use rpc_discovery::observability::{logging, metrics};
use rpc_discovery::Suit;

#[derive(Parser)]
#[command(name = "discoveryd")]
#[command(about = "Service discovery daemon: cached proxy, health engine, probe reporter", long_about = None)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "discovery.toml")]
    config: PathBuf,

    /// Resolver scheme
    #[arg(long, default_value = "discovery")]
    scheme: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the wrapped backend to disk until signalled
    Proxy,
    /// Probe every registered node and evict unreachable ones
    Health,
    /// Answer health probes for the given service names
    Reporter {
        #[arg(short, long, default_value = "0.0.0.0:8500")]
        bind: String,

        #[arg(required = true)]
        services: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_exists = cli.config.exists();
    let settings = if config_exists {
        load_config(&cli.config)?
    } else {
        Settings::default()
    };

    logging::init_logging(&settings.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        env = ?settings.env,
        backend = %settings.discovery,
        "discoveryd starting"
    );
    if !config_exists {
        tracing::warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    if settings.observability.metrics_enabled {
        if let Ok(addr) = settings.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let settings = shared(settings);
    let _watcher = if config_exists {
        match ConfigWatcher::new(&cli.config, settings.clone()).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Config hot reload disabled");
                None
            }
        }
    } else {
        None
    };

    let shutdown = Shutdown::new();
    match cli.command {
        Commands::Proxy => run_proxy(settings, &cli.scheme).await?,
        Commands::Health => run_health(settings, &cli.scheme, &shutdown).await?,
        Commands::Reporter { bind, services } => run_reporter(&bind, services, &shutdown).await?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_proxy(settings: SharedSettings, scheme: &str) -> Result<(), Box<dyn std::error::Error>> {
    validate_daemon_backend(&settings.load(), "proxy")?;
    let suit = Suit::init(settings, Arc::new(MemoryConnector::new()), scheme).await?;
    let proxy = suit
        .proxy()
        .cloned()
        .ok_or("the proxy role requires discovery = \"proxy\"")?;

    let sync = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.run().await })
    };

    wait_for_signal().await;
    suit.shutdown();
    sync.await?;
    Ok(())
}

async fn run_health(
    settings: SharedSettings,
    scheme: &str,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    validate_daemon_backend(&settings.load(), "health")?;
    let poll = settings.load().discovery_proxy.poll_interval();
    let suit = Arc::new(Suit::init(settings, Arc::new(MemoryConnector::new()), scheme).await?);

    let sync = suit.proxy().cloned().map(|proxy| {
        tokio::spawn(async move { proxy.run().await })
    });

    let checker = suit.health_checker(Arc::new(HttpProber::new()));
    let engine = {
        let checker = checker.clone();
        tokio::spawn(async move { checker.run().await })
    };

    // Keep pool size and interval in step with config reloads.
    let reload = {
        let suit = suit.clone();
        let checker = checker.clone();
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll.max(Duration::from_millis(100)));
            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    _ = ticker.tick() => suit.apply_health_settings(&checker),
                }
            }
        })
    };

    wait_for_signal().await;
    shutdown.trigger();
    checker.stop();
    suit.shutdown();

    engine.await?;
    reload.await?;
    if let Some(sync) = sync {
        sync.await?;
    }
    Ok(())
}

async fn run_reporter(
    bind: &str,
    services: Vec<String>,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(bind).await?;
    let server = tokio::spawn(HealthReporter::new(services).serve(listener, shutdown.subscribe()));

    wait_for_signal().await;
    shutdown.trigger();
    server.await??;
    Ok(())
}
