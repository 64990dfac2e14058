//! Operator tool for the ArtVibe offline cache gateway.
//!
//! Runs the gateway outside a browser against the real network, keeping
//! cache generations in a JSON snapshot between runs.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache the manifest and activate the current generation
//! sw-cli install
//!
//! # Route requests through the gateway (cache first)
//! sw-cli fetch https://artvibestudio.store/style.css /images/avatar.webp
//!
//! # Preview the notification a push message produces
//! sw-cli push --payload '{"title":"Order Update","body":"Shipped","url":"/orders/1"}'
//!
//! # List cache generations and their entries
//! sw-cli inspect
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use artvibe_common::{init_logging, ArtVibeError, LogConfig, LogFormat, ResultExt};
use artvibe_net::{HttpFetcher, LoaderConfig, Request};
use artvibe_sw::{
    CacheStorage, GatewayConfig, GatewayHandle, GatewayWorker, OfflineGateway, ServiceWorkerEvent,
};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Parser)]
#[command(name = "sw-cli")]
#[command(about = "Operator tool for the ArtVibe offline cache gateway")]
struct Cli {
    /// Gateway config (JSON); the storefront defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache snapshot file
    #[arg(short, long, global = true, default_value = "sw-caches.json")]
    snapshot: PathBuf,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-cache the manifest into the current generation
    Install,

    /// Route URLs through the gateway
    Fetch {
        /// Absolute URLs, or paths relative to the configured origin
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Print the notification a push message would show
    Push {
        /// Push message body (JSON)
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// List cache generations and their entries
    Inspect,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(LogConfig::default().with_format(cli.log_format));

    if let Err(e) = run(cli).await {
        eprintln!("error [{}]: {e}", e.category());
        if e.is_retryable() {
            eprintln!("the network may be unreachable; try again later");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> artvibe_common::Result<()> {
    let config = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };

    let storage = CacheStorage::load_snapshot(&cli.snapshot)?.shared();

    if let Commands::Inspect = cli.command {
        let current = config.cache_name();
        let storage = storage.read().await;
        let names = storage.keys();
        if names.is_empty() {
            println!("no cache generations in {}", cli.snapshot.display());
        }
        for name in names {
            let marker = if name == current { " (current)" } else { "" };
            if let Some(cache) = storage.get(&name) {
                println!("{name}{marker}: {} entries", cache.len());
                for key in cache.keys() {
                    println!("  {key}");
                }
            }
        }
        return Ok(());
    }

    let fetcher = Arc::new(HttpFetcher::new(LoaderConfig::default())?);
    let (gateway, events) = OfflineGateway::new(config.clone(), fetcher)?;
    let event_log = log_events(events);
    let gateway = gateway.with_cache_storage(storage.clone());
    let handle = GatewayWorker::spawn(Arc::new(gateway));

    let result = execute(&handle, &config, cli.command).await;
    handle.shutdown().await;
    if let Err(e) = event_log.await {
        debug!(error = %e, "Event log task failed");
    }

    storage.read().await.save_snapshot(&cli.snapshot)?;
    debug!(snapshot = %cli.snapshot.display(), "Snapshot saved");
    result
}

/// Log gateway events until the gateway is dropped.
fn log_events(mut events: UnboundedReceiver<ServiceWorkerEvent>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0;
        while let Some(event) = events.recv().await {
            debug!(?event, "Gateway event");
            seen += 1;
        }
        seen
    })
}

async fn execute(
    handle: &GatewayHandle,
    config: &GatewayConfig,
    command: Commands,
) -> artvibe_common::Result<()> {
    match command {
        Commands::Install => {
            let outcome = handle.install().await?;
            println!(
                "installed {} ({} resources)",
                config.cache_name(),
                config.manifest.len()
            );
            match outcome.activation {
                Some(report) => {
                    println!("activated worker {}", report.worker.raw());
                    for name in report.deleted_caches {
                        println!("deleted old cache {name}");
                    }
                }
                None => println!("worker {} is waiting", outcome.worker.raw()),
            }
        }

        Commands::Fetch { urls } => {
            for url in urls {
                let url = config.resolve(&url)?;
                match handle.fetch(Request::get(url.clone())).await {
                    Ok(served) => println!(
                        "{} {:?} {} bytes {}",
                        served.response.status.as_u16(),
                        served.source,
                        served.response.body.len(),
                        url
                    ),
                    Err(e) => println!("failed {url}: {e}"),
                }
            }
        }

        Commands::Push { payload } => {
            let notification = handle.push(payload.map(Bytes::from)).await?;
            let json = serde_json::to_string_pretty(&notification).context("encode notification")?;
            println!("{json}");
        }

        Commands::Inspect => {
            return Err(ArtVibeError::InvalidArgument(
                "inspect does not run the gateway".to_string(),
            ))
        }
    }
    Ok(())
}
