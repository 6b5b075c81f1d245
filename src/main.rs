//! feedsync
//!
//! Connects to a market-data feed, follows one instrument and logs what arrives.
//!
//! Usage:
//!   feedsync --symbol NIFTY --selector 1700000000
//!   feedsync --config feed.toml --feed chart --symbol BANKNIFTY --selector 5m
//!
//! Environment:
//!   FEEDSYNC_WS_URL / FEEDSYNC_REST_URL - Endpoints (override the config file)
//!   FEEDSYNC_SYMBOL / FEEDSYNC_SELECTOR - Instrument to follow
//!   RUST_LOG - Log filter (default: feedsync=debug)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use feedsync::{FeedKind, SyncClient, SyncConfig};

#[derive(Parser, Debug)]
#[command(name = "feedsync")]
#[command(about = "Real-time market data sync client with REST fallback")]
struct Args {
    /// TOML config file
    #[arg(long, env = "FEEDSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Feed kind (option_chain or chart)
    #[arg(long)]
    feed: Option<FeedKind>,

    /// Instrument symbol
    #[arg(long, env = "FEEDSYNC_SYMBOL", default_value = "NIFTY")]
    symbol: String,

    /// Expiry timestamp (option chain) or candle interval (chart)
    #[arg(long, env = "FEEDSYNC_SELECTOR")]
    selector: String,

    /// Status log interval in seconds
    #[arg(long, default_value = "30")]
    status_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SyncConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(feed) = args.feed {
        config.feed = feed;
    }
    config.validate().context("invalid configuration")?;

    info!("Starting feedsync");
    info!("  Feed: {}", config.feed);
    info!("  WS: {}", config.ws_url);
    info!("  REST: {}", config.rest_url);
    info!("  Instrument: {} @ {}", args.symbol, args.selector);

    let client = SyncClient::spawn(config)?;
    client.set_callback(|payload| {
        let bytes = serde_json::to_vec(&payload).map(|b| b.len()).unwrap_or(0);
        info!(bytes, "📈 data");
    });
    client.subscribe(args.symbol.clone(), args.selector.clone());
    client.connect();

    let mut status_tick = tokio::time::interval(Duration::from_secs(args.status_secs.max(1)));
    loop {
        tokio::select! {
            _ = status_tick.tick() => {
                let status = client.status();
                info!(
                    state = %status.state,
                    quality = %status.quality,
                    polling = status.polling,
                    subscription = ?status.current_subscription,
                    error = ?status.last_error,
                    "status"
                );
                info!("📊 {}", client.metrics().summary());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedsync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // cwd + parents first, then the crate root
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
