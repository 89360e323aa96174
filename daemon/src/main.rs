//! KeyBridge daemon — entry point for running the wallet request pipeline.
//!
//! Hosts all three execution contexts of the pipeline in one process: the
//! page bridge, the relay, and the background service, plus the approval
//! surface the user decides on. An embedding host drives the provider hub;
//! the surface and event store are reachable over HTTP.

mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use keybridge_background::{
    ApprovalGate, BackgroundService, PipelineConfig, PipelineMetrics, ShutdownController,
    WalletState,
};
use keybridge_provider::{BridgeConfig, PageBridge, PageChannel};
use keybridge_relay::Relay;
use keybridge_sdk::RemoteSdk;
use keybridge_store::EventStore;
use keybridge_store_lmdb::LmdbEventStore;
use keybridge_surface::{SurfaceServer, SurfaceState};

use logging::{init_logging, LogFormat};

/// Timeout for waiting on background tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "keybridge-daemon", about = "KeyBridge wallet pipeline daemon")]
struct Cli {
    /// Data directory for the event store.
    #[arg(long, env = "KEYBRIDGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Base URL of the local wallet-bridge daemon.
    #[arg(long, env = "KEYBRIDGE_BRIDGE_URL")]
    bridge_url: Option<String>,

    /// Port for the approval surface.
    #[arg(long, env = "KEYBRIDGE_SURFACE_PORT")]
    surface_port: Option<u16>,

    /// Seconds before an unanswered approval resolves as rejected.
    #[arg(long, env = "KEYBRIDGE_APPROVAL_TIMEOUT_SECS")]
    approval_timeout_secs: Option<u64>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, default_value = "info", env = "KEYBRIDGE_LOG_LEVEL")]
    log_level: String,

    /// Log format: "human" or "json".
    #[arg(long, env = "KEYBRIDGE_LOG_FORMAT")]
    log_format: Option<String>,

    /// Path to a TOML configuration file. If provided, file settings are
    /// used as the base; CLI flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the pipeline.
    Run,
    /// Print the effective configuration as TOML and exit.
    Config,
}

fn effective_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(
            path.to_str()
                .context("config path is not valid UTF-8")?,
        )
        .context("failed to load config file")?,
        None => PipelineConfig::default(),
    };

    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(bridge_url) = &cli.bridge_url {
        config.bridge_url = bridge_url.clone();
    }
    if let Some(port) = cli.surface_port {
        config.surface_port = port;
    }
    if let Some(secs) = cli.approval_timeout_secs {
        config.approval_timeout_secs = Some(secs);
    }
    config.log_level = cli.log_level.clone();
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = effective_config(&cli)?;

    match cli.command {
        Command::Config => {
            println!("{}", config.to_toml_string());
            Ok(())
        }
        Command::Run => run(config).await,
    }
}

async fn run(config: PipelineConfig) -> anyhow::Result<()> {
    init_logging(
        LogFormat::from_str_or_default(&config.log_format),
        &config.log_level,
    );
    info!(data_dir = %config.data_dir.display(), "starting keybridge daemon");

    // ── Shared subsystems ───────────────────────────────────────────────
    let store: Arc<dyn EventStore> = Arc::new(
        LmdbEventStore::open(&config.data_dir).context("failed to open event store")?,
    );
    let sdk = Arc::new(
        RemoteSdk::new(&config.bridge_url).context("failed to create wallet-bridge client")?,
    );
    let metrics = Arc::new(PipelineMetrics::new());
    let gate = Arc::new(ApprovalGate::new(
        store.clone(),
        metrics.clone(),
        config.approval_timeout_secs.map(Duration::from_secs),
    ));

    let wallet = Arc::new(WalletState::new());
    if let Err(e) = wallet.refresh(sdk.as_ref()).await {
        // The bridge may not be running yet; handlers surface the miss
        // per request.
        warn!("initial wallet refresh failed: {e}");
    }

    let shutdown = Arc::new(ShutdownController::new());

    // ── Background service ──────────────────────────────────────────────
    let service = BackgroundService::with_default_handlers(
        store.clone(),
        sdk,
        wallet,
        gate.clone(),
        metrics.clone(),
    );
    let (request_tx, request_rx) = mpsc::channel(config.channel_capacity);
    let service_handle = service.spawn(request_rx, shutdown.subscribe());

    // ── Relay and page bridge ───────────────────────────────────────────
    let (page_out_tx, page_out_rx) = mpsc::channel(config.channel_capacity);
    let (page_in_tx, page_in_rx) = mpsc::channel(config.channel_capacity);
    Relay::spawn(page_out_rx, page_in_tx, request_tx);

    let hub = PageBridge::spawn(
        BridgeConfig::default(),
        PageChannel {
            to_relay: page_out_tx,
            from_relay: page_in_rx,
        },
    );
    info!(
        chains = keybridge_types::ChainFamily::all().len(),
        rdns = %hub.metadata().rdns,
        "provider hub ready"
    );

    // ── Approval surface ────────────────────────────────────────────────
    let surface = SurfaceServer::new(
        config.surface_port,
        Arc::new(SurfaceState {
            store,
            gate,
            metrics,
            retention_ms: config.retention_ms(),
        }),
    );
    tokio::spawn(async move {
        if let Err(e) = surface.start().await {
            error!("approval surface failed: {e}");
        }
    });

    // ── Run until signalled ─────────────────────────────────────────────
    shutdown.wait_for_signal().await;
    drop(hub);

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, service_handle).await {
        Ok(_) => info!("background service stopped"),
        Err(_) => warn!("background service did not stop within the shutdown timeout"),
    }
    info!("keybridge daemon stopped");
    Ok(())
}
