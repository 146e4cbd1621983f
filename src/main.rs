// ABOUTME: Main entry point for the tether visitor-to-desk bridge
// ABOUTME: Initializes logging, config, token store, desk and host clients, and the HTTP server

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether::config::Config;
use tether::handoff::strategy_from_config;
use tether::host_client::HostClient;
use tether::server::start_server;
use tether::session::SessionOrchestrator;
use tether::tokens::TokenStore;
use tether::HttpDesk;

#[derive(Parser, Debug)]
#[command(name = "tether", about = "Bridges live-chat visitor rooms to a human agent desk")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "tether.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC! tether crashed with the following error:\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tether");

    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Arc::new(Config::load_from(&args.config)?);

    tracing::info!(
        desk = %config.desk.base_url,
        host = %config.host.base_url,
        handoff = ?config.handoff.mode,
        idle_enabled = config.idle.enabled,
        server_port = config.server.port,
        "Configuration loaded"
    );

    let store = TokenStore::new(&config.workspace.path)?;

    let desk = Arc::new(HttpDesk::new(config.desk.clone())?);
    let host_client = Arc::new(HostClient::new(config.host.clone())?);
    let relay: Arc<dyn tether::traits::RoomRelay> = host_client.clone();
    let host: Arc<dyn tether::traits::HostPlatform> = host_client;

    let handoff = strategy_from_config(&config, Arc::clone(&host), Arc::clone(&relay))
        .context("Failed to build hand-off strategy")?;

    let orchestrator = Arc::new(SessionOrchestrator::new(
        desk,
        relay,
        host,
        handoff,
        store.clone(),
        Arc::clone(&config),
    ));

    let metrics_handle =
        tether::metrics::init_metrics().context("Failed to initialize Prometheus metrics")?;

    // Seed the active-session gauge from whatever survived a restart
    let live = store.list_all().map(|r| r.len()).unwrap_or(0);
    tether::metrics::set_active_sessions(live as u64);
    if live > 0 {
        tracing::info!(count = live, "Found live sessions from a previous run");
    }

    start_server(config, orchestrator, metrics_handle).await
}
