//! Herald engine binary: wires the platform client, supervisor, session
//! store, and gateway together and serves until ctrl-c.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use herald_engine::worker::{
    DEFAULT_COOLDOWN_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_SEND_PACING_MS,
};
use herald_engine::{BlockListRegistry, WorkerSupervisor, WorkerTimings};
use herald_gateway::{run_gateway_server, GatewayConfig, GatewayState, StorePublisher};
use herald_platform::{PlatformClient, PlatformClientConfig};
use herald_state::store::{DEFAULT_SESSION_MAX_IDLE_MS, DEFAULT_SWEEP_INTERVAL_MS};
use herald_state::{spawn_session_sweeper, SessionStateStore, SessionStateStoreConfig};

#[derive(Debug, Parser)]
#[command(
    name = "herald",
    version,
    about = "Multi-profile outbound messaging automation engine"
)]
struct HeraldArgs {
    /// Address the gateway listens on.
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: String,
    /// Base URL of the platform API.
    #[arg(long, env = "HERALD_PLATFORM_API_BASE")]
    platform_api_base: String,
    /// Bearer token for the platform API, issued out-of-band by the login
    /// subsystem.
    #[arg(long, env = "HERALD_PLATFORM_TOKEN")]
    platform_token: String,
    /// Optional clearance cookie forwarded with every platform call.
    #[arg(long, env = "HERALD_CLEARANCE_COOKIE")]
    clearance_cookie: Option<String>,
    /// Per-request timeout against the platform API.
    #[arg(long, default_value_t = 30_000)]
    request_timeout_ms: u64,
    /// Pause between successful sends of one worker.
    #[arg(long, default_value_t = DEFAULT_SEND_PACING_MS)]
    send_pacing_ms: u64,
    /// Pause after rate limits and timeouts, and between idle cycles.
    #[arg(long, default_value_t = DEFAULT_COOLDOWN_MS)]
    cooldown_ms: u64,
    /// Interval between online-presence pings while a worker runs.
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_INTERVAL_MS)]
    heartbeat_interval_ms: u64,
    /// Sessions idle past this threshold are evicted.
    #[arg(long, default_value_t = DEFAULT_SESSION_MAX_IDLE_MS)]
    session_max_idle_ms: u64,
    /// How often the idle-session sweep runs.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_MS)]
    sweep_interval_ms: u64,
    /// Control-plane rate-limit window.
    #[arg(long, default_value_t = 60)]
    rate_limit_window_seconds: u64,
    /// Requests allowed per principal per window.
    #[arg(long, default_value_t = 240)]
    rate_limit_max_requests: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = HeraldArgs::parse();
    run(args).await
}

async fn run(args: HeraldArgs) -> Result<()> {
    let client = Arc::new(
        PlatformClient::new(PlatformClientConfig {
            api_base: args.platform_api_base.clone(),
            bearer_token: args.platform_token.clone(),
            clearance_cookie: args.clearance_cookie.clone(),
            request_timeout_ms: args.request_timeout_ms,
        })
        .context("failed to build the platform client")?,
    );
    let store = Arc::new(SessionStateStore::new(SessionStateStoreConfig {
        max_session_idle_ms: args.session_max_idle_ms,
        sweep_interval_ms: args.sweep_interval_ms,
    }));
    let supervisor = Arc::new(WorkerSupervisor::new(
        Arc::clone(&client),
        Arc::new(BlockListRegistry::new()),
        Arc::new(StorePublisher::new(Arc::clone(&store))),
        WorkerTimings {
            send_pacing_ms: args.send_pacing_ms,
            cooldown_ms: args.cooldown_ms,
            heartbeat_interval_ms: args.heartbeat_interval_ms,
        },
    ));

    let (sweeper_shutdown_tx, sweeper_shutdown_rx) = watch::channel(false);
    let sweeper = spawn_session_sweeper(Arc::clone(&store), sweeper_shutdown_rx);

    let state = Arc::new(GatewayState::new(
        GatewayConfig {
            bind: args.bind.clone(),
            rate_limit_window_seconds: args.rate_limit_window_seconds,
            rate_limit_max_requests: args.rate_limit_max_requests,
        },
        supervisor,
        store,
        client,
    ));
    let serve_result = run_gateway_server(state).await;

    let _ = sweeper_shutdown_tx.send(true);
    let _ = sweeper.await;
    serve_result
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
