use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use alfred_bus::{Event, EventBus, EventType};
use alfred_channels::channel::handler_fn;
use alfred_channels::{
    discord::DiscordChannel, googlechat::GoogleChatChannel, http::HttpChannel, irc::IrcChannel,
    matrix::MatrixChannel, signal::SignalChannel, slack::SlackChannel, teams::TeamsChannel,
    telegram::TelegramChannel, whatsapp::WhatsAppChannel, ChannelManager,
};
use alfred_core::config::AlfredConfig;
use alfred_core::types::{InboundMessage, RequestContext, DEFAULT_TENANT};
use alfred_process::ProcessManager;
use alfred_router::Router;
use alfred_sessions::SessionManager;
use alfred_tenants::TenantStore;

mod app;
mod auth;
mod defaults;
mod handlers;
mod http;
mod metrics;
mod rbac;
mod ws;

use app::AppState;
use defaults::{LoopbackAgent, NoCron, NoNodes, NoPlugins, NoTools, UnavailableMemory};
use metrics::Metrics;

#[derive(Parser)]
#[command(name = "alfred-gateway", about = "Multi-channel agent gateway")]
struct Cli {
    /// Path to alfred.toml (default: ~/.alfred/alfred.toml).
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (the default).
    Serve,
    /// Run one message through the local pipeline and print the reply.
    Send {
        message: String,
        #[arg(long, default_value = "cli")]
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alfred_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AlfredConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        AlfredConfig::default()
    });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Send { message, session } => run_send(config, message, session).await,
        Command::Serve => run_serve(config).await,
    }
}

/// One-shot local turn, for scripting and smoke tests.
async fn run_send(config: AlfredConfig, message: String, session: String) -> anyhow::Result<()> {
    let bus = EventBus::new();
    let sessions = Arc::new(SessionManager::new(&config.sessions.dir)?);
    let router = Router::new(sessions, Arc::new(LoopbackAgent), bus.clone());

    let ctx = RequestContext::new(DEFAULT_TENANT);
    let msg = InboundMessage::new("cli", &session, "cli", &message);
    let outbound = router.handle(&ctx, msg).await?;
    println!("{}", frame_response(&outbound.rendered_content()));

    bus.close().await;
    Ok(())
}

/// Wrap the reply in fixed sentinels when the caller asked for marker
/// framing (`ALFREDAI_CLI_RESPONSE_MARKERS`), so scripts can cut the reply
/// out of mixed log output.
fn frame_response(text: &str) -> String {
    let enabled = std::env::var("ALFREDAI_CLI_RESPONSE_MARKERS")
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false);
    if enabled {
        format!("<<ALFRED_RESPONSE>>\n{text}\n<<END_RESPONSE>>")
    } else {
        text.to_string()
    }
}

async fn run_serve(config: AlfredConfig) -> anyhow::Result<()> {
    let bus = EventBus::new();
    let gateway_metrics = Metrics::init();

    let sessions = Arc::new(SessionManager::new(&config.sessions.dir)?);
    let tenants = Arc::new(TenantStore::open(&config.tenants.db_path)?);
    let processes = ProcessManager::new(config.process.clone(), bus.clone());
    let router = Arc::new(Router::new(
        Arc::clone(&sessions),
        Arc::new(LoopbackAgent),
        bus.clone(),
    ));
    let channels = Arc::new(build_channels(&config));

    let state = Arc::new(AppState {
        config,
        bus,
        router,
        sessions,
        tenants,
        processes,
        channels,
        memory: Arc::new(UnavailableMemory),
        tools: Arc::new(NoTools),
        cron: Arc::new(NoCron),
        nodes: Arc::new(NoNodes),
        plugins: Arc::new(NoPlugins),
        connections: DashMap::new(),
        conn_seq: AtomicU64::new(0),
        active_requests: DashMap::new(),
        metrics: gateway_metrics,
        started_at: Instant::now(),
        shutdown: CancellationToken::new(),
    });

    state.processes.spawn_ttl_sweeper(state.shutdown.clone());
    let forwarder = ws::forward::start(&state);

    // Every channel dispatches into the shared router; replies travel back
    // on the channel that delivered the inbound.
    let dispatch_router = Arc::clone(&state.router);
    let handler = handler_fn(move |ctx, msg| {
        let router = Arc::clone(&dispatch_router);
        async move { router.handle(&ctx, msg).await }
    });
    state.channels.start_all(handler).await;
    for name in state.channels.names() {
        state.bus.publish(Event::new(
            EventType::ChannelStarted,
            serde_json::json!({ "channel": name }),
        ));
    }

    let addr: SocketAddr = format!(
        "{}:{}",
        state.config.gateway.bind, state.config.gateway.port
    )
    .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "alfred gateway listening");

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app::build_router(Arc::clone(&state)))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_state.shutdown.cancel();
            // Grace period for in-flight RPC handlers and WS teardown.
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await?;

    forwarder.unsubscribe();
    state.channels.stop_all().await;
    for name in state.channels.names() {
        state.bus.publish(Event::new(
            EventType::ChannelStopped,
            serde_json::json!({ "channel": name }),
        ));
    }
    state.bus.close().await;
    info!("alfred gateway stopped");
    Ok(())
}

/// Register an adapter for every configured channel section.
fn build_channels(config: &AlfredConfig) -> ChannelManager {
    let mut manager = ChannelManager::new();
    let texts = config.texts.clone();
    let channels = &config.channels;

    if let Some(c) = &channels.telegram {
        manager.register(Arc::new(TelegramChannel::new(c.clone(), texts.clone())));
    }
    if let Some(c) = &channels.discord {
        manager.register(Arc::new(DiscordChannel::new(c.clone(), texts.clone())));
    }
    if let Some(c) = &channels.slack {
        manager.register(Arc::new(SlackChannel::new(c.clone(), texts.clone())));
    }
    if let Some(c) = &channels.whatsapp {
        manager.register(Arc::new(WhatsAppChannel::new(c.clone(), texts.clone())));
    }
    if let Some(c) = &channels.matrix {
        manager.register(Arc::new(MatrixChannel::new(c.clone(), texts.clone())));
    }
    if let Some(c) = &channels.signal {
        manager.register(Arc::new(SignalChannel::new(c.clone(), texts.clone())));
    }
    if let Some(c) = &channels.irc {
        manager.register(Arc::new(IrcChannel::new(c.clone(), texts.clone())));
    }
    if let Some(c) = &channels.googlechat {
        manager.register(Arc::new(GoogleChatChannel::new(c.clone(), texts.clone())));
    }
    if let Some(c) = &channels.teams {
        manager.register(Arc::new(TeamsChannel::new(c.clone(), texts.clone())));
    }
    if let Some(c) = &channels.http {
        manager.register(Arc::new(HttpChannel::new(c.clone())));
    }

    manager
}
