//! CLI for livelog
//!
//! Subcommands:
//! - `server`: run the broker (ingest + relay) and the subscription gateway
//! - `token`: mint a delivery token for a function, if anyone is watching it
//! - `emit`: ship one log line through the emission client (smoke tests)

use std::sync::Arc;

use clap::Parser;
use livelog::broker::PubSub;
use livelog::client::{Level, LogEmitter, WsShipper, prepare_delivery};
use livelog::config::{Settings, load_config};
use livelog::gateway::{self, GatewayState};
use livelog::presence::{PresenceCache, PresenceStore, SledPresenceStore};
use livelog::transport::{LogScope, mint_token};
use livelog::utils::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "livelog")]
enum Command {
    /// Start the broker and the subscription gateway
    Server,
    /// Print a delivery token for one function
    Token {
        #[arg(long)]
        subscription: String,
        #[arg(long)]
        boundary: String,
        #[arg(long)]
        function: String,
        /// Mint even when no viewer is attached
        #[arg(long)]
        force: bool,
    },
    /// Ship a single log line to the ingest endpoint
    Emit {
        /// Ingest WebSocket URL (default: ws://127.0.0.1:5002)
        #[arg(long, default_value = "ws://127.0.0.1:5002")]
        url: String,
        #[arg(long)]
        token: String,
        #[arg(long, default_value = "info")]
        level: Level,
        #[arg(long)]
        message: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let command = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            livelog::utils::logging::init(&Settings::default().log);
            error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    livelog::utils::logging::init(&settings.log);

    let result = match command {
        Command::Server => run_server(settings).await,
        Command::Token {
            subscription,
            boundary,
            function,
            force,
        } => run_token(&settings, LogScope::new(subscription, boundary, function), force),
        Command::Emit {
            url,
            token,
            level,
            message,
        } => run_emit(&settings, url, token, level, message).await,
    };

    if let Err(e) = result {
        error!("livelog failed: {}", e);
        std::process::exit(1);
    }
}

async fn run_server(settings: Settings) -> Result<()> {
    let shutdown = CancellationToken::new();

    let mut pubsub = PubSub::new(settings.clone());
    let addrs = pubsub.start().await?;

    let mut state = GatewayState::new(format!("ws://{}", addrs.relay), settings.gateway.clone())
        .with_shutdown(shutdown.clone());
    if settings.presence.enabled {
        let store: Arc<dyn PresenceStore> =
            Arc::new(SledPresenceStore::open(&settings.presence.db_path)?);
        state = state.with_presence(store);
    }

    let listener = TcpListener::bind(settings.server.gateway_addr()).await?;
    info!(addr = %listener.local_addr()?, "subscription gateway listening");
    let mut gateway = tokio::spawn(gateway::serve(listener, Arc::new(state)));

    tokio::select! {
        _ = &mut gateway => {
            error!("Gateway exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    shutdown.cancel();
    pubsub.stop().await?;
    if !gateway.is_finished() {
        let _ = gateway.await;
    }
    Ok(())
}

fn run_token(
    settings: &Settings,
    scope: LogScope,
    force: bool,
) -> Result<()> {
    let ingest_url = format!("ws://{}", settings.server.ingest_addr());

    if force {
        let token = mint_token(
            &scope,
            &settings.server.token_signing_key,
            std::time::Duration::from_secs(settings.emitter.token_expiry_secs),
        )?;
        println!("{token}");
        return Ok(());
    }

    let cache = PresenceCache::new(settings.presence.enabled);
    if cache.is_enabled() {
        let store = SledPresenceStore::open(&settings.presence.db_path)?;
        cache.poll_once(&store)?;
    }

    match prepare_delivery(&cache, settings, &scope, &ingest_url)? {
        Some(target) => println!("{}", target.token),
        None => info!("no active viewer for this function, no token minted"),
    }
    Ok(())
}

async fn run_emit(
    settings: &Settings,
    url: String,
    token: String,
    level: Level,
    message: String,
) -> Result<()> {
    let emitter = LogEmitter::new(WsShipper::new(url, token), &settings.emitter);
    emitter.write(level, message);
    if !emitter.finish().await {
        error!("log line could not be delivered in time");
    }
    Ok(())
}
