//! `steward` - webhook server for the Steward admin bot.

mod clients;
mod routes;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use steward_audit::AuditLogger;
use steward_core::{LoggingConfig, StewardConfig, StoreBackend, StoreConfig, SystemClock};
use steward_engine::{Engine, EngineDeps, ReplySink};
use steward_store::{MemoryStore, SharedStore, SqliteStore, TimedStore};
use tracing_subscriber::EnvFilter;

use clients::{HttpCompletionClient, HttpDomainService, HttpReplySink};
use routes::{AppState, create_router};

#[derive(Parser, Debug)]
#[command(name = "steward", version, about = "Chat-based shop administration bot")]
struct Cli {
    /// Path to steward.yaml. Defaults apply when the file does not exist.
    #[arg(long, env = "STEWARD_CONFIG", default_value = "steward.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = StewardConfig::load_or_default(&cli.config)?;
    init_tracing(&config.logging);
    tracing::info!(config = %cli.config.display(), "Configuration loaded");

    let clock = SystemClock::shared();
    let store = open_store(&config.store).await?;
    let audit = Arc::new(AuditLogger::new(
        config.audit.clone(),
        store.clone(),
        clock.clone(),
    )?);

    let engine = Engine::new(
        &config,
        EngineDeps {
            store,
            audit,
            completion: Arc::new(HttpCompletionClient::new(&config.classifier)?),
            domain: Arc::new(HttpDomainService::new(&config.domain)?),
            clock,
        },
    )?;
    tracing::info!(actions = engine.registry().len(), "Action registry built");

    let replies: Option<Arc<dyn ReplySink>> = match &config.outbound.base_url {
        Some(url) => Some(Arc::new(HttpReplySink::new(url, config.outbound.timeout_ms)?)),
        None => None,
    };
    let webhook_secret = std::env::var(&config.server.webhook_secret_env)
        .ok()
        .filter(|s| !s.is_empty());
    if webhook_secret.is_none() {
        tracing::warn!(
            env = %config.server.webhook_secret_env,
            "Webhook secret not set; accepting unauthenticated calls"
        );
    }

    let state = Arc::new(AppState {
        engine,
        replies,
        webhook_secret,
    });

    if let Some(secs) = config.server.sweep_interval_secs.filter(|s| *s > 0) {
        spawn_sweeper(state.clone(), Duration::from_secs(secs));
    }

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "steward listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("steward stopped");
    Ok(())
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(config: &StoreConfig) -> anyhow::Result<SharedStore> {
    let timeout = Duration::from_millis(config.timeout_ms);
    Ok(match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; state is lost on restart");
            Arc::new(TimedStore::new(MemoryStore::new(), timeout))
        }
        StoreBackend::Sqlite => {
            let store = SqliteStore::connect(&config.sqlite_path).await?;
            tracing::info!(path = %config.sqlite_path, "SQLite store opened");
            Arc::new(TimedStore::new(store, timeout))
        }
    })
}

fn spawn_sweeper(state: Arc<AppState>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = state.engine.sweep().await {
                tracing::error!(error = %e, "Scheduled sweep failed");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
