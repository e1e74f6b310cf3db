//! OpenSASE Checkout - inventory reservation and payment reconciliation service

use anyhow::{Context, Result};
use opensase_checkout::{
    api::{self, AppState},
    bus::EventBus,
    config::{Config, LogFormat},
    payments::{BankGateway, EwalletGateway, Gateways, WalletGateway},
    services::{CleanupScheduler, Policy},
    store::{MemoryStore, PgStore, Store},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;

    let registry = tracing_subscriber::registry().with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));
    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(10).connect(url).await.context("connecting to postgres")?;
            sqlx::migrate!("./migrations").run(&db).await.context("running migrations")?;
            Arc::new(PgStore::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let gateways = Arc::new(Gateways::new(
        config.wallet.clone().map(WalletGateway::new),
        config.bank.clone().map(BankGateway::new),
        config.ewallet.clone().map(EwalletGateway::new),
    ));
    tracing::info!(providers = ?gateways.enabled(), "payment gateways");

    let bus = EventBus::connect(config.nats_url.as_deref()).await;
    let policy = Policy::from(&config);
    let sweeper = CleanupScheduler::new(store.clone(), bus.clone(), policy).spawn(config.cleanup_interval);
    let state = AppState::new(store, gateways, bus, policy, config.public_base_url.clone());
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!("OpenSASE Checkout listening on {}", addr);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    sweeper.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
