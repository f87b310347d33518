//! Equity ingest worker entrypoint. Bootstraps config/logging, brings the
//! control HTTP server up first (so a container orchestrator's liveness
//! probe passes during slower downstream initialisation), then wires
//! TSWriter, the two RealtimeFeed instances, and the Scheduler, and waits
//! for SIGTERM/SIGINT to run an orderly shutdown.

use anyhow::{Context, Result};
use equity_ingest_worker::config::Config;
use equity_ingest_worker::control::{self, AppState};
use equity_ingest_worker::market_status::MarketStatusChecker;
use equity_ingest_worker::news_store::NewsStore;
use equity_ingest_worker::object_store::{ObjectStore, S3ObjectStore};
use equity_ingest_worker::realtime::{FeedKind, RealtimeFeed};
use equity_ingest_worker::scheduler::Scheduler;
use equity_ingest_worker::secrets::{AwsSecretsManagerStore, SecretStore};
use equity_ingest_worker::tswriter::TSWriter;
use equity_ingest_worker::upstream::{MarketDataApi, MassiveRestClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal init error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    init_tracing(&config.log_level);

    info!("equity ingest worker starting");

    let http_client = reqwest::Client::builder()
        .timeout(equity_ingest_worker::config::HTTP_TIMEOUT)
        .build()
        .context("building HTTP client")?;

    let secrets: Arc<dyn SecretStore> =
        Arc::new(AwsSecretsManagerStore::from_config(&config.aws_region).await);

    let api_key = resolve_market_data_api_key(secrets.as_ref(), &config.api_keys_secret_arn).await;

    let rest_client = MassiveRestClient::new(&config);
    if let Some(key) = &api_key {
        rest_client.set_api_key(key.clone());
    }
    let upstream: Arc<dyn MarketDataApi> = Arc::new(rest_client);

    let market = Arc::new(MarketStatusChecker::new(http_client.clone(), config.massive_base_url.clone()));
    let writer = Arc::new(TSWriter::new(config.clone(), secrets.clone()));

    let object_store: Option<Arc<dyn ObjectStore>> = if config.has_object_store() {
        Some(Arc::new(S3ObjectStore::from_config(&config.aws_region).await))
    } else {
        None
    };
    let news_store = Arc::new(NewsStore::new(&config, object_store, writer.clone()));

    let fast_feed = RealtimeFeed::new(
        FeedKind::Fast,
        config.massive_ws_url.clone(),
        market.clone(),
        writer.clone(),
        upstream.clone(),
    );
    let delayed_feed = RealtimeFeed::new(
        FeedKind::Delayed,
        config.massive_delayed_ws_url.clone(),
        market.clone(),
        writer.clone(),
        upstream.clone(),
    );
    if let Some(key) = &api_key {
        fast_feed.set_api_key(key.clone());
        delayed_feed.set_api_key(key.clone());
    }

    let scheduler = Scheduler::new(
        config.default_watchlist.clone(),
        market.clone(),
        writer.clone(),
        news_store,
        upstream,
    );

    let app_state = Arc::new(AppState {
        fast_feed: fast_feed.clone(),
        delayed_feed: delayed_feed.clone(),
        scheduler: scheduler.clone(),
        started_at: Instant::now(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.health_check_port));
    let listener = TcpListener::bind(addr).await.context("binding control HTTP server")?;
    info!(%addr, "control server listening");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, control::router(app_state)).await {
            error!(error = %e, "control server error");
        }
    });

    // The health endpoint must answer before a slow or failing TSWriter
    // initialize() blocks anything else: CONFIG_MISSING degrades, it does
    // not abort startup.
    if let Err(e) = writer.initialize().await {
        warn!(error = %e, "TSWriter initialization failed, continuing degraded");
    }

    if config.enable_realtime {
        fast_feed.connect();
        delayed_feed.connect();
    }
    if config.enable_scheduler {
        scheduler.start().await.context("starting scheduler")?;
    }

    shutdown_signal().await;
    info!("shutdown signal received, draining");

    fast_feed.shutdown().await;
    delayed_feed.shutdown().await;
    if let Err(e) = scheduler.stop().await {
        warn!(error = %e, "scheduler stop reported an error");
    }
    writer.close().await;
    server.abort();

    info!("shutdown complete");
    Ok(())
}

/// Resolves the upstream vendor API key from the secret store. Any value
/// named `MASSIVE_API_KEY` or `ALPACA_API_KEY` is accepted: the vendor
/// contract this worker targets has shipped under both names historically.
async fn resolve_market_data_api_key(secrets: &dyn SecretStore, arn: &str) -> Option<String> {
    if arn.is_empty() {
        return None;
    }
    match secrets.get_secret(arn).await {
        Ok(values) => values
            .get("MASSIVE_API_KEY")
            .or_else(|| values.get("ALPACA_API_KEY"))
            .cloned(),
        Err(e) => {
            warn!(error = %e, "market data API key secret fetch failed, continuing unauthenticated");
            None
        }
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("equity_ingest_worker={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("installing Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
