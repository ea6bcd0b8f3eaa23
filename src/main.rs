use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tower_http::trace::{self, TraceLayer};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use request_telemetry::config::{Config, StorageBackend};
use request_telemetry::metrics::{scheduler, Aggregator, SampleBuffer};
use request_telemetry::storage::{MemoryStore, RedisStore, TelemetryStore};
use request_telemetry::{redis_client, server, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("request_telemetry=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();

    // ── 1. Storage ───────────────────────────────────────────────
    let store: Arc<dyn TelemetryStore> = match config.storage_backend {
        StorageBackend::Redis => {
            tracing::info!(url = %config.redis_url, "connecting to Redis");
            match redis_client::connect(&config.redis_url).await {
                Ok(conn) => Arc::new(RedisStore::new(conn, config.redis_key_prefix.clone())),
                Err(e) => {
                    tracing::error!(error = %e, "cannot connect to Redis");
                    std::process::exit(1);
                }
            }
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory store; telemetry is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // ── 2. Buffer + aggregator ───────────────────────────────────
    let buffer = Arc::new(SampleBuffer::new());
    let aggregator = Arc::new(
        Aggregator::new(buffer.clone(), store.clone())
            .with_outlier_factor(config.outlier_factor)
            .with_retention(config.retention()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tick_driver = scheduler::spawn(aggregator.clone(), shutdown_rx);

    // ── 3. Router ────────────────────────────────────────────────
    let state = Arc::new(AppState { buffer, store });
    let app = server::create_router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
            .on_response(
                trace::DefaultOnResponse::new()
                    .level(Level::INFO)
                    .latency_unit(tower_http::LatencyUnit::Millis),
            ),
    );

    // ── 4. Bind & serve ──────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "telemetry server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server exited with error");
    }

    // ── 5. Stop the tick driver, flush what is still buffered ────
    let _ = shutdown_tx.send(true);
    let _ = tick_driver.await;
    // Everything still buffered arrived after the last boundary, i.e. in
    // the current minute, which no scheduled tick has labelled yet
    let report = aggregator.run_minute_tick(Utc::now()).await;
    tracing::info!(samples = report.samples, "final flush complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
