//! Axum API server binary.

use std::net::SocketAddr;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vchat_api::{create_router, metrics, ApiConfig, AppState};
use vchat_orchestrator::OrchestratorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting vchat-api");

    let config = ApiConfig::from_env();
    let orchestrator_config = OrchestratorConfig::from_env();
    info!(
        "API config: host={}, port={}, worker={} {}",
        config.host,
        config.port,
        orchestrator_config.worker_program,
        orchestrator_config.worker_args.join(" ")
    );

    let state = AppState::new(config.clone(), orchestrator_config);
    if let Err(e) = state.orchestrator.check_worker() {
        warn!("Worker program not resolvable, submissions will fail: {}", e);
    }

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let orchestrator = std::sync::Arc::clone(&state.orchestrator);
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_addr()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let active = orchestrator.active_runs().await;
    if active > 0 {
        info!("Waiting for {} running worker(s)", active);
        if !orchestrator.wait_for_idle(config.shutdown_grace).await {
            warn!(
                "Workers still running after {:?}: {:?}",
                config.shutdown_grace,
                orchestrator.running_jobs().await
            );
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
