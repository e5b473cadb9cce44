use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use ride_dispatch::api;
use ride_dispatch::config::Config;
use ride_dispatch::engine::queue::run_dispatch_worker;
use ride_dispatch::engine::reclaim::run_reclaim_loop;
use ride_dispatch::error::AppError;
use ride_dispatch::state::{self, AppState};
use ride_dispatch::store::{InMemoryDriverDirectory, InMemoryRideStore};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let coordination = state::coordination_store(&config).await?;
    let (app_state, dispatch_rx) = AppState::with_stores(
        &config,
        Arc::new(InMemoryRideStore::new()),
        Arc::new(InMemoryDriverDirectory::new(config.search_radius_km)),
        coordination,
    );
    let shared_state = Arc::new(app_state);

    tokio::spawn(run_dispatch_worker(shared_state.clone(), dispatch_rx));
    tokio::spawn(run_reclaim_loop(
        shared_state.reclaimer.clone(),
        config.sweep_interval(),
    ));

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
