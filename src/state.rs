use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::availability::DriverAvailability;
use crate::engine::dispatch::{DispatchSettings, Dispatcher};
use crate::engine::lifecycle::Lifecycle;
use crate::engine::reclaim::Reclaimer;
use crate::error::AppError;
use crate::observability::metrics::Metrics;
use crate::store::{
    CoordinationStore, DriverCache, DriverDirectory, InMemoryCoordinationStore,
    InMemoryDriverDirectory, InMemoryRideStore, RideStore,
};

pub struct AppState {
    pub rides: Arc<dyn RideStore>,
    pub drivers: Arc<dyn DriverDirectory>,
    pub cache: DriverCache,
    pub availability: DriverAvailability,
    pub dispatcher: Dispatcher,
    pub lifecycle: Lifecycle,
    pub reclaimer: Reclaimer,
    pub dispatch_tx: mpsc::Sender<Uuid>,
    pub metrics: Metrics,
}

impl AppState {
    /// Fully in-memory state.
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<Uuid>) {
        Self::with_stores(
            config,
            Arc::new(InMemoryRideStore::new()),
            Arc::new(InMemoryDriverDirectory::new(config.search_radius_km)),
            Arc::new(InMemoryCoordinationStore::new()),
        )
    }

    pub fn with_stores(
        config: &Config,
        rides: Arc<dyn RideStore>,
        drivers: Arc<dyn DriverDirectory>,
        coordination: Arc<dyn CoordinationStore>,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size.max(1));
        let metrics = Metrics::new();
        let cache = DriverCache::new(coordination, config.lock_ttl());

        let availability =
            DriverAvailability::new(rides.clone(), drivers.clone(), cache.clone(), metrics.clone());

        let dispatcher = Dispatcher::new(
            rides.clone(),
            drivers.clone(),
            cache.clone(),
            availability.clone(),
            DispatchSettings::from_config(config),
            metrics.clone(),
        );
        let lifecycle = Lifecycle::new(
            rides.clone(),
            cache.clone(),
            availability.clone(),
            dispatcher.clone(),
            metrics.clone(),
        );
        let reclaimer = Reclaimer::new(
            rides.clone(),
            cache.clone(),
            availability.clone(),
            config.ride_timeout(),
            metrics.clone(),
        );

        (
            Self {
                rides,
                drivers,
                cache,
                availability,
                dispatcher,
                lifecycle,
                reclaimer,
                dispatch_tx,
                metrics,
            },
            dispatch_rx,
        )
    }
}

/// Redis when `REDIS_URL` is set and the `redis` feature is compiled in,
/// in-memory otherwise.
#[cfg(feature = "redis")]
pub async fn coordination_store(config: &Config) -> Result<Arc<dyn CoordinationStore>, AppError> {
    match &config.redis_url {
        Some(url) => {
            let store = crate::store::redis_store::RedisCoordinationStore::connect(url).await?;
            tracing::info!("using redis coordination store");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryCoordinationStore::new())),
    }
}

#[cfg(not(feature = "redis"))]
pub async fn coordination_store(config: &Config) -> Result<Arc<dyn CoordinationStore>, AppError> {
    if config.redis_url.is_some() {
        tracing::warn!(
            "REDIS_URL is set but the redis feature is disabled; using in-memory coordination store"
        );
    }
    Ok(Arc::new(InMemoryCoordinationStore::new()))
}
