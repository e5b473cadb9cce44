//! Driver availability writes that follow a committed ride transition.
//!
//! The ride write always lands first. When the driver write behind it fails,
//! the driver id is parked and every reclamation sweep retries it under the
//! driver lock until it lands, so no driver stays `on_trip` without a ride
//! holding them. Retried releases do not touch the cached status.

use std::sync::Arc;

use dashmap::DashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{Driver, DriverStatus};
use crate::observability::metrics::Metrics;
use crate::store::{DriverCache, DriverDirectory, RideStore};

#[derive(Clone)]
pub struct DriverAvailability {
    rides: Arc<dyn RideStore>,
    drivers: Arc<dyn DriverDirectory>,
    cache: DriverCache,
    parked: Arc<DashSet<Uuid>>,
    metrics: Metrics,
}

impl DriverAvailability {
    pub fn new(
        rides: Arc<dyn RideStore>,
        drivers: Arc<dyn DriverDirectory>,
        cache: DriverCache,
        metrics: Metrics,
    ) -> Self {
        Self {
            rides,
            drivers,
            cache,
            parked: Arc::new(DashSet::new()),
            metrics,
        }
    }

    /// Sets the driver available and caches the new status. A failed
    /// directory write parks the driver and is returned.
    pub async fn release(&self, driver_id: Uuid) -> Result<(), AppError> {
        self.settle(driver_id, self.mark_available(driver_id, true).await)
    }

    /// Like [`release`](Self::release) but leaves the cached status alone.
    pub async fn reset(&self, driver_id: Uuid) -> Result<(), AppError> {
        self.settle(driver_id, self.mark_available(driver_id, false).await)
    }

    pub fn is_parked(&self, driver_id: Uuid) -> bool {
        self.parked.contains(&driver_id)
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Retries every parked release. Returns how many landed; the rest stay
    /// parked for the next call.
    pub async fn retry_parked(&self) -> usize {
        let parked: Vec<Uuid> = self.parked.iter().map(|id| *id).collect();
        let mut released = 0;

        for driver_id in parked {
            match self.retry(driver_id).await {
                Ok(true) => {
                    self.unpark(driver_id);
                    released += 1;
                }
                Ok(false) => {
                    debug!(driver_id = %driver_id, "driver lock held; parked release kept")
                }
                Err(err) => {
                    warn!(driver_id = %driver_id, error = %err, "parked driver release failed again")
                }
            }
        }

        released
    }

    /// Operator status change. Refused while a dispatch holds the driver's
    /// lock, and refused for anything but `on_trip` while the driver holds an
    /// active ride.
    pub async fn set_status(&self, driver_id: Uuid, status: DriverStatus) -> Result<Driver, AppError> {
        if !self.cache.acquire_lock(driver_id).await? {
            return Err(AppError::InvalidState(format!(
                "driver {driver_id} is being dispatched"
            )));
        }

        let result = self.set_status_locked(driver_id, status).await;
        self.unlock(driver_id).await;
        result
    }

    async fn set_status_locked(
        &self,
        driver_id: Uuid,
        status: DriverStatus,
    ) -> Result<Driver, AppError> {
        if status != DriverStatus::OnTrip {
            if let Some(ride) = self.rides.find_active_by_driver(driver_id).await? {
                return Err(AppError::InvalidState(format!(
                    "driver {driver_id} holds ride {} in state {:?}",
                    ride.id, ride.status
                )));
            }
        }

        let driver = self
            .drivers
            .set_status(driver_id, status)
            .await?
            .ok_or_else(|| AppError::driver_not_found(driver_id))?;
        self.unpark(driver_id);

        if let Err(err) = self.cache.cache_status(driver_id, driver.status).await {
            warn!(driver_id = %driver_id, error = %err, "failed to cache driver status");
        }
        Ok(driver)
    }

    async fn retry(&self, driver_id: Uuid) -> Result<bool, AppError> {
        if !self.cache.acquire_lock(driver_id).await? {
            return Ok(false);
        }

        let result = self.retry_locked(driver_id).await;
        self.unlock(driver_id).await;
        result.map(|()| true)
    }

    async fn retry_locked(&self, driver_id: Uuid) -> Result<(), AppError> {
        if let Some(ride) = self.rides.find_active_by_driver(driver_id).await? {
            debug!(
                driver_id = %driver_id,
                ride_id = %ride.id,
                "driver holds another ride; parked release dropped"
            );
            return Ok(());
        }

        self.mark_available(driver_id, false).await?;
        info!(driver_id = %driver_id, "parked driver release completed");
        Ok(())
    }

    async fn mark_available(&self, driver_id: Uuid, cache: bool) -> Result<(), AppError> {
        if self
            .drivers
            .set_status(driver_id, DriverStatus::Available)
            .await?
            .is_none()
        {
            warn!(driver_id = %driver_id, "ride referenced an unknown driver");
            return Ok(());
        }

        if cache {
            if let Err(err) = self
                .cache
                .cache_status(driver_id, DriverStatus::Available)
                .await
            {
                warn!(driver_id = %driver_id, error = %err, "failed to cache available status");
            }
        }
        Ok(())
    }

    fn settle(&self, driver_id: Uuid, result: Result<(), AppError>) -> Result<(), AppError> {
        match result {
            Ok(()) => {
                self.unpark(driver_id);
                Ok(())
            }
            Err(err) => {
                if self.parked.insert(driver_id) {
                    self.metrics.pending_driver_releases.inc();
                }
                warn!(driver_id = %driver_id, error = %err, "driver release parked for retry");
                Err(err)
            }
        }
    }

    fn unpark(&self, driver_id: Uuid) {
        if self.parked.remove(&driver_id).is_some() {
            self.metrics.pending_driver_releases.dec();
        }
    }

    async fn unlock(&self, driver_id: Uuid) {
        if let Err(err) = self.cache.release_lock(driver_id).await {
            warn!(
                driver_id = %driver_id,
                error = %err,
                "failed to release driver lock; it will expire on its own"
            );
        }
    }
}
