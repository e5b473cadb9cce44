//! Nearest-driver matching with per-driver locking.
//!
//! A dispatch call loads the ride, asks the directory for the closest
//! available driver not yet tried, takes that driver's lock in the
//! coordination store, re-checks availability and commits the pairing.
//! Losing the lock or finding the driver no longer available is contention:
//! it costs a local, jittered retry but never a business attempt.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::availability::DriverAvailability;
use crate::engine::backoff::ContentionPolicy;
use crate::error::AppError;
use crate::models::driver::DriverStatus;
use crate::models::ride::{Ride, RideGuard, RideStatus, Transition};
use crate::observability::metrics::Metrics;
use crate::store::{DriverCache, DriverDirectory, RideStore};

pub const DEFAULT_MAX_ASSIGNMENT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Assigned { ride: Ride },
    /// No candidate inside the search radius. The ride stays pending and its
    /// attempt counter is untouched.
    NoDriverAvailable { ride_id: Uuid },
    /// The attempt budget was already spent; the ride is now failed.
    AttemptsExhausted { ride: Ride },
    /// Every candidate was locked or stale for the whole contention budget.
    /// The ride stays pending.
    Contended { ride_id: Uuid, retries: u32 },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Assigned { .. } => "assigned",
            DispatchOutcome::NoDriverAvailable { .. } => "no_driver_available",
            DispatchOutcome::AttemptsExhausted { .. } => "attempts_exhausted",
            DispatchOutcome::Contended { .. } => "contended",
        }
    }

    pub fn assigned_driver(&self) -> Option<Uuid> {
        match self {
            DispatchOutcome::Assigned { ride } => ride.driver_id,
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_assignment_attempts: u32,
    pub contention: ContentionPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_assignment_attempts: DEFAULT_MAX_ASSIGNMENT_ATTEMPTS,
            contention: ContentionPolicy::default(),
        }
    }
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_assignment_attempts: config.max_assignment_attempts,
            contention: ContentionPolicy::from_config(config),
        }
    }
}

enum Claim {
    Committed(Ride),
    Contended,
}

#[derive(Clone)]
pub struct Dispatcher {
    rides: Arc<dyn RideStore>,
    drivers: Arc<dyn DriverDirectory>,
    cache: DriverCache,
    availability: DriverAvailability,
    settings: DispatchSettings,
    metrics: Metrics,
}

impl Dispatcher {
    pub fn new(
        rides: Arc<dyn RideStore>,
        drivers: Arc<dyn DriverDirectory>,
        cache: DriverCache,
        availability: DriverAvailability,
        settings: DispatchSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            rides,
            drivers,
            cache,
            availability,
            settings,
            metrics,
        }
    }

    /// Tries to pair a pending ride with the nearest available driver.
    ///
    /// Business outcomes come back as [`DispatchOutcome`]. `Err` is reserved
    /// for a missing ride, a ride that is not pending, and store failures.
    pub async fn dispatch(&self, ride_id: Uuid) -> Result<DispatchOutcome, AppError> {
        let start = Instant::now();
        let result = self.run(ride_id).await;

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        self.metrics
            .record_dispatch(label, start.elapsed().as_secs_f64());

        result
    }

    async fn run(&self, ride_id: Uuid) -> Result<DispatchOutcome, AppError> {
        let mut retries = 0u32;

        loop {
            let ride = self
                .rides
                .get(ride_id)
                .await?
                .ok_or_else(|| AppError::ride_not_found(ride_id))?;

            if ride.status != RideStatus::Pending || ride.driver_id.is_some() {
                return Err(AppError::InvalidState(format!(
                    "ride {ride_id} is {:?}; only pending rides can be dispatched",
                    ride.status
                )));
            }

            if ride.assignment_attempts >= self.settings.max_assignment_attempts {
                return self.fail_exhausted(&ride).await;
            }

            let Some(driver) = self
                .drivers
                .find_nearest(&ride.pickup, &ride.assignment_history)
                .await?
            else {
                info!(
                    ride_id = %ride_id,
                    attempts = ride.assignment_attempts,
                    "no available driver in range"
                );
                return Ok(DispatchOutcome::NoDriverAvailable { ride_id });
            };

            match self.claim(&ride, driver.id).await? {
                Claim::Committed(ride) => {
                    info!(
                        ride_id = %ride_id,
                        driver_id = %driver.id,
                        attempt = ride.assignment_attempts,
                        "ride assigned"
                    );
                    return Ok(DispatchOutcome::Assigned { ride });
                }
                Claim::Contended if retries >= self.settings.contention.max_retries => {
                    warn!(
                        ride_id = %ride_id,
                        driver_id = %driver.id,
                        retries,
                        "contention budget spent; ride left pending"
                    );
                    return Ok(DispatchOutcome::Contended { ride_id, retries });
                }
                Claim::Contended => {
                    retries += 1;
                    self.metrics.contention_retries_total.inc();

                    let delay = self.settings.contention.jittered_delay(retries);
                    debug!(
                        ride_id = %ride_id,
                        driver_id = %driver.id,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "driver contended; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn fail_exhausted(&self, ride: &Ride) -> Result<DispatchOutcome, AppError> {
        let failed = self
            .rides
            .transition(
                ride.id,
                RideGuard::unassigned(RideStatus::Pending),
                Transition::Fail,
            )
            .await?
            .ok_or_else(|| {
                AppError::InvalidState(format!("ride {} changed before it could be failed", ride.id))
            })?;

        self.metrics.record_transition(Transition::Fail.name());
        warn!(
            ride_id = %ride.id,
            attempts = ride.assignment_attempts,
            "assignment attempts exhausted; ride failed"
        );
        Ok(DispatchOutcome::AttemptsExhausted { ride: failed })
    }

    /// Lock, re-check, commit, unlock. The lock is released on every path
    /// that acquired it.
    async fn claim(&self, ride: &Ride, driver_id: Uuid) -> Result<Claim, AppError> {
        if !self.cache.acquire_lock(driver_id).await? {
            debug!(ride_id = %ride.id, driver_id = %driver_id, "driver lock held elsewhere");
            return Ok(Claim::Contended);
        }

        let result = self.commit_locked(ride, driver_id).await;

        if let Err(err) = self.cache.release_lock(driver_id).await {
            warn!(
                driver_id = %driver_id,
                error = %err,
                ttl_ms = self.cache.lock_ttl().as_millis() as u64,
                "failed to release driver lock; it will expire on its own"
            );
        }

        result
    }

    async fn commit_locked(&self, ride: &Ride, driver_id: Uuid) -> Result<Claim, AppError> {
        if !self.still_available(driver_id).await? {
            debug!(ride_id = %ride.id, driver_id = %driver_id, "driver no longer available");
            return Ok(Claim::Contended);
        }

        if self
            .drivers
            .set_status(driver_id, DriverStatus::OnTrip)
            .await?
            .is_none()
        {
            return Ok(Claim::Contended);
        }

        let committed = self
            .rides
            .transition(
                ride.id,
                RideGuard::unassigned(RideStatus::Pending),
                Transition::Assign { driver_id },
            )
            .await;

        let committed = match committed {
            Ok(Some(ride)) => ride,
            Ok(None) => {
                self.restore_driver(driver_id).await;
                return Err(AppError::InvalidState(format!(
                    "ride {} changed while dispatching",
                    ride.id
                )));
            }
            Err(err) => {
                self.restore_driver(driver_id).await;
                return Err(err);
            }
        };

        self.metrics.record_transition("assign");
        if let Err(err) = self.cache.cache_status(driver_id, DriverStatus::OnTrip).await {
            warn!(driver_id = %driver_id, error = %err, "failed to cache on_trip status");
        }

        Ok(Claim::Committed(committed))
    }

    /// Cached status is the fast path: anything other than `available` is a
    /// miss. An `available` or empty cache is confirmed against the driver
    /// record, which stays authoritative.
    async fn still_available(&self, driver_id: Uuid) -> Result<bool, AppError> {
        if let Some(cached) = self.cache.cached_status(driver_id).await? {
            if cached != DriverStatus::Available {
                return Ok(false);
            }
        }

        Ok(self
            .drivers
            .get(driver_id)
            .await?
            .is_some_and(|driver| driver.is_dispatchable()))
    }

    /// A failed restore is parked and retried by the reclamation sweep.
    async fn restore_driver(&self, driver_id: Uuid) {
        if let Err(err) = self.availability.reset(driver_id).await {
            warn!(
                driver_id = %driver_id,
                error = %err,
                "failed to return driver to available after aborted commit"
            );
        }
    }
}
