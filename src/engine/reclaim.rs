//! Periodic reclamation of rides stuck in `pending` or `assigned`.
//!
//! The sweep drops a freed driver's lock key but leaves the cached status
//! entry alone. A driver freed here may therefore still read as `on_trip` in
//! the coordination store until that entry expires (at most 120 s), during
//! which dispatch skips them.
//!
//! Each sweep first retries driver releases parked by earlier failures, so a
//! driver whose reset failed after its ride was cancelled is still freed once
//! the directory recovers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::engine::availability::DriverAvailability;
use crate::error::AppError;
use crate::models::ride::{Ride, RideGuard, RideStatus, Transition, TIMEOUT_CANCEL_REASON};
use crate::observability::metrics::Metrics;
use crate::store::{DriverCache, RideStore};

pub const RECLAIMABLE: [RideStatus; 2] = [RideStatus::Pending, RideStatus::Assigned];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub cancelled: usize,
    /// Rides that moved on between the scan and the cancel.
    pub skipped: usize,
    pub failed: usize,
    /// Parked driver releases that landed during this sweep.
    pub released: usize,
}

#[derive(Clone)]
pub struct Reclaimer {
    rides: Arc<dyn RideStore>,
    cache: DriverCache,
    availability: DriverAvailability,
    ride_timeout: Duration,
    metrics: Metrics,
}

impl Reclaimer {
    pub fn new(
        rides: Arc<dyn RideStore>,
        cache: DriverCache,
        availability: DriverAvailability,
        ride_timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            rides,
            cache,
            availability,
            ride_timeout,
            metrics,
        }
    }

    /// Cancels every reclaimable ride created at or before `now - timeout`.
    /// A failure on one ride is logged and counted; the rest still run.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let timeout = chrono::Duration::from_std(self.ride_timeout)
            .map_err(|err| AppError::Internal(format!("invalid ride timeout: {err}")))?;
        let cutoff = now - timeout;

        let released = self.availability.retry_parked().await;
        let expired = self.rides.find_stale(&RECLAIMABLE, cutoff).await?;
        let mut report = SweepReport {
            scanned: expired.len(),
            released,
            ..SweepReport::default()
        };

        for ride in &expired {
            match self.reclaim(ride).await {
                Ok(true) => {
                    report.cancelled += 1;
                    self.metrics
                        .rides_reclaimed_total
                        .with_label_values(&["cancelled"])
                        .inc();
                }
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    self.metrics
                        .rides_reclaimed_total
                        .with_label_values(&["failed"])
                        .inc();
                    error!(
                        ride_id = %ride.id,
                        driver_id = ?ride.driver_id,
                        error = %err,
                        "failed to reclaim ride"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn reclaim(&self, ride: &Ride) -> Result<bool, AppError> {
        let cancelled = self
            .rides
            .transition(
                ride.id,
                RideGuard::observed(ride),
                Transition::Cancel {
                    reason: TIMEOUT_CANCEL_REASON.to_string(),
                },
            )
            .await?;

        if cancelled.is_none() {
            debug!(ride_id = %ride.id, "ride progressed before reclamation");
            return Ok(false);
        }
        self.metrics.record_transition("cancel");

        if let Some(driver_id) = ride.driver_id {
            // a failed reset is parked and retried by the next sweep
            let reset = self.availability.reset(driver_id).await;
            self.cache.release_lock(driver_id).await?;
            reset?;
        }

        info!(ride_id = %ride.id, driver_id = ?ride.driver_id, "ride cancelled after timeout");
        Ok(true)
    }
}

pub async fn run_reclaim_loop(reclaimer: Reclaimer, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "reclamation sweep started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match reclaimer.sweep(Utc::now()).await {
            Ok(report) if report.cancelled > 0 || report.failed > 0 || report.released > 0 => {
                info!(
                    scanned = report.scanned,
                    cancelled = report.cancelled,
                    skipped = report.skipped,
                    failed = report.failed,
                    released = report.released,
                    "reclamation sweep finished"
                );
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "reclamation sweep could not list expired rides"),
        }
    }
}
