//! Driver actions and explicit cancellation.
//!
//! Every transition is a single guarded write against the ride store keyed on
//! `(ride id, driver id, expected status)`. Driver availability side effects
//! run only after that write has committed; a failed driver write is parked
//! for the reclamation sweep and does not fail the action.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::availability::DriverAvailability;
use crate::engine::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::AppError;
use crate::models::ride::{Ride, RideGuard, RideStatus, Transition};
use crate::observability::metrics::Metrics;
use crate::store::{DriverCache, RideStore};

pub const DEFAULT_CANCEL_REASON: &str = "cancelled by request";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverAction {
    Accept,
    Reject,
    Start,
    Complete,
}

/// Result of the synchronous re-dispatch that follows a rejection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reassignment {
    Dispatched { result: DispatchOutcome },
    Errored { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectOutcome {
    /// The ride as it was committed by the rejection, before re-dispatch.
    pub ride: Ride,
    pub reassignment: Reassignment,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ActionOutcome {
    Updated(Ride),
    Rejected(RejectOutcome),
}

#[derive(Clone)]
pub struct Lifecycle {
    rides: Arc<dyn RideStore>,
    cache: DriverCache,
    availability: DriverAvailability,
    dispatcher: Dispatcher,
    metrics: Metrics,
}

impl Lifecycle {
    pub fn new(
        rides: Arc<dyn RideStore>,
        cache: DriverCache,
        availability: DriverAvailability,
        dispatcher: Dispatcher,
        metrics: Metrics,
    ) -> Self {
        Self {
            rides,
            cache,
            availability,
            dispatcher,
            metrics,
        }
    }

    pub async fn perform(
        &self,
        action: DriverAction,
        ride_id: Uuid,
        driver_id: Uuid,
    ) -> Result<ActionOutcome, AppError> {
        match action {
            DriverAction::Accept => self.accept(ride_id, driver_id).await.map(ActionOutcome::Updated),
            DriverAction::Reject => self
                .reject(ride_id, driver_id)
                .await
                .map(ActionOutcome::Rejected),
            DriverAction::Start => self.start(ride_id, driver_id).await.map(ActionOutcome::Updated),
            DriverAction::Complete => self
                .complete(ride_id, driver_id)
                .await
                .map(ActionOutcome::Updated),
        }
    }

    pub async fn accept(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
        self.guarded(
            ride_id,
            RideGuard::held_by(driver_id, RideStatus::Assigned),
            Transition::Accept,
        )
        .await
    }

    pub async fn start(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
        self.guarded(
            ride_id,
            RideGuard::held_by(driver_id, RideStatus::Accepted),
            Transition::Start,
        )
        .await
    }

    pub async fn complete(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
        let ride = self
            .guarded(
                ride_id,
                RideGuard::held_by(driver_id, RideStatus::Started),
                Transition::Complete,
            )
            .await?;

        self.free_driver(driver_id).await;
        Ok(ride)
    }

    /// Returns the ride to pending, frees the driver and re-dispatches before
    /// returning. A failing re-dispatch does not undo the rejection.
    pub async fn reject(&self, ride_id: Uuid, driver_id: Uuid) -> Result<RejectOutcome, AppError> {
        let ride = self
            .guarded(
                ride_id,
                RideGuard::held_by(driver_id, RideStatus::Assigned),
                Transition::Reject,
            )
            .await?;

        self.free_driver(driver_id).await;

        let reassignment = match self.dispatcher.dispatch(ride_id).await {
            Ok(result) => Reassignment::Dispatched { result },
            Err(err) => {
                warn!(ride_id = %ride_id, error = %err, "re-dispatch after rejection failed");
                Reassignment::Errored {
                    error: err.to_string(),
                }
            }
        };

        Ok(RejectOutcome { ride, reassignment })
    }

    /// Cancels any non-terminal ride. A held driver is freed and its lock key
    /// dropped.
    pub async fn cancel(&self, ride_id: Uuid, reason: Option<String>) -> Result<Ride, AppError> {
        let current = self
            .rides
            .get(ride_id)
            .await?
            .ok_or_else(|| AppError::ride_not_found(ride_id))?;

        if current.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "ride {ride_id} is already {:?}",
                current.status
            )));
        }

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());

        let cancelled = self
            .guarded(
                ride_id,
                RideGuard::observed(&current),
                Transition::Cancel { reason },
            )
            .await?;

        if let Some(driver_id) = current.driver_id {
            self.free_driver(driver_id).await;
            if let Err(err) = self.cache.release_lock(driver_id).await {
                warn!(driver_id = %driver_id, error = %err, "failed to drop driver lock after cancel");
            }
        }

        Ok(cancelled)
    }

    async fn guarded(
        &self,
        ride_id: Uuid,
        guard: RideGuard,
        transition: Transition,
    ) -> Result<Ride, AppError> {
        let name = transition.name();

        match self.rides.transition(ride_id, guard, transition).await? {
            Some(ride) => {
                self.metrics.record_transition(name);
                info!(
                    ride_id = %ride_id,
                    driver_id = ?ride.driver_id,
                    status = ?ride.status,
                    transition = name,
                    "ride transition committed"
                );
                Ok(ride)
            }
            None => Err(self.rejection(ride_id, name).await),
        }
    }

    /// Explains a failed guard. Read-only.
    async fn rejection(&self, ride_id: Uuid, transition: &str) -> AppError {
        match self.rides.get(ride_id).await {
            Ok(Some(ride)) => AppError::InvalidState(format!(
                "cannot {transition} ride {ride_id} in state {:?} for this driver",
                ride.status
            )),
            Ok(None) => AppError::ride_not_found(ride_id),
            Err(err) => err,
        }
    }

    async fn free_driver(&self, driver_id: Uuid) {
        if let Err(err) = self.availability.release(driver_id).await {
            warn!(
                driver_id = %driver_id,
                error = %err,
                "driver still on_trip after ride let go; release parked"
            );
        }
    }
}
