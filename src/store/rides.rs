use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::ride::{Ride, RideGuard, RideStatus, Transition};

/// Authoritative ride storage.
///
/// `transition` is the only mutation path after insert. Implementations must
/// evaluate the guard and apply the transition as one atomic step (a
/// conditional update), so two concurrent driver actions cannot both win.
#[async_trait]
pub trait RideStore: Send + Sync {
    async fn insert(&self, ride: Ride) -> Result<Ride, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Ride>, AppError>;

    /// Returns the updated ride, or `None` when the ride is missing or the
    /// guard did not match. Nothing is written in the `None` case.
    async fn transition(
        &self,
        id: Uuid,
        guard: RideGuard,
        transition: Transition,
    ) -> Result<Option<Ride>, AppError>;

    /// Rides in one of `statuses` created at or before `created_before`.
    async fn find_stale(
        &self,
        statuses: &[RideStatus],
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Ride>, AppError>;

    /// The assigned, accepted or started ride held by `driver_id`, if any.
    async fn find_active_by_driver(&self, driver_id: Uuid) -> Result<Option<Ride>, AppError>;

    /// Newest first.
    async fn list_by_status(&self, statuses: &[RideStatus]) -> Result<Vec<Ride>, AppError>;

    async fn count(&self) -> Result<usize, AppError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRideStore {
    rides: DashMap<Uuid, Ride>,
}

impl InMemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RideStore for InMemoryRideStore {
    async fn insert(&self, ride: Ride) -> Result<Ride, AppError> {
        self.rides.insert(ride.id, ride.clone());
        Ok(ride)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Ride>, AppError> {
        Ok(self.rides.get(&id).map(|entry| entry.value().clone()))
    }

    async fn transition(
        &self,
        id: Uuid,
        guard: RideGuard,
        transition: Transition,
    ) -> Result<Option<Ride>, AppError> {
        // get_mut holds the shard write lock across check and apply
        let Some(mut ride) = self.rides.get_mut(&id) else {
            return Ok(None);
        };

        if !guard.matches(&ride) {
            return Ok(None);
        }

        ride.apply(&transition, Utc::now());
        Ok(Some(ride.clone()))
    }

    async fn find_stale(
        &self,
        statuses: &[RideStatus],
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Ride>, AppError> {
        Ok(self
            .rides
            .iter()
            .filter(|entry| {
                let ride = entry.value();
                statuses.contains(&ride.status) && ride.created_at <= created_before
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn find_active_by_driver(&self, driver_id: Uuid) -> Result<Option<Ride>, AppError> {
        Ok(self
            .rides
            .iter()
            .find(|entry| {
                let ride = entry.value();
                ride.driver_id == Some(driver_id) && !ride.status.is_terminal()
            })
            .map(|entry| entry.value().clone()))
    }

    async fn list_by_status(&self, statuses: &[RideStatus]) -> Result<Vec<Ride>, AppError> {
        let mut rides: Vec<Ride> = self
            .rides
            .iter()
            .filter(|entry| statuses.contains(&entry.value().status))
            .map(|entry| entry.value().clone())
            .collect();
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rides)
    }

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.rides.len())
    }
}
