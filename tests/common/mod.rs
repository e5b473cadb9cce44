#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use ride_dispatch::config::Config;
use ride_dispatch::error::AppError;
use ride_dispatch::models::driver::{Driver, DriverStatus, GeoPoint};
use ride_dispatch::models::ride::Ride;
use ride_dispatch::state::AppState;
use ride_dispatch::store::{
    CoordinationStore, DriverDirectory, InMemoryCoordinationStore, InMemoryDriverDirectory,
    InMemoryRideStore, RideStore,
};

pub const PICKUP: GeoPoint = GeoPoint {
    lat: 12.9716,
    lng: 77.5946,
};

pub const DROPOFF: GeoPoint = GeoPoint {
    lat: 12.9352,
    lng: 77.6245,
};

pub fn test_config() -> Config {
    Config {
        contention_retry_limit: 3,
        contention_backoff_ms: 1,
        contention_backoff_max_ms: 5,
        ..Config::default()
    }
}

/// In-memory directory that counts nearest-driver queries and can be told to
/// fail status writes for specific drivers.
#[derive(Default)]
pub struct TestDirectory {
    inner: InMemoryDriverDirectory,
    queries: AtomicUsize,
    broken: Mutex<HashSet<Uuid>>,
}

impl TestDirectory {
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn break_driver(&self, id: Uuid) {
        self.broken.lock().unwrap().insert(id);
    }

    pub fn heal_driver(&self, id: Uuid) {
        self.broken.lock().unwrap().remove(&id);
    }
}

#[async_trait]
impl DriverDirectory for TestDirectory {
    async fn insert(&self, driver: Driver) -> Result<Driver, AppError> {
        self.inner.insert(driver).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Driver>, AppError> {
        self.inner.get(id).await
    }

    async fn find_nearest(
        &self,
        point: &GeoPoint,
        exclude: &[Uuid],
    ) -> Result<Option<Driver>, AppError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.find_nearest(point, exclude).await
    }

    async fn set_status(&self, id: Uuid, status: DriverStatus) -> Result<Option<Driver>, AppError> {
        if self.broken.lock().unwrap().contains(&id) {
            return Err(AppError::Store(format!("driver store unreachable for {id}")));
        }
        self.inner.set_status(id, status).await
    }

    async fn set_location(&self, id: Uuid, location: GeoPoint) -> Result<Option<Driver>, AppError> {
        self.inner.set_location(id, location).await
    }

    async fn count(&self) -> Result<usize, AppError> {
        self.inner.count().await
    }
}

/// Coordination store whose every call fails.
pub struct UnreachableCoordination;

#[async_trait]
impl CoordinationStore for UnreachableCoordination {
    async fn set_if_absent(&self, key: &str, _: &str, _: Duration) -> Result<bool, AppError> {
        Err(AppError::Store(format!("coordination store unreachable ({key})")))
    }

    async fn set(&self, key: &str, _: &str, _: Duration) -> Result<(), AppError> {
        Err(AppError::Store(format!("coordination store unreachable ({key})")))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Err(AppError::Store(format!("coordination store unreachable ({key})")))
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        Err(AppError::Store(format!("coordination store unreachable ({key})")))
    }
}

pub struct Harness {
    pub rides: Arc<InMemoryRideStore>,
    pub drivers: Arc<TestDirectory>,
    pub coordination: Arc<InMemoryCoordinationStore>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let rides = Arc::new(InMemoryRideStore::new());
        let drivers = Arc::new(TestDirectory::default());
        let coordination = Arc::new(InMemoryCoordinationStore::new());
        let (state, _dispatch_rx) = AppState::with_stores(
            &config,
            rides.clone(),
            drivers.clone(),
            coordination.clone(),
        );

        Self {
            rides,
            drivers,
            coordination,
            state,
        }
    }

    /// Available driver `offset_m` metres north of the pickup point.
    pub async fn add_driver(&self, offset_m: f64) -> Driver {
        let location = GeoPoint {
            lat: PICKUP.lat + offset_m / 111_000.0,
            lng: PICKUP.lng,
        };
        let mut driver = Driver::new("test-driver", location);
        driver.status = DriverStatus::Available;
        self.drivers.insert(driver).await.unwrap()
    }

    pub async fn add_ride(&self) -> Ride {
        self.rides
            .insert(Ride::new(Uuid::new_v4(), PICKUP, DROPOFF, 150.0))
            .await
            .unwrap()
    }

    pub async fn ride(&self, id: Uuid) -> Ride {
        self.rides.get(id).await.unwrap().unwrap()
    }

    pub async fn driver(&self, id: Uuid) -> Driver {
        self.drivers.get(id).await.unwrap().unwrap()
    }
}

pub fn assert_driver_invariant(ride: &Ride) {
    assert_eq!(
        ride.driver_id.is_some(),
        ride.status.holds_driver(),
        "driver_id {:?} inconsistent with status {:?}",
        ride.driver_id,
        ride.status
    );
}
