use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::distance_within;
use crate::models::driver::{Driver, DriverStatus, GeoPoint};

pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 5.0;

/// Authoritative driver records plus the nearest-neighbour query dispatch
/// relies on.
#[async_trait]
pub trait DriverDirectory: Send + Sync {
    async fn insert(&self, driver: Driver) -> Result<Driver, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Driver>, AppError>;

    /// Closest active driver with `status = available` whose id is not in
    /// `exclude`, within the directory's search radius.
    async fn find_nearest(
        &self,
        point: &GeoPoint,
        exclude: &[Uuid],
    ) -> Result<Option<Driver>, AppError>;

    /// Unconditional write. `None` if the driver does not exist.
    async fn set_status(&self, id: Uuid, status: DriverStatus) -> Result<Option<Driver>, AppError>;

    async fn set_location(&self, id: Uuid, location: GeoPoint) -> Result<Option<Driver>, AppError>;

    async fn count(&self) -> Result<usize, AppError>;
}

#[derive(Debug)]
pub struct InMemoryDriverDirectory {
    drivers: DashMap<Uuid, Driver>,
    radius_km: f64,
}

impl Default for InMemoryDriverDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_RADIUS_KM)
    }
}

impl InMemoryDriverDirectory {
    pub fn new(radius_km: f64) -> Self {
        Self {
            drivers: DashMap::new(),
            radius_km,
        }
    }
}

#[async_trait]
impl DriverDirectory for InMemoryDriverDirectory {
    async fn insert(&self, driver: Driver) -> Result<Driver, AppError> {
        self.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Driver>, AppError> {
        Ok(self.drivers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_nearest(
        &self,
        point: &GeoPoint,
        exclude: &[Uuid],
    ) -> Result<Option<Driver>, AppError> {
        let nearest = self
            .drivers
            .iter()
            .filter(|entry| {
                let driver = entry.value();
                driver.is_dispatchable() && !exclude.contains(&driver.id)
            })
            .filter_map(|entry| {
                let driver = entry.value();
                distance_within(point, &driver.location, self.radius_km)
                    .map(|distance| (distance, driver.clone()))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, driver)| driver);

        Ok(nearest)
    }

    async fn set_status(&self, id: Uuid, status: DriverStatus) -> Result<Option<Driver>, AppError> {
        Ok(self.drivers.get_mut(&id).map(|mut driver| {
            driver.status = status;
            driver.updated_at = Utc::now();
            driver.clone()
        }))
    }

    async fn set_location(&self, id: Uuid, location: GeoPoint) -> Result<Option<Driver>, AppError> {
        Ok(self.drivers.get_mut(&id).map(|mut driver| {
            driver.location = location;
            driver.updated_at = Utc::now();
            driver.clone()
        }))
    }

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.drivers.len())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{DriverDirectory, InMemoryDriverDirectory};
    use crate::models::driver::{Driver, DriverStatus, GeoPoint};

    const PICKUP: GeoPoint = GeoPoint {
        lat: 12.9716,
        lng: 77.5946,
    };

    fn available(lat: f64, lng: f64) -> Driver {
        let mut driver = Driver::new("test-driver", GeoPoint { lat, lng });
        driver.status = DriverStatus::Available;
        driver
    }

    #[tokio::test]
    async fn nearest_available_driver_wins() {
        let directory = InMemoryDriverDirectory::default();
        let near = directory.insert(available(12.9720, 77.5950)).await.unwrap();
        directory.insert(available(12.9900, 77.6100)).await.unwrap();

        let found = directory.find_nearest(&PICKUP, &[]).await.unwrap().unwrap();
        assert_eq!(found.id, near.id);
    }

    #[tokio::test]
    async fn excluded_and_busy_drivers_are_skipped() {
        let directory = InMemoryDriverDirectory::default();
        let near = directory.insert(available(12.9720, 77.5950)).await.unwrap();
        let mut busy = available(12.9717, 77.5947);
        busy.status = DriverStatus::OnTrip;
        directory.insert(busy).await.unwrap();
        let mut inactive = available(12.9718, 77.5948);
        inactive.is_active = false;
        directory.insert(inactive).await.unwrap();
        let far = directory.insert(available(12.9900, 77.6100)).await.unwrap();

        let found = directory
            .find_nearest(&PICKUP, &[near.id])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, far.id);
    }

    #[tokio::test]
    async fn drivers_outside_radius_are_not_returned() {
        let directory = InMemoryDriverDirectory::default();
        directory.insert(available(13.1986, 77.7066)).await.unwrap();

        assert!(directory.find_nearest(&PICKUP, &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_status_on_unknown_driver_is_none() {
        let directory = InMemoryDriverDirectory::default();
        let result = directory
            .set_status(Uuid::new_v4(), DriverStatus::Available)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
