mod common;

use chrono::{Duration, Utc};
use uuid::Uuid;

use common::{assert_driver_invariant, Harness, DROPOFF, PICKUP};
use ride_dispatch::models::driver::DriverStatus;
use ride_dispatch::models::ride::{Ride, RideGuard, RideStatus, Transition, TIMEOUT_CANCEL_REASON};
use ride_dispatch::store::RideStore;

/// Inserts a pending ride created `age_minutes` ago.
async fn aged_ride(h: &Harness, age_minutes: i64) -> Ride {
    let mut ride = Ride::new(Uuid::new_v4(), PICKUP, DROPOFF, 75.0);
    ride.created_at = Utc::now() - Duration::minutes(age_minutes);
    h.rides.insert(ride).await.unwrap()
}

#[tokio::test]
async fn stale_pending_ride_is_cancelled_and_fresh_one_kept() {
    let h = Harness::new();
    let stale = aged_ride(&h, 6).await;
    let fresh = aged_ride(&h, 1).await;

    let report = h.state.reclaimer.sweep(Utc::now()).await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.failed, 0);

    let stale = h.ride(stale.id).await;
    assert_eq!(stale.status, RideStatus::Cancelled);
    assert_eq!(stale.cancel_reason.as_deref(), Some(TIMEOUT_CANCEL_REASON));
    assert_eq!(h.ride(fresh.id).await.status, RideStatus::Pending);
}

#[tokio::test]
async fn stale_assigned_ride_frees_driver_and_drops_lock_but_not_cached_status() {
    let h = Harness::new();
    let driver = h.add_driver(100.0).await;
    let ride = aged_ride(&h, 10).await;
    let outcome = h.state.dispatcher.dispatch(ride.id).await.unwrap();
    assert_eq!(outcome.assigned_driver(), Some(driver.id));
    // a lock left behind by a crashed dispatcher
    assert!(h.state.cache.acquire_lock(driver.id).await.unwrap());

    let report = h.state.reclaimer.sweep(Utc::now()).await.unwrap();

    assert_eq!(report.cancelled, 1);
    let ride = h.ride(ride.id).await;
    assert_eq!(ride.status, RideStatus::Cancelled);
    assert_driver_invariant(&ride);
    assert_eq!(h.driver(driver.id).await.status, DriverStatus::Available);
    assert!(!h.state.cache.is_locked(driver.id).await.unwrap());
    // cached shadow is left to expire on its own
    assert_eq!(
        h.state.cache.cached_status(driver.id).await.unwrap(),
        Some(DriverStatus::OnTrip)
    );
}

#[tokio::test]
async fn rides_past_assigned_are_never_reclaimed() {
    let h = Harness::new();
    let driver = h.add_driver(100.0).await;
    let ride = aged_ride(&h, 30).await;
    h.state.dispatcher.dispatch(ride.id).await.unwrap();
    h.state.lifecycle.accept(ride.id, driver.id).await.unwrap();

    let report = h.state.reclaimer.sweep(Utc::now()).await.unwrap();

    assert_eq!(report.scanned, 0);
    assert_eq!(h.ride(ride.id).await.status, RideStatus::Accepted);
    assert_eq!(h.driver(driver.id).await.status, DriverStatus::OnTrip);
}

#[tokio::test]
async fn failure_on_one_ride_does_not_stop_the_sweep() {
    let h = Harness::new();
    let broken = h.add_driver(100.0).await;
    let healthy = h.add_driver(200.0).await;

    let first = aged_ride(&h, 10).await;
    h.rides
        .transition(
            first.id,
            RideGuard::unassigned(RideStatus::Pending),
            Transition::Assign {
                driver_id: broken.id,
            },
        )
        .await
        .unwrap()
        .unwrap();
    let second = aged_ride(&h, 10).await;
    h.rides
        .transition(
            second.id,
            RideGuard::unassigned(RideStatus::Pending),
            Transition::Assign {
                driver_id: healthy.id,
            },
        )
        .await
        .unwrap()
        .unwrap();
    let third = aged_ride(&h, 10).await;
    h.drivers.break_driver(broken.id);

    let report = h.state.reclaimer.sweep(Utc::now()).await.unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.cancelled, 2);
    assert_eq!(h.ride(first.id).await.status, RideStatus::Cancelled);
    assert_eq!(h.ride(second.id).await.status, RideStatus::Cancelled);
    assert_eq!(h.ride(third.id).await.status, RideStatus::Cancelled);
    assert!(h.state.availability.is_parked(broken.id));
    assert!(!h.state.availability.is_parked(healthy.id));
}

#[tokio::test]
async fn driver_reset_that_failed_is_retried_by_the_next_sweep() {
    let h = Harness::new();
    let driver = h.add_driver(100.0).await;
    let ride = aged_ride(&h, 10).await;
    h.state.dispatcher.dispatch(ride.id).await.unwrap();
    h.drivers.break_driver(driver.id);

    let first = h.state.reclaimer.sweep(Utc::now()).await.unwrap();

    assert_eq!(first.failed, 1);
    assert_eq!(h.ride(ride.id).await.status, RideStatus::Cancelled);
    assert_eq!(h.driver(driver.id).await.status, DriverStatus::OnTrip);
    assert!(!h.state.cache.is_locked(driver.id).await.unwrap());
    assert_eq!(h.state.availability.parked_count(), 1);

    // still unreachable: the release stays parked
    let second = h.state.reclaimer.sweep(Utc::now()).await.unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(second.released, 0);
    assert!(h.state.availability.is_parked(driver.id));

    h.drivers.heal_driver(driver.id);
    let third = h.state.reclaimer.sweep(Utc::now()).await.unwrap();

    assert_eq!(third.released, 1);
    assert_eq!(h.driver(driver.id).await.status, DriverStatus::Available);
    assert_eq!(h.state.availability.parked_count(), 0);
    assert_eq!(h.state.metrics.pending_driver_releases.get(), 0);
    assert!(!h.state.cache.is_locked(driver.id).await.unwrap());
}

#[tokio::test]
async fn parked_release_is_dropped_when_driver_holds_a_new_ride() {
    let h = Harness::new();
    let driver = h.add_driver(100.0).await;
    let stale = aged_ride(&h, 10).await;
    h.state.dispatcher.dispatch(stale.id).await.unwrap();
    h.drivers.break_driver(driver.id);
    h.state.reclaimer.sweep(Utc::now()).await.unwrap();
    assert!(h.state.availability.is_parked(driver.id));

    // the driver is handed a fresh ride before the retry runs
    h.drivers.heal_driver(driver.id);
    let fresh = h.add_ride().await;
    h.rides
        .transition(
            fresh.id,
            RideGuard::unassigned(RideStatus::Pending),
            Transition::Assign {
                driver_id: driver.id,
            },
        )
        .await
        .unwrap()
        .unwrap();

    let report = h.state.reclaimer.sweep(Utc::now()).await.unwrap();

    assert_eq!(report.released, 1);
    assert!(!h.state.availability.is_parked(driver.id));
    assert_eq!(h.driver(driver.id).await.status, DriverStatus::OnTrip);
}

#[tokio::test]
async fn cutoff_is_measured_from_the_sweep_time() {
    let h = Harness::new();
    let ride = aged_ride(&h, 1).await;

    let early = h.state.reclaimer.sweep(Utc::now()).await.unwrap();
    assert_eq!(early.cancelled, 0);

    let later = h
        .state
        .reclaimer
        .sweep(Utc::now() + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(later.cancelled, 1);
    assert_eq!(h.ride(ride.id).await.status, RideStatus::Cancelled);
}
