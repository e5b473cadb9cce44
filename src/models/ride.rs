use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

pub const TIMEOUT_CANCEL_REASON: &str = "timeout";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Assigned,
    Accepted,
    Started,
    Completed,
    Cancelled,
    Failed,
}

impl RideStatus {
    pub const ACTIVE: [RideStatus; 4] = [
        RideStatus::Pending,
        RideStatus::Assigned,
        RideStatus::Accepted,
        RideStatus::Started,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::Failed
        )
    }

    /// States in which a ride must reference a driver.
    pub fn holds_driver(&self) -> bool {
        matches!(
            self,
            RideStatus::Assigned | RideStatus::Accepted | RideStatus::Started | RideStatus::Completed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub passenger_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub driver_id: Option<Uuid>,
    pub status: RideStatus,
    pub assignment_attempts: u32,
    pub assignment_history: Vec<Uuid>,
    pub estimated_fare: f64,
    pub actual_fare: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn new(passenger_id: Uuid, pickup: GeoPoint, dropoff: GeoPoint, estimated_fare: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            passenger_id,
            pickup,
            dropoff,
            driver_id: None,
            status: RideStatus::Pending,
            assignment_attempts: 0,
            assignment_history: Vec::new(),
            estimated_fare,
            actual_fare: None,
            start_time: None,
            end_time: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a transition that has already passed its guard.
    pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) {
        match transition {
            Transition::Assign { driver_id } => {
                self.driver_id = Some(*driver_id);
                self.status = RideStatus::Assigned;
                self.assignment_attempts += 1;
                if !self.assignment_history.contains(driver_id) {
                    self.assignment_history.push(*driver_id);
                }
            }
            Transition::Accept => self.status = RideStatus::Accepted,
            Transition::Reject => {
                self.driver_id = None;
                self.status = RideStatus::Pending;
            }
            Transition::Start => {
                self.status = RideStatus::Started;
                self.start_time = Some(now);
            }
            Transition::Complete => {
                self.status = RideStatus::Completed;
                self.end_time = Some(now);
            }
            Transition::Cancel { reason } => {
                self.driver_id = None;
                self.status = RideStatus::Cancelled;
                self.cancel_reason = Some(reason.clone());
            }
            Transition::Fail => {
                self.driver_id = None;
                self.status = RideStatus::Failed;
            }
        }
        self.updated_at = now;
    }
}

/// Mutations the lifecycle may perform on a ride. Each is applied only after
/// its [`RideGuard`] matched the stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Assign { driver_id: Uuid },
    Accept,
    Reject,
    Start,
    Complete,
    Cancel { reason: String },
    Fail,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Assign { .. } => "assign",
            Transition::Accept => "accept",
            Transition::Reject => "reject",
            Transition::Start => "start",
            Transition::Complete => "complete",
            Transition::Cancel { .. } => "cancel",
            Transition::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMatch {
    Any,
    Unassigned,
    Is(Uuid),
}

/// Compare-and-swap precondition evaluated by the ride store in the same
/// critical section as the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideGuard {
    pub expected: Vec<RideStatus>,
    pub driver: DriverMatch,
}

impl RideGuard {
    pub fn new(expected: &[RideStatus], driver: DriverMatch) -> Self {
        Self {
            expected: expected.to_vec(),
            driver,
        }
    }

    pub fn held_by(driver_id: Uuid, status: RideStatus) -> Self {
        Self::new(&[status], DriverMatch::Is(driver_id))
    }

    pub fn unassigned(status: RideStatus) -> Self {
        Self::new(&[status], DriverMatch::Unassigned)
    }

    /// Guard that only passes if the ride is exactly as it was observed.
    pub fn observed(ride: &Ride) -> Self {
        let driver = match ride.driver_id {
            Some(id) => DriverMatch::Is(id),
            None => DriverMatch::Unassigned,
        };
        Self::new(&[ride.status], driver)
    }

    pub fn matches(&self, ride: &Ride) -> bool {
        let driver_ok = match self.driver {
            DriverMatch::Any => true,
            DriverMatch::Unassigned => ride.driver_id.is_none(),
            DriverMatch::Is(id) => ride.driver_id == Some(id),
        };
        driver_ok && self.expected.contains(&ride.status)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{DriverMatch, Ride, RideGuard, RideStatus, Transition};
    use crate::models::driver::GeoPoint;

    fn ride() -> Ride {
        Ride::new(
            Uuid::new_v4(),
            GeoPoint {
                lat: 12.9716,
                lng: 77.5946,
            },
            GeoPoint {
                lat: 12.9352,
                lng: 77.6245,
            },
            180.0,
        )
    }

    fn assert_driver_invariant(ride: &Ride) {
        assert_eq!(ride.driver_id.is_some(), ride.status.holds_driver());
    }

    #[test]
    fn new_ride_is_pending_without_driver() {
        let ride = ride();
        assert_eq!(ride.status, RideStatus::Pending);
        assert_eq!(ride.assignment_attempts, 0);
        assert!(ride.assignment_history.is_empty());
        assert_driver_invariant(&ride);
    }

    #[test]
    fn assign_then_reject_keeps_history_and_clears_driver() {
        let mut ride = ride();
        let driver = Uuid::new_v4();

        ride.apply(&Transition::Assign { driver_id: driver }, Utc::now());
        assert_eq!(ride.status, RideStatus::Assigned);
        assert_eq!(ride.assignment_attempts, 1);
        assert_driver_invariant(&ride);

        ride.apply(&Transition::Reject, Utc::now());
        assert_eq!(ride.status, RideStatus::Pending);
        assert_eq!(ride.assignment_history, vec![driver]);
        assert_driver_invariant(&ride);
    }

    #[test]
    fn history_never_holds_duplicates() {
        let mut ride = ride();
        let driver = Uuid::new_v4();

        ride.apply(&Transition::Assign { driver_id: driver }, Utc::now());
        ride.apply(&Transition::Reject, Utc::now());
        ride.apply(&Transition::Assign { driver_id: driver }, Utc::now());

        assert_eq!(ride.assignment_history.len(), 1);
        assert_eq!(ride.assignment_attempts, 2);
    }

    #[test]
    fn full_trip_stamps_times() {
        let mut ride = ride();
        let driver = Uuid::new_v4();

        for transition in [
            Transition::Assign { driver_id: driver },
            Transition::Accept,
            Transition::Start,
            Transition::Complete,
        ] {
            ride.apply(&transition, Utc::now());
            assert_driver_invariant(&ride);
        }

        assert_eq!(ride.status, RideStatus::Completed);
        assert!(ride.start_time.is_some());
        assert!(ride.end_time.is_some());
        assert!(ride.status.is_terminal());
    }

    #[test]
    fn cancel_clears_driver_and_records_reason() {
        let mut ride = ride();
        ride.apply(
            &Transition::Assign {
                driver_id: Uuid::new_v4(),
            },
            Utc::now(),
        );
        ride.apply(
            &Transition::Cancel {
                reason: "passenger changed plans".to_string(),
            },
            Utc::now(),
        );

        assert_eq!(ride.status, RideStatus::Cancelled);
        assert_eq!(ride.cancel_reason.as_deref(), Some("passenger changed plans"));
        assert_driver_invariant(&ride);
    }

    #[test]
    fn guard_requires_driver_and_status() {
        let mut ride = ride();
        let driver = Uuid::new_v4();
        ride.apply(&Transition::Assign { driver_id: driver }, Utc::now());

        assert!(RideGuard::held_by(driver, RideStatus::Assigned).matches(&ride));
        assert!(!RideGuard::held_by(driver, RideStatus::Accepted).matches(&ride));
        assert!(!RideGuard::held_by(Uuid::new_v4(), RideStatus::Assigned).matches(&ride));
        assert!(!RideGuard::unassigned(RideStatus::Assigned).matches(&ride));
        assert!(RideGuard::new(&[RideStatus::Assigned], DriverMatch::Any).matches(&ride));
        assert!(RideGuard::observed(&ride).matches(&ride));
    }
}
