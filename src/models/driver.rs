use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    OnTrip,
    Offline,
}

impl DriverStatus {
    /// Wire form shared by the REST surface and the coordination cache.
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Available => "available",
            DriverStatus::OnTrip => "on_trip",
            DriverStatus::Offline => "offline",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "available" => Some(DriverStatus::Available),
            "on_trip" => Some(DriverStatus::OnTrip),
            "offline" => Some(DriverStatus::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub status: DriverStatus,
    pub rating: f64,
    pub acceptance_rate: f64,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn new(name: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            location,
            status: DriverStatus::Offline,
            rating: 4.5,
            acceptance_rate: 100.0,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    pub fn is_dispatchable(&self) -> bool {
        self.is_active && self.status == DriverStatus::Available
    }
}

#[cfg(test)]
mod tests {
    use super::DriverStatus;

    #[test]
    fn status_wire_form_parses_back() {
        for status in [
            DriverStatus::Available,
            DriverStatus::OnTrip,
            DriverStatus::Offline,
        ] {
            assert_eq!(DriverStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DriverStatus::parse("busy"), None);
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&DriverStatus::OnTrip).unwrap();
        assert_eq!(json, "\"on_trip\"");
    }
}
