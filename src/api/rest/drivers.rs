use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{Driver, DriverStatus, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/location", patch(update_driver_location))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
    pub location: GeoPoint,
    pub status: Option<DriverStatus>,
    pub rating: Option<f64>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lng) {
        return Err(AppError::BadRequest(format!(
            "coordinates out of range: ({}, {})",
            point.lat, point.lng
        )));
    }
    Ok(())
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    validate_point(&payload.location)?;

    let mut driver = Driver::new(payload.name, payload.location);
    if let Some(status) = payload.status {
        driver.status = status;
    }
    if let Some(rating) = payload.rating {
        driver.rating = rating.clamp(0.0, 5.0);
    }

    let driver = state.drivers.insert(driver).await?;
    refresh_cache(&state, &driver).await;

    Ok(Json(driver))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .get(id)
        .await?
        .ok_or_else(|| AppError::driver_not_found(id))?;

    Ok(Json(driver))
}

/// 409 while the driver holds an active ride, unless the new status is
/// `on_trip`.
async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state.availability.set_status(id, payload.status).await?;
    Ok(Json(driver))
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Driver>, AppError> {
    validate_point(&payload.location)?;

    let driver = state
        .drivers
        .set_location(id, payload.location)
        .await?
        .ok_or_else(|| AppError::driver_not_found(id))?;

    if let Err(err) = state.cache.cache_location(id, &driver.location).await {
        warn!(driver_id = %id, error = %err, "failed to cache driver location");
    }

    Ok(Json(driver))
}

async fn refresh_cache(state: &AppState, driver: &Driver) {
    if let Err(err) = state.cache.cache_status(driver.id, driver.status).await {
        warn!(driver_id = %driver.id, error = %err, "failed to cache driver status");
    }
    if let Err(err) = state.cache.cache_location(driver.id, &driver.location).await {
        warn!(driver_id = %driver.id, error = %err, "failed to cache driver location");
    }
}
