use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch::DispatchOutcome;
use crate::engine::lifecycle::{ActionOutcome, DriverAction};
use crate::engine::queue::enqueue_dispatch;
use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::ride::{Ride, RideStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rides", post(create_ride).get(list_active_rides))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/accept", patch(accept_ride))
        .route("/rides/:id/reject", patch(reject_ride))
        .route("/rides/:id/start", patch(start_ride))
        .route("/rides/:id/complete", patch(complete_ride))
        .route("/rides/:id/cancel", patch(cancel_ride))
        .route("/rides/:id/dispatch", post(dispatch_ride))
}

#[derive(Deserialize)]
pub struct CreateRideRequest {
    pub passenger_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub estimated_fare: Option<f64>,
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize, Default)]
pub struct CancelRideRequest {
    pub reason: Option<String>,
}

async fn create_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRideRequest>,
) -> Result<(StatusCode, Json<Ride>), AppError> {
    let fare = payload.estimated_fare.unwrap_or(0.0);
    if !fare.is_finite() || fare < 0.0 {
        return Err(AppError::BadRequest(
            "estimated_fare must be a non-negative number".to_string(),
        ));
    }

    let ride = Ride::new(payload.passenger_id, payload.pickup, payload.dropoff, fare);
    let ride = state.rides.insert(ride).await?;
    enqueue_dispatch(&state, ride.id).await?;

    Ok((StatusCode::CREATED, Json(ride)))
}

async fn list_active_rides(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Ride>>, AppError> {
    Ok(Json(state.rides.list_by_status(&RideStatus::ACTIVE).await?))
}

async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    let ride = state
        .rides
        .get(id)
        .await?
        .ok_or_else(|| AppError::ride_not_found(id))?;

    Ok(Json(ride))
}

async fn perform(
    state: &AppState,
    action: DriverAction,
    ride_id: Uuid,
    payload: DriverActionRequest,
) -> Result<Json<ActionOutcome>, AppError> {
    let outcome = state
        .lifecycle
        .perform(action, ride_id, payload.driver_id)
        .await?;
    Ok(Json(outcome))
}

async fn accept_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<ActionOutcome>, AppError> {
    perform(&state, DriverAction::Accept, id, payload).await
}

async fn reject_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<ActionOutcome>, AppError> {
    perform(&state, DriverAction::Reject, id, payload).await
}

async fn start_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<ActionOutcome>, AppError> {
    perform(&state, DriverAction::Start, id, payload).await
}

async fn complete_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<ActionOutcome>, AppError> {
    perform(&state, DriverAction::Complete, id, payload).await
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelRideRequest>>,
) -> Result<Json<Ride>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    let ride = state.lifecycle.cancel(id, payload.reason).await?;
    Ok(Json(ride))
}

/// Externally scheduled retry for a ride still pending.
async fn dispatch_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchOutcome>, AppError> {
    Ok(Json(state.dispatcher.dispatch(id).await?))
}
