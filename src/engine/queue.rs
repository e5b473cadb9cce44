use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// The depth gauge is raised before the send so the worker's decrement can
/// never run first.
pub async fn enqueue_dispatch(state: &AppState, ride_id: Uuid) -> Result<(), AppError> {
    state.metrics.dispatch_queue_depth.inc();

    if let Err(err) = state.dispatch_tx.send(ride_id).await {
        state.metrics.dispatch_queue_depth.dec();
        return Err(AppError::Internal(format!("dispatch queue send failed: {err}")));
    }
    Ok(())
}

/// Drains the dispatch queue, running each dispatch as its own task.
pub async fn run_dispatch_worker(state: Arc<AppState>, mut ride_rx: mpsc::Receiver<Uuid>) {
    info!("dispatch worker started");

    while let Some(ride_id) = ride_rx.recv().await {
        state.metrics.dispatch_queue_depth.dec();

        let dispatcher = state.dispatcher.clone();
        tokio::spawn(async move {
            match dispatcher.dispatch(ride_id).await {
                Ok(outcome) => info!(
                    ride_id = %ride_id,
                    outcome = outcome.label(),
                    "queued dispatch finished"
                ),
                Err(err) => error!(ride_id = %ride_id, error = %err, "queued dispatch failed"),
            }
        });
    }

    warn!("dispatch worker stopped: queue channel closed");
}
