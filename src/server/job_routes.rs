//! Job control and status endpoints.
//!
//! `POST /jobs/{resource_id}/start` and `GET /jobs/{resource_id}/status` both
//! answer with a [`JobStatusInfo`]. The status endpoint reads the job store
//! only; it never looks at the engine.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::error;

use super::state::{GuardedJobRunner, GuardedJobStore, ServerState};
use crate::jobs::{is_valid_resource_id, JobStatusInfo, StartError};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

async fn start_job(
    State(runner): State<GuardedJobRunner>,
    Path(resource_id): Path<String>,
) -> Response {
    match runner.start(&resource_id) {
        Ok(outcome) => Json(JobStatusInfo::from(outcome.into_record())).into_response(),
        Err(err @ StartError::InvalidResourceId(_)) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        Err(err @ StartError::ResourceNotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, err.to_string())
        }
        Err(StartError::Store(err)) => {
            error!("Failed to start job {}: {:#}", resource_id, err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "job store error")
        }
    }
}

async fn get_job_status(
    State(store): State<GuardedJobStore>,
    Path(resource_id): Path<String>,
) -> Response {
    if !is_valid_resource_id(&resource_id) {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid resource id: {:?}", resource_id),
        );
    }

    match store.get_job_or_default(&resource_id) {
        Ok(record) => Json(JobStatusInfo::from(record)).into_response(),
        Err(err) => {
            error!("Failed to read job {}: {:#}", resource_id, err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "job store error")
        }
    }
}

pub fn make_job_routes(state: ServerState) -> Router {
    Router::new()
        .route("/{resource_id}/start", post(start_job))
        .route("/{resource_id}/status", get(get_job_status))
        .with_state(state)
}
