//! HTTP binding for the job engine façade (spec §6.2): `Initiate`, `Status`,
//! `Resolve`. Error mapping follows the teacher's
//! `Result<Json<T>, (StatusCode, Json<Value>)>` convention (grounded on
//! `rcommerce-api::routes::checkout`).

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use filestage_core::engine::{EngineError, InitiateRequest, JobId, JobRecord, ResolveOutcome};

use crate::state::AppState;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn engine_error_response(err: EngineError) -> ApiError {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match &err {
        EngineError::ServiceBusy { next_poll_in_ms } => serde_json::json!({
            "error": err.kind(),
            "message": err.to_string(),
            "nextPollInMs": next_poll_in_ms,
        }),
        _ => serde_json::json!({
            "error": err.kind(),
            "message": err.to_string(),
        }),
    };
    (status, Json(body))
}

fn record_payload(record: &JobRecord) -> serde_json::Value {
    serde_json::json!({
        "jobId": record.job_id,
        "fileIds": record.file_ids,
        "clientRequestId": record.client_request_id,
        "userId": record.user_id,
        "priority": record.priority,
        "status": record.status,
        "progressPercent": record.progress_percent,
        "message": record.message,
        "attempts": record.attempts,
        "maxAttempts": record.max_attempts,
        "result": record.result,
        "error": record.error,
        "retryAfterMs": record.retry_after_ms,
        "createdAt": record.created_at,
        "startedAt": record.started_at,
        "completedAt": record.completed_at,
        "expiresAt": record.expires_at,
        "updatedAt": record.updated_at,
    })
}

/// `POST /v1/download/initiate`
pub async fn initiate(
    State(state): State<AppState>,
    Json(request): Json<InitiateRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    match state.jobs.initiate(request).await {
        Ok(resp) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "jobId": resp.job_id,
                "status": resp.status,
                "nextPollInMs": resp.next_poll_in_ms,
                "expiresAt": resp.expires_at,
                "totalFileIds": resp.total_file_ids,
            })),
        )),
        Err(e) => {
            tracing::warn!("initiate rejected: {}", e);
            Err(engine_error_response(e))
        }
    }
}

/// `GET /v1/download/status/:jobId`
pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.jobs.status(job_id).await {
        Ok(record) => Ok(Json(record_payload(&record))),
        Err(e) => Err(engine_error_response(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// `GET /v1/download/:jobId`
///
/// 302 to the presigned URL on completion; `?format=json` returns the JSON
/// body that would otherwise only back the redirect's `Location` header.
pub async fn resolve(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Query(query): Query<ResolveQuery>,
) -> Response {
    let wants_json = query.format.as_deref() == Some("json");

    match state.jobs.resolve(job_id).await {
        ResolveOutcome::Redirect { url } => {
            if wants_json {
                Json(serde_json::json!({ "status": "completed", "url": url })).into_response()
            } else {
                (
                    StatusCode::FOUND,
                    [(header::LOCATION, url)],
                )
                    .into_response()
            }
        }
        ResolveOutcome::NotReady(record) => {
            (StatusCode::CONFLICT, Json(record_payload(&record))).into_response()
        }
        ResolveOutcome::Gone(record) => {
            (StatusCode::GONE, Json(record_payload(&record))).into_response()
        }
        ResolveOutcome::NotFound => engine_error_response(EngineError::NotFound(job_id)).into_response(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/download/initiate", post(initiate))
        .route("/v1/download/status/:jobId", get(status))
        .route("/v1/download/:jobId", get(resolve))
}
