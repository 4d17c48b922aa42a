//! `GET /health`, spec §6: `200 {status:"healthy", checks:{storage:"ok"|"error"}}`.

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let storage_ok = state.store.health_check().await.is_ok();

    let body = serde_json::json!({
        "status": "healthy",
        "checks": {
            "storage": if storage_ok { "ok" } else { "error" },
        },
    });

    (StatusCode::OK, Json(body))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
