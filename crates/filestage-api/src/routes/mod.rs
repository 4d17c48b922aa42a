pub mod download;
pub mod health;

pub use download::router as download_router;
pub use health::router as health_router;

use crate::state::AppState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Assembles the full router: health check and download endpoints, plus
/// CORS and request tracing layered on top. Grounded on
/// `rcommerce-api::routes::create_router`'s layering order (routes, then
/// CORS, then `TraceLayer`).
pub fn create_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health_router())
        .merge(download_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
