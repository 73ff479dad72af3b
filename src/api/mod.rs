//! API layer -- axum routes, handlers, and middleware.

mod routes;
pub mod sse;
pub mod state;

use std::path::Path;

use self::state::AppState;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Build the application router with all API routes.
///
/// When `static_dir` is given, unmatched paths are served from it so the
/// front-end page can live next to the API.
pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let app = Router::new()
        .route("/health", get(routes::health))
        .nest("/api", routes::api_routes());

    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app.fallback(fallback),
    };

    app.with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
