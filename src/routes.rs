// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers::session, state::AppState, utils::jwt::auth_middleware};

/// Assembles the main application router.
///
/// * Session lifecycle routes, all behind the auth middleware.
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool + config + engine settings).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let session_routes = Router::new()
        .route("/", post(session::create_session))
        .route("/{id}/resume", post(session::resume_session))
        .route("/{id}/next", get(session::next_item))
        .route("/{id}/answers", post(session::submit_answer))
        .route("/{id}/submit", post(session::submit_exam))
        .route("/{id}/time", get(session::remaining_time))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/sessions", session_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
