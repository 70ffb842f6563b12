//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::{require_token, require_writable};
use crate::upload::upload_ws;
use crate::ws::events_ws;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let writable = middleware::from_fn_with_state(state.clone(), require_writable);

    // Protected routes (require the bearer token when one is configured)
    let protected_routes = Router::new()
        .route("/ws/events", get(events_ws))
        .route(
            "/ws/upload/{session_id}",
            get(upload_ws).route_layer(writable.clone()),
        )
        .route("/api/messages", get(handlers::missing_session_id))
        .route("/api/messages/", get(handlers::missing_session_id))
        .route("/api/messages/{session_id}", get(handlers::get_messages))
        .route(
            "/api/sessions",
            get(handlers::list_sessions)
                .merge(post(handlers::create_session).route_layer(writable.clone())),
        )
        .route(
            "/api/sessions/{session_id}",
            delete(handlers::delete_session).route_layer(writable.clone()),
        )
        .route(
            "/api/sessions/{session_id}/status",
            post(handlers::set_session_status).route_layer(writable),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_token,
        ));

    // Public routes (no authentication)
    let public_routes = Router::new().route("/health", get(handlers::health));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .with_state(state)
        .layer(cors)
        .layer(trace_layer)
}

/// Build the CORS layer from the configured origins.
///
/// With no origins configured cross-origin requests are not allowed.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .settings
        .allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::new();
    }

    tracing::info!("CORS: Allowing {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}
