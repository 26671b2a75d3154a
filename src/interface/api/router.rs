//! API Router configuration

use super::calls_handler::{decline_call, get_call_session, health_check, join_booking_call, AppState};
use super::metrics_handler::metrics_handler;
use super::realtime_ws::realtime_ws_handler;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    let health_routes = Router::new().route("/health", get(health_check));

    let call_routes = Router::new()
        .route("/api/call-sessions/:id", get(get_call_session))
        .route("/api/call-sessions/:id/decline", post(decline_call))
        .route("/api/bookings/:id/call", post(join_booking_call));

    let realtime_routes = Router::new().route("/realtime", get(realtime_ws_handler));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    Router::new()
        .merge(health_routes)
        .merge(call_routes)
        .merge(realtime_routes)
        .with_state(state)
        .merge(metrics_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
