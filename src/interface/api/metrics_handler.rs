//! Prometheus metrics handler

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and describe the call metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!("call_starts_total", "Calls started by a controller");
    describe_counter!(
        "call_connections_total",
        "Peer connections that reached the connected state"
    );
    describe_counter!("call_retries_total", "Peer connection retries scheduled");
    describe_counter!(
        "call_failures_total",
        "Calls that failed after all retries"
    );
    describe_counter!(
        "signaling_errors_total",
        "Signaling messages that could not be processed"
    );
    describe_gauge!("realtime_members", "Subscribers across realtime topics");

    Ok(handle)
}

/// HTTP metrics handler
pub async fn metrics_handler(
    axum::extract::State(prometheus_handle): axum::extract::State<PrometheusHandle>,
) -> Response {
    let metrics = prometheus_handle.render();
    (StatusCode::OK, metrics).into_response()
}
