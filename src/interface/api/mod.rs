//! HTTP API

pub mod calls_handler;
pub mod dto;
pub mod metrics_handler;
pub mod realtime_ws;
pub mod router;

pub use calls_handler::AppState;
pub use metrics_handler::init_metrics;
pub use router::build_router;
