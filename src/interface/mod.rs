//! Interface layer - External interfaces
//!
//! This layer handles:
//! - REST endpoints for call sessions and bookings
//! - The realtime WebSocket hub
//! - Prometheus metrics

pub mod api;
