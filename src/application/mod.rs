//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects and infrastructure ports to run
//! a call: the per-participant controller, launching calls from a booking
//! and notifying callees.

pub mod call;
