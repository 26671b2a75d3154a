//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Call session store implementations (in-memory, PostgreSQL)
//! - The realtime pub/sub substrate and its WebSocket client
//! - Peer connection backends (webrtc-rs, simulated)
//! - Local media sources

pub mod media;
pub mod persistence;
pub mod realtime;
pub mod webrtc;
