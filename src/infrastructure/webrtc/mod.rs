//! Peer connection backends
//!
//! `RtcPeerFactory` drives real connections through webrtc-rs.
//! `SimulatedPeerFactory` is an in-process stand-in with the same ordering
//! rules, used by the demo and tests.

pub mod rtc;
pub mod simulated;

use crate::config::PeerBackend;
use crate::domain::connection::ConnectionSignal;
use crate::domain::media::MediaTrack;
use crate::domain::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use rtc::RtcPeerFactory;
pub use simulated::{SimulatedPeerConnection, SimulatedPeerFactory};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Failed to create peer connection: {0}")]
    Create(String),

    #[error("Session description error: {0}")]
    Sdp(String),

    #[error("ICE candidate error: {0}")]
    Ice(String),

    #[error("Track error: {0}")]
    Track(String),

    #[error("Failed to close peer connection: {0}")]
    Close(String),

    #[error("Peer connection is closed")]
    Closed,
}

/// Receives connection callbacks as values
pub type ConnectionObserver = Arc<dyn Fn(ConnectionSignal) + Send + Sync>;

/// One negotiated connection to the remote peer
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Send `track` as part of `stream_id`
    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), PeerError>;

    /// Create an offer and apply it locally
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    /// Create an answer to the applied remote offer and apply it locally
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Fails when no remote description is set
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    /// Close without touching the local tracks
    async fn close(&self) -> Result<(), PeerError>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[String],
        observer: ConnectionObserver,
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

/// Factory for the configured backend
pub fn peer_factory(backend: PeerBackend) -> Arc<dyn PeerConnectionFactory> {
    match backend {
        PeerBackend::Simulated => Arc::new(SimulatedPeerFactory::new()),
        PeerBackend::Webrtc => Arc::new(RtcPeerFactory::new()),
    }
}
