//! Local media sources
//!
//! Hardware capture behind `MediaDevices`, and the generated placeholder
//! stream used when capture is unavailable.

pub mod devices;
pub mod synthetic;

use crate::domain::media::{MediaConstraints, MediaStream};
use async_trait::async_trait;
use thiserror::Error;

pub use devices::HeadlessDevices;
pub use synthetic::{SyntheticMedia, VideoFrame};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Permission to use media devices was denied")]
    PermissionDenied,

    #[error("No media device found: {0}")]
    DeviceNotFound(String),

    #[error("Media device is busy: {0}")]
    DeviceBusy(String),

    #[error("No stream available: {0}")]
    NoStream(String),
}

/// Hardware capture
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open camera and microphone honoring `constraints` as hints
    async fn get_user_media(&self, constraints: &MediaConstraints)
        -> Result<MediaStream, MediaError>;
}
