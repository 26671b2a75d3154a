//! Local media acquisition with placeholder fallback

use crate::domain::media::{MediaConstraints, MediaSource, MediaStream};
use crate::domain::shared::value_objects::SessionId;
use crate::domain::signaling::PeerRole;
use crate::infrastructure::media::{MediaDevices, MediaError, SyntheticMedia, VideoFrame};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Stream handed to the caller, who owns and must stop its tracks
pub struct AcquiredMedia {
    pub stream: MediaStream,
    pub source: MediaSource,
    /// Placeholder frames when the stream is synthetic
    pub frames: Option<watch::Receiver<VideoFrame>>,
}

pub struct MediaAcquirer {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    synthetic: SyntheticMedia,
}

impl MediaAcquirer {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        constraints: MediaConstraints,
        synthetic: SyntheticMedia,
    ) -> Self {
        Self {
            devices,
            constraints,
            synthetic,
        }
    }

    /// Capture from devices, or build a placeholder stream on any failure
    ///
    /// Only fails when the placeholder itself cannot be built.
    pub async fn acquire(
        &self,
        role: PeerRole,
        session_id: &SessionId,
    ) -> Result<AcquiredMedia, MediaError> {
        match self.devices.get_user_media(&self.constraints).await {
            Ok(stream) => {
                info!(
                    audio = stream.audio_tracks().count(),
                    video = stream.video_tracks().count(),
                    "Camera and microphone acquired"
                );
                Ok(AcquiredMedia {
                    stream,
                    source: MediaSource::Device,
                    frames: None,
                })
            }
            Err(e) => {
                warn!("Media devices unavailable ({}), falling back to placeholder", e);
                let (stream, frames) = self.synthetic.build(role, session_id)?;
                Ok(AcquiredMedia {
                    stream,
                    source: MediaSource::Synthetic,
                    frames: Some(frames),
                })
            }
        }
    }
}
