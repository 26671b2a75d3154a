//! Capture devices

use super::{MediaDevices, MediaError};
use crate::domain::media::{MediaConstraints, MediaStream};
use async_trait::async_trait;
use tracing::debug;

/// Device layer of a host without cameras or microphones
#[derive(Debug, Default, Clone)]
pub struct HeadlessDevices;

#[async_trait]
impl MediaDevices for HeadlessDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaError> {
        debug!(
            width = constraints.ideal_width,
            height = constraints.ideal_height,
            "Capture requested on a headless host"
        );
        Err(MediaError::DeviceNotFound(
            "no camera or microphone attached".to_string(),
        ))
    }
}
