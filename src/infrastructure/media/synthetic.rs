//! Generated placeholder stream
//!
//! An animated gradient video track captioned with the negotiation role
//! and session, plus a silent audio track.

use super::MediaError;
use crate::config::{MediaConfig, MAX_SYNTHETIC_FRAME_RATE};
use crate::domain::media::{MediaKind, MediaStream, MediaTrack, TrackSettings};
use crate::domain::shared::value_objects::SessionId;
use crate::domain::signaling::PeerRole;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// One frame of the placeholder video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// Gradient start hue in degrees
    pub hue_start: u32,
    /// Gradient end hue in degrees
    pub hue_end: u32,
    pub caption: Vec<String>,
}

impl VideoFrame {
    fn at(index: u64, width: u32, height: u32, caption: &[String]) -> Self {
        Self {
            index,
            width,
            height,
            hue_start: (index % 360) as u32,
            hue_end: ((index + 120) % 360) as u32,
            caption: caption.to_vec(),
        }
    }

    /// Render the diagonal gradient as packed RGB
    pub fn render_rgb(&self) -> Vec<u8> {
        let w = self.width.max(1) as f32;
        let h = self.height.max(1) as f32;
        let mut buf = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let t = (x as f32 / w + y as f32 / h) / 2.0;
                let hue = lerp_hue(self.hue_start as f32, self.hue_end as f32, t);
                let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.5);
                buf.extend_from_slice(&[r, g, b]);
            }
        }
        buf
    }
}

fn lerp_hue(from: f32, to: f32, t: f32) -> f32 {
    let mut delta = to - from;
    if delta < 0.0 {
        delta += 360.0;
    }
    (from + delta * t) % 360.0
}

fn hsl_to_rgb(hue: f32, saturation: f32, lightness: f32) -> (u8, u8, u8) {
    let c = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
    let h = hue / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = lightness - c / 2.0;
    let to_byte = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (to_byte(r), to_byte(g), to_byte(b))
}

/// Builder of placeholder streams
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    width: u32,
    height: u32,
    frame_rate: u32,
}

impl SyntheticMedia {
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(
            config.synthetic_width,
            config.synthetic_height,
            config.synthetic_frame_rate,
        )
    }

    /// Build the stream and start its frame clock
    ///
    /// Returns the stream and a receiver of the latest frame. Stopping the
    /// video track stops the clock.
    pub fn build(
        &self,
        role: PeerRole,
        session_id: &SessionId,
    ) -> Result<(MediaStream, watch::Receiver<VideoFrame>), MediaError> {
        if self.width == 0
            || self.height == 0
            || !(1..=MAX_SYNTHETIC_FRAME_RATE).contains(&self.frame_rate)
        {
            return Err(MediaError::NoStream(format!(
                "invalid placeholder format {}x{}@{}",
                self.width, self.height, self.frame_rate
            )));
        }

        let caption = vec![
            "TEST CAMERA".to_string(),
            role.label().to_string(),
            format!("Session: {}...", session_id.short()),
        ];
        let (frame_tx, frame_rx) =
            watch::channel(VideoFrame::at(0, self.width, self.height, &caption));

        let width = self.width;
        let height = self.height;
        let period = Duration::from_micros(1_000_000 / self.frame_rate as u64);
        let clock = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut index = 0u64;
            loop {
                ticker.tick().await;
                index += 1;
                if frame_tx
                    .send(VideoFrame::at(index, width, height, &caption))
                    .is_err()
                {
                    break;
                }
            }
        });

        let video = MediaTrack::new(
            MediaKind::Video,
            "synthetic camera",
            TrackSettings {
                width: Some(self.width),
                height: Some(self.height),
                frame_rate: Some(self.frame_rate),
                ..Default::default()
            },
        )
        .on_stop(move || {
            clock.abort();
            debug!("Placeholder video clock stopped");
        });

        let audio = MediaTrack::new(MediaKind::Audio, "silent audio", TrackSettings::default());

        info!(
            role = %role,
            width = self.width,
            height = self.height,
            "Using generated placeholder stream"
        );
        let stream = MediaStream::with_tracks(Uuid::new_v4().to_string(), vec![video, audio]);
        Ok((stream, frame_rx))
    }
}
