//! Local and remote media handles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Where the local stream came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    /// Hardware capture
    Device,
    /// Generated placeholder stream
    Synthetic,
}

/// Negotiated settings of a track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    pub facing_mode: Option<String>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub auto_gain_control: Option<bool>,
}

/// Capture hints passed to the device layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing_mode: String,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            facing_mode: "user".to_string(),
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

type StopHook = Box<dyn FnOnce() + Send>;

struct TrackInner {
    id: String,
    kind: MediaKind,
    label: String,
    settings: TrackSettings,
    enabled: AtomicBool,
    stopped: AtomicBool,
    on_stop: Mutex<Option<StopHook>>,
}

/// Shared handle to one media track
///
/// Clones refer to the same track. Stopping runs the release hook of the
/// producer exactly once.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: MediaKind, label: impl Into<String>, settings: TrackSettings) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), kind, label, settings)
    }

    pub fn with_id(
        id: impl Into<String>,
        kind: MediaKind,
        label: impl Into<String>,
        settings: TrackSettings,
    ) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: label.into(),
                settings,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                on_stop: Mutex::new(None),
            }),
        }
    }

    /// Register the producer release hook
    pub fn on_stop(self, hook: impl FnOnce() + Send + 'static) -> Self {
        if let Ok(mut slot) = self.inner.on_stop.lock() {
            *slot = Some(Box::new(hook));
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn settings(&self) -> &TrackSettings {
        &self.inner.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Mute or unmute without releasing the source
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Release the source; returns false if the track was already stopped
    pub fn stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        let hook = self
            .inner
            .on_stop
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(hook) = hook {
            hook();
        }
        true
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Group of tracks sharing a stream id
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_tracks(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        if !self.tracks.iter().any(|t| t.id() == track.id()) {
            self.tracks.push(track);
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == MediaKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == MediaKind::Video)
    }

    /// Enable or disable every track of `kind`
    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) {
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    /// Stop every track; returns how many were stopped by this call
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}
