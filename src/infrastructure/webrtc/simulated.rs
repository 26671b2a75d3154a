//! In-process peer connections
//!
//! Negotiation follows browser ordering: an answer needs a local offer,
//! candidates need a remote description, and the connection comes up once
//! both descriptions and one remote candidate are applied.

use super::{ConnectionObserver, PeerConnection, PeerConnectionFactory, PeerError};
use crate::domain::connection::{ConnectionSignal, ConnectionState};
use crate::domain::media::{MediaKind, MediaTrack, TrackSettings};
use crate::domain::signaling::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

struct SimState {
    local_tracks: Vec<(String, MediaTrack)>,
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_candidates: usize,
    state: ConnectionState,
}

/// Simulated connection created by `SimulatedPeerFactory`
pub struct SimulatedPeerConnection {
    number: u64,
    fail: bool,
    observer: ConnectionObserver,
    state: Mutex<SimState>,
}

impl SimulatedPeerConnection {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sequence number of this connection within its factory
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Drive the connection into `state`, as a network event would
    pub fn force_state(&self, state: ConnectionState) {
        let mut guard = self.lock();
        if guard.state == ConnectionState::Closed {
            return;
        }
        guard.state = state;
        drop(guard);
        (self.observer)(ConnectionSignal::StateChanged(state));
    }

    fn render_sdp(&self, tracks: &[(String, MediaTrack)]) -> String {
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.number
        );
        for (mid, (stream_id, track)) in tracks.iter().enumerate() {
            let _ = write!(
                sdp,
                "m={} 9 UDP/TLS/RTP/SAVPF {}\r\na=mid:{}\r\na=msid:{} {}\r\n",
                track.kind().as_str(),
                if track.kind() == MediaKind::Audio { 111 } else { 96 },
                mid,
                stream_id,
                track.id()
            );
        }
        sdp
    }

    fn local_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2122260223 10.0.0.{} {} typ host",
                self.number,
                self.number % 250 + 1,
                50000 + self.number
            ),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    /// Connection progress after a description or candidate was applied
    fn progress(&self, guard: &mut SimState, signals: &mut Vec<ConnectionSignal>) {
        if guard.local.is_none() || guard.remote.is_none() {
            return;
        }
        if guard.state == ConnectionState::New {
            guard.state = ConnectionState::Connecting;
            signals.push(ConnectionSignal::StateChanged(ConnectionState::Connecting));
        }
        if guard.state == ConnectionState::Connecting && guard.remote_candidates > 0 {
            let next = if self.fail {
                ConnectionState::Failed
            } else {
                ConnectionState::Connected
            };
            guard.state = next;
            signals.push(ConnectionSignal::StateChanged(next));
        }
    }

    fn emit(&self, signals: Vec<ConnectionSignal>) {
        for signal in signals {
            (self.observer)(signal);
        }
    }

    fn ensure_open(guard: &SimState) -> Result<(), PeerError> {
        if guard.state == ConnectionState::Closed {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }
}

fn parse_remote_tracks(sdp: &str) -> Vec<(String, MediaTrack)> {
    let mut tracks = Vec::new();
    let mut kind = None;
    for line in sdp.lines() {
        if let Some(rest) = line.strip_prefix("m=") {
            kind = match rest.split_whitespace().next() {
                Some("audio") => Some(MediaKind::Audio),
                Some("video") => Some(MediaKind::Video),
                _ => None,
            };
        } else if let Some(rest) = line.strip_prefix("a=msid:") {
            let mut parts = rest.split_whitespace();
            if let (Some(kind), Some(stream_id), Some(track_id)) = (kind, parts.next(), parts.next()) {
                let track = MediaTrack::with_id(
                    track_id,
                    kind,
                    format!("remote {}", kind.as_str()),
                    TrackSettings::default(),
                );
                tracks.push((stream_id.to_string(), track));
            }
        }
    }
    tracks
}

#[async_trait]
impl PeerConnection for SimulatedPeerConnection {
    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), PeerError> {
        let mut guard = self.lock();
        Self::ensure_open(&guard)?;
        if guard.local_tracks.iter().any(|(_, t)| t.id() == track.id()) {
            return Err(PeerError::Track(format!("Track {} already added", track.id())));
        }
        guard.local_tracks.push((stream_id.to_string(), track.clone()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let mut guard = self.lock();
        Self::ensure_open(&guard)?;
        if guard.signaling != SignalingState::Stable {
            return Err(PeerError::Sdp(format!(
                "Cannot create offer in {:?}",
                guard.signaling
            )));
        }
        let offer = SessionDescription::offer(self.render_sdp(&guard.local_tracks));
        guard.local = Some(offer.clone());
        guard.signaling = SignalingState::HaveLocalOffer;

        let mut signals = vec![ConnectionSignal::LocalCandidate(self.local_candidate())];
        self.progress(&mut guard, &mut signals);
        drop(guard);

        debug!(connection = self.number, "Simulated offer created");
        self.emit(signals);
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let mut guard = self.lock();
        Self::ensure_open(&guard)?;
        if guard.signaling != SignalingState::HaveRemoteOffer {
            return Err(PeerError::Sdp("Cannot create answer without a remote offer".to_string()));
        }
        let answer = SessionDescription::answer(self.render_sdp(&guard.local_tracks));
        guard.local = Some(answer.clone());
        guard.signaling = SignalingState::Stable;

        let mut signals = vec![ConnectionSignal::LocalCandidate(self.local_candidate())];
        self.progress(&mut guard, &mut signals);
        drop(guard);

        debug!(connection = self.number, "Simulated answer created");
        self.emit(signals);
        Ok(answer)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let mut guard = self.lock();
        Self::ensure_open(&guard)?;
        match (desc.kind, guard.signaling) {
            (SdpKind::Offer, SignalingState::Stable) => {
                guard.signaling = SignalingState::HaveRemoteOffer;
            }
            (SdpKind::Answer, SignalingState::HaveLocalOffer) => {
                guard.signaling = SignalingState::Stable;
            }
            (kind, state) => {
                return Err(PeerError::Sdp(format!(
                    "Cannot apply remote {:?} in {:?}",
                    kind, state
                )));
            }
        }

        let mut signals: Vec<ConnectionSignal> = parse_remote_tracks(&desc.sdp)
            .into_iter()
            .map(|(stream_id, track)| ConnectionSignal::RemoteTrack { stream_id, track })
            .collect();
        guard.remote = Some(desc);
        self.progress(&mut guard, &mut signals);
        drop(guard);

        self.emit(signals);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let mut guard = self.lock();
        Self::ensure_open(&guard)?;
        if guard.remote.is_none() {
            return Err(PeerError::Ice(
                "Remote description is not set".to_string(),
            ));
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(PeerError::Ice(format!("Malformed candidate: {}", candidate.candidate)));
        }
        guard.remote_candidates += 1;

        let mut signals = Vec::new();
        self.progress(&mut guard, &mut signals);
        drop(guard);

        self.emit(signals);
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        let mut guard = self.lock();
        guard.state = ConnectionState::Closed;
        debug!(connection = self.number, "Simulated connection closed");
        Ok(())
    }
}

/// Factory of simulated connections
///
/// `fail_next(n)` makes the next `n` connections fail instead of
/// connecting.
#[derive(Default)]
pub struct SimulatedPeerFactory {
    created: AtomicU64,
    failures: AtomicU32,
    connections: Mutex<Vec<Arc<SimulatedPeerConnection>>>,
}

impl SimulatedPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of connections created so far
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn last_connection(&self) -> Option<Arc<SimulatedPeerConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }
}

#[async_trait]
impl PeerConnectionFactory for SimulatedPeerFactory {
    async fn create(
        &self,
        _ice_servers: &[String],
        observer: ConnectionObserver,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let number = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let connection = Arc::new(SimulatedPeerConnection {
            number,
            fail,
            observer,
            state: Mutex::new(SimState {
                local_tracks: Vec::new(),
                signaling: SignalingState::Stable,
                local: None,
                remote: None,
                remote_candidates: 0,
                state: ConnectionState::New,
            }),
        });
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(connection.clone());

        debug!(connection = number, fail, "Simulated peer connection created");
        Ok(connection)
    }
}
