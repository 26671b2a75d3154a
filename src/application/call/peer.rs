//! Peer connection manager
//!
//! Owns the one peer connection of a call. Connection callbacks, signaling
//! messages and timers all arrive as `PeerEvent`s and go through
//! `dispatch`, so every state change happens on the call task.

use super::error::{CallError, CallResult};
use super::signaling::SignalSink;
use super::state::CallSnapshot;
use crate::config::CallConfig;
use crate::domain::connection::{ConnectionSignal, ConnectionState};
use crate::domain::media::{MediaStream, MediaTrack};
use crate::domain::signaling::{
    IceCandidate, PeerRole, SessionDescription, SignalPayload, SignalingMessage,
};
use crate::infrastructure::webrtc::{
    ConnectionObserver, PeerConnection, PeerConnectionFactory, PeerError,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const RETRY_EXHAUSTED_MESSAGE: &str =
    "Connection failed after multiple attempts. Please try again.";

pub const SIGNALING_DATA_ERROR: &str = "Failed to process signaling data";

pub fn retry_message(attempt: u32, max_retries: u32) -> String {
    format!("Connection failed. Retrying ({}/{})...", attempt, max_retries)
}

/// Linear backoff: attempt `n` waits `n × backoff_step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub ice_servers: Vec<String>,
    pub retry: RetryPolicy,
    /// How long the initiator waits for the receiver's `ready`
    pub ready_timeout: Duration,
}

impl PeerSettings {
    pub fn from_config(config: &CallConfig) -> Self {
        Self {
            ice_servers: config.stun_servers.clone(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff_step: config.retry_backoff(),
            },
            ready_timeout: config.ready_timeout(),
        }
    }
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self::from_config(&CallConfig::default())
    }
}

/// Input of the manager's state machine
#[derive(Debug)]
pub enum PeerEvent {
    /// Callback of the connection built in `generation`
    Connection {
        generation: u64,
        signal: ConnectionSignal,
    },
    Signal(SignalingMessage),
    ReadyTimeout { generation: u64 },
    RetryDue { attempt: u32 },
}

/// What a dispatched event changed, for the controller to react on
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub state_changed: Option<ConnectionState>,
    pub remote_stream: Option<MediaStream>,
    pub retry_scheduled: Option<u32>,
    pub retries_exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Negotiation {
    Idle,
    AwaitingReady,
    OfferSent,
    Stable,
}

pub struct PeerConnectionManager {
    role: PeerRole,
    settings: PeerSettings,
    factory: Arc<dyn PeerConnectionFactory>,
    signals: Arc<dyn SignalSink>,
    events: mpsc::UnboundedSender<PeerEvent>,
    snapshot: Arc<watch::Sender<CallSnapshot>>,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    connection: Option<Arc<dyn PeerConnection>>,
    generation: u64,
    negotiation: Negotiation,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    local_candidates: Vec<IceCandidate>,
    last_offer: Option<SessionDescription>,
    last_answer: Option<SessionDescription>,
    applied_offer_sdp: Option<String>,
    state: ConnectionState,
    retry_count: u32,
    retry_timer: Option<JoinHandle<()>>,
    ready_timer: Option<JoinHandle<()>>,
    closed: bool,
}

impl PeerConnectionManager {
    /// Create the manager and the receiver of its event queue
    pub fn new(
        role: PeerRole,
        settings: PeerSettings,
        factory: Arc<dyn PeerConnectionFactory>,
        signals: Arc<dyn SignalSink>,
        snapshot: Arc<watch::Sender<CallSnapshot>>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            role,
            settings,
            factory,
            signals,
            events,
            snapshot,
            local_stream: None,
            remote_stream: None,
            connection: None,
            generation: 0,
            negotiation: Negotiation::Idle,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            local_candidates: Vec::new(),
            last_offer: None,
            last_answer: None,
            applied_offer_sdp: None,
            state: ConnectionState::New,
            retry_count: 0,
            retry_timer: None,
            ready_timer: None,
            closed: false,
        };
        (manager, rx)
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn has_pending_retry(&self) -> bool {
        self.retry_timer.is_some()
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.remote_stream.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Build the connection around `local_stream`
    ///
    /// A manager builds at most one connection this way; later builds only
    /// happen through retry or renegotiation.
    pub async fn create(&mut self, local_stream: MediaStream) -> CallResult<()> {
        if self.closed {
            return Err(PeerError::Closed.into());
        }
        if self.connection.is_some() {
            warn!(role = %self.role, "Peer connection already created");
            return Ok(());
        }

        let snapshot_stream = local_stream.clone();
        self.local_stream = Some(local_stream);
        self.snapshot
            .send_modify(|s| s.local_stream = Some(snapshot_stream));

        self.build_connection().await?;
        info!(
            role = %self.role,
            ice_servers = self.settings.ice_servers.len(),
            "Peer connection created"
        );
        self.publish_state();
        Ok(())
    }

    /// Announce readiness; the initiator then waits for the receiver
    pub async fn begin_negotiation(&mut self) -> CallResult<()> {
        self.signals.send_signal(SignalPayload::Ready)?;
        if self.role.is_initiator() {
            self.negotiation = Negotiation::AwaitingReady;
            self.arm_ready_timer();
            debug!(timeout_ms = self.settings.ready_timeout.as_millis() as u64, "Waiting for receiver");
        }
        Ok(())
    }

    pub async fn dispatch(&mut self, event: PeerEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if self.closed {
            return outcome;
        }
        let before = self.state;

        match event {
            PeerEvent::Connection { generation, signal } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "Ignoring event of a replaced connection");
                    return outcome;
                }
                match signal {
                    ConnectionSignal::StateChanged(state) => self.on_state_change(state, &mut outcome),
                    ConnectionSignal::LocalCandidate(candidate) => {
                        self.local_candidates.push(candidate.clone());
                        if let Err(e) = self
                            .signals
                            .send_signal(SignalPayload::IceCandidate(candidate))
                        {
                            warn!("Failed to send ICE candidate: {}", e);
                        }
                    }
                    ConnectionSignal::RemoteTrack { stream_id, track } => {
                        self.on_remote_track(stream_id, track);
                        outcome.remote_stream = self.remote_stream.clone();
                    }
                }
            }
            PeerEvent::Signal(message) => {
                if let Err(e) = self.handle_signal(message).await {
                    metrics::counter!("signaling_errors_total").increment(1);
                    warn!(role = %self.role, "Error handling signaling message: {}", e);
                    self.snapshot
                        .send_modify(|s| s.error = Some(SIGNALING_DATA_ERROR.to_string()));
                }
            }
            PeerEvent::ReadyTimeout { generation } => {
                self.ready_timer = None;
                if generation == self.generation && self.negotiation == Negotiation::AwaitingReady {
                    warn!("Receiver not ready in time, sending offer anyway");
                    if let Err(e) = self.send_offer().await {
                        warn!("Failed to send offer: {}", e);
                        self.snapshot
                            .send_modify(|s| s.error = Some(SIGNALING_DATA_ERROR.to_string()));
                    }
                }
            }
            PeerEvent::RetryDue { attempt } => {
                self.retry_timer = None;
                if self.state != ConnectionState::Failed {
                    debug!(attempt, state = %self.state, "Retry no longer needed");
                } else if let Err(e) = self.restart(attempt).await {
                    error!(attempt, "Retry attempt failed: {}", e);
                    self.fail_attempt(&mut outcome);
                }
            }
        }

        if self.state != before {
            outcome.state_changed = Some(self.state);
        }
        self.publish_state();
        outcome
    }

    pub async fn handle_signal(&mut self, message: SignalingMessage) -> CallResult<()> {
        debug!(
            kind = message.payload.kind(),
            from = %message.sender,
            "Signal received"
        );
        match message.payload {
            SignalPayload::Ready => self.on_ready().await,
            SignalPayload::Offer(offer) => self.handle_remote_offer(offer).await,
            SignalPayload::Answer(answer) => self.handle_remote_answer(answer).await,
            SignalPayload::IceCandidate(candidate) => {
                self.handle_remote_ice_candidate(candidate).await
            }
        }
    }

    /// Receiver only: apply the offer and answer it
    pub async fn handle_remote_offer(&mut self, offer: SessionDescription) -> CallResult<()> {
        if self.role.is_initiator() {
            return Err(CallError::Negotiation(
                "Initiator cannot accept an offer".to_string(),
            ));
        }

        if self.applied_offer_sdp.as_deref() == Some(offer.sdp.as_str()) {
            if let Some(answer) = self.last_answer.clone() {
                debug!("Duplicate offer, re-sending answer");
                self.signals.send_signal(SignalPayload::Answer(answer))?;
            }
            return Ok(());
        }

        if self.remote_description_set {
            info!("New offer from initiator, rebuilding connection");
            self.rebuild().await?;
        }

        let connection = self.connection()?;
        connection.set_remote_description(offer.clone()).await?;
        self.remote_description_set = true;
        self.applied_offer_sdp = Some(offer.sdp);
        self.flush_candidates(&connection).await;

        let answer = connection.create_answer().await?;
        self.last_answer = Some(answer.clone());
        self.negotiation = Negotiation::Stable;
        self.signals.send_signal(SignalPayload::Answer(answer))?;
        info!("Answer sent");
        Ok(())
    }

    /// Initiator only, after an offer went out
    pub async fn handle_remote_answer(&mut self, answer: SessionDescription) -> CallResult<()> {
        if !self.role.is_initiator() {
            return Err(CallError::Negotiation(
                "Receiver cannot accept an answer".to_string(),
            ));
        }

        match self.negotiation {
            Negotiation::OfferSent => {
                let connection = self.connection()?;
                connection.set_remote_description(answer).await?;
                self.remote_description_set = true;
                self.negotiation = Negotiation::Stable;
                self.flush_candidates(&connection).await;
                info!("Answer applied");
                Ok(())
            }
            Negotiation::Stable => {
                debug!("Ignoring duplicate answer");
                Ok(())
            }
            Negotiation::Idle | Negotiation::AwaitingReady => Err(CallError::Negotiation(
                "Answer received before an offer was sent".to_string(),
            )),
        }
    }

    /// Apply a remote candidate, or queue it until the remote description is set
    pub async fn handle_remote_ice_candidate(&mut self, candidate: IceCandidate) -> CallResult<()> {
        if !self.remote_description_set {
            debug!("Buffering ICE candidate until remote description is set");
            self.pending_candidates.push(candidate);
            return Ok(());
        }
        self.connection()?.add_ice_candidate(candidate).await?;
        Ok(())
    }

    /// Stop local tracks and close the connection; safe to call repeatedly
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.abort_timers();

        if let Some(stream) = self.local_stream.take() {
            let stopped = stream.stop_all();
            debug!(stopped, "Local tracks stopped");
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!("Failed to close peer connection: {}", e);
            }
        }
        self.remote_stream = None;
        self.pending_candidates.clear();
        self.local_candidates.clear();
        self.state = ConnectionState::Closed;

        self.snapshot.send_modify(|s| {
            s.local_stream = None;
            s.remote_stream = None;
            s.is_connecting = false;
            s.is_connected = false;
            s.connection_state = ConnectionState::Closed;
        });
        info!(role = %self.role, "Peer connection closed");
    }

    async fn on_ready(&mut self) -> CallResult<()> {
        if !self.role.is_initiator() {
            if self.remote_description_set {
                info!("Initiator restarted, rebuilding connection");
                self.rebuild().await?;
            }
            self.signals.send_signal(SignalPayload::Ready)?;
            return Ok(());
        }

        match self.negotiation {
            Negotiation::AwaitingReady => {
                info!("Receiver ready, sending offer");
                self.send_offer().await
            }
            Negotiation::OfferSent => {
                info!("Late ready, re-sending current offer");
                self.resend_offer()
            }
            Negotiation::Stable => {
                info!("Receiver restarted, renegotiating");
                self.rebuild().await?;
                self.send_offer().await
            }
            Negotiation::Idle => {
                debug!("Ready received before negotiation began");
                Ok(())
            }
        }
    }

    async fn send_offer(&mut self) -> CallResult<()> {
        let connection = self.connection()?;
        let offer = connection.create_offer().await?;
        self.abort_ready_timer();
        self.last_offer = Some(offer.clone());
        self.negotiation = Negotiation::OfferSent;
        self.signals.send_signal(SignalPayload::Offer(offer))?;
        info!(generation = self.generation, "Offer sent");
        Ok(())
    }

    fn resend_offer(&mut self) -> CallResult<()> {
        if let Some(offer) = self.last_offer.clone() {
            self.signals.send_signal(SignalPayload::Offer(offer))?;
        }
        for candidate in self.local_candidates.clone() {
            self.signals.send_signal(SignalPayload::IceCandidate(candidate))?;
        }
        Ok(())
    }

    async fn flush_candidates(&mut self, connection: &Arc<dyn PeerConnection>) {
        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            debug!(count = pending.len(), "Flushing buffered ICE candidates");
        }
        for candidate in pending {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!("Failed to add buffered ICE candidate: {}", e);
            }
        }
    }

    fn on_state_change(&mut self, state: ConnectionState, outcome: &mut DispatchOutcome) {
        if state == self.state {
            return;
        }
        if !self.state.can_transition_to(&state) {
            warn!(from = %self.state, to = %state, "Ignoring illegal connection state transition");
            return;
        }
        info!(from = %self.state, to = %state, role = %self.role, "Connection state changed");
        self.state = state;

        match state {
            ConnectionState::Connected => {
                self.retry_count = 0;
                metrics::counter!("call_connections_total").increment(1);
                let now = Utc::now();
                self.snapshot.send_modify(|s| {
                    s.error = None;
                    s.connected_at.get_or_insert(now);
                });
            }
            ConnectionState::Failed => self.fail_attempt(outcome),
            _ => {}
        }
    }

    /// Schedule the next retry, or give up when none are left
    fn fail_attempt(&mut self, outcome: &mut DispatchOutcome) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        let max_retries = self.settings.retry.max_retries;

        if self.retry_count < max_retries {
            self.retry_count += 1;
            let attempt = self.retry_count;
            let delay = self.settings.retry.delay_for(attempt);
            warn!(
                attempt,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                "Peer connection failed, scheduling retry"
            );
            metrics::counter!("call_retries_total").increment(1);

            let message = retry_message(attempt, max_retries);
            self.snapshot.send_modify(|s| s.error = Some(message));

            let events = self.events.clone();
            self.retry_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(PeerEvent::RetryDue { attempt });
            }));
            outcome.retry_scheduled = Some(attempt);
        } else {
            error!(attempts = self.retry_count, "Peer connection failed after all retries");
            metrics::counter!("call_failures_total").increment(1);
            self.snapshot
                .send_modify(|s| s.error = Some(RETRY_EXHAUSTED_MESSAGE.to_string()));
            outcome.retries_exhausted = true;
        }
    }

    async fn restart(&mut self, attempt: u32) -> CallResult<()> {
        info!(attempt, role = %self.role, "Retrying peer connection");
        self.rebuild().await?;
        if self.role.is_initiator() {
            self.send_offer().await
        } else {
            self.signals.send_signal(SignalPayload::Ready)?;
            Ok(())
        }
    }

    /// Replace the connection with a fresh one over the same local stream
    async fn rebuild(&mut self) -> CallResult<()> {
        if let Some(old) = self.connection.take() {
            if let Err(e) = old.close().await {
                warn!("Failed to close replaced peer connection: {}", e);
            }
        }
        self.build_connection().await
    }

    async fn build_connection(&mut self) -> CallResult<()> {
        self.abort_ready_timer();
        self.generation += 1;
        let generation = self.generation;

        let events = self.events.clone();
        let observer: ConnectionObserver = Arc::new(move |signal| {
            let _ = events.send(PeerEvent::Connection { generation, signal });
        });
        let connection = self
            .factory
            .create(&self.settings.ice_servers, observer)
            .await?;

        if let Some(stream) = &self.local_stream {
            for track in stream.tracks() {
                if let Err(e) = connection.add_track(track, stream.id()).await {
                    let _ = connection.close().await;
                    return Err(e.into());
                }
            }
        }

        self.connection = Some(connection);
        self.negotiation = Negotiation::Idle;
        self.remote_description_set = false;
        self.pending_candidates.clear();
        self.local_candidates.clear();
        self.last_offer = None;
        self.last_answer = None;
        self.applied_offer_sdp = None;
        self.state = ConnectionState::New;
        debug!(generation, "Peer connection built");
        Ok(())
    }

    fn on_remote_track(&mut self, stream_id: String, track: MediaTrack) {
        info!(stream = %stream_id, kind = track.kind().as_str(), "Remote track received");
        match &mut self.remote_stream {
            Some(stream) if stream.id() == stream_id => stream.add_track(track),
            _ => self.remote_stream = Some(MediaStream::with_tracks(stream_id, vec![track])),
        }
        let remote = self.remote_stream.clone();
        self.snapshot.send_modify(|s| s.remote_stream = remote);
    }

    fn connection(&self) -> CallResult<Arc<dyn PeerConnection>> {
        self.connection
            .clone()
            .ok_or_else(|| PeerError::Closed.into())
    }

    fn arm_ready_timer(&mut self) {
        self.abort_ready_timer();
        let events = self.events.clone();
        let generation = self.generation;
        let timeout = self.settings.ready_timeout;
        self.ready_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(PeerEvent::ReadyTimeout { generation });
        }));
    }

    fn abort_ready_timer(&mut self) {
        if let Some(timer) = self.ready_timer.take() {
            timer.abort();
        }
    }

    fn abort_timers(&mut self) {
        self.abort_ready_timer();
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    fn publish_state(&self) {
        if self.closed {
            return;
        }
        let state = self.state;
        let retry_count = self.retry_count;
        let retry_pending = self.retry_timer.is_some();
        self.snapshot.send_modify(|s| {
            s.connection_state = state;
            s.is_connected = state.is_connected();
            s.is_connecting = retry_pending
                || matches!(state, ConnectionState::New | ConnectionState::Connecting);
            s.retry_count = retry_count;
        });
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        self.abort_timers();
    }
}
