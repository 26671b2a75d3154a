//! Call session controller
//!
//! One controller per participant and call page. It resolves the
//! participant's role from the stored session, joins presence and chat,
//! and on `start_call` runs the media and negotiation pipeline on a worker
//! task that owns the peer connection manager.

use super::chat::ChatChannel;
use super::error::{CallError, CallResult};
use super::media::MediaAcquirer;
use super::peer::{
    DispatchOutcome, PeerConnectionManager, PeerEvent, PeerSettings, RETRY_EXHAUSTED_MESSAGE,
};
use super::presence::PresenceTracker;
use super::signaling::SignalingTransport;
use super::state::CallSnapshot;
use super::status::StatusRecorder;
use super::toast::{Toast, Toaster};
use crate::config::Settings;
use crate::domain::call_session::{
    Booking, CallSessionRepository, CallStatus, ParticipantProfile, Participation,
};
use crate::domain::connection::ConnectionState;
use crate::domain::media::{MediaConstraints, MediaKind, MediaStream};
use crate::domain::shared::value_objects::{SessionId, UserId};
use crate::domain::signaling::PeerRole;
use crate::infrastructure::media::{MediaDevices, SyntheticMedia, VideoFrame};
use crate::infrastructure::realtime::RealtimeClient;
use crate::infrastructure::webrtc::PeerConnectionFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const SIGNALING_SETUP_ERROR: &str = "Failed to setup signaling channel";

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Ports the controller talks to
#[derive(Clone)]
pub struct CallDependencies {
    pub repository: Arc<dyn CallSessionRepository>,
    pub realtime: Arc<dyn RealtimeClient>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub devices: Arc<dyn MediaDevices>,
    pub toaster: Arc<dyn Toaster>,
}

#[derive(Debug, Clone)]
pub struct CallSettings {
    pub peer: PeerSettings,
    pub constraints: MediaConstraints,
    pub synthetic: SyntheticMedia,
}

impl CallSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        let media = &settings.media;
        Self {
            peer: PeerSettings::from_config(&settings.call),
            constraints: MediaConstraints {
                ideal_width: media.ideal_width,
                ideal_height: media.ideal_height,
                facing_mode: media.facing_mode.clone(),
                echo_cancellation: media.echo_cancellation,
                noise_suppression: media.noise_suppression,
                auto_gain_control: media.auto_gain_control,
            },
            synthetic: SyntheticMedia::from_config(media),
        }
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

pub type RemoteStreamHook = Arc<dyn Fn(MediaStream) + Send + Sync>;
pub type ConnectionStateHook = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Callbacks run on the call task
#[derive(Clone, Default)]
pub struct CallHooks {
    pub on_remote_stream: Option<RemoteStreamHook>,
    pub on_connection_state_change: Option<ConnectionStateHook>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A call was already started by this controller
    AlreadyStarted,
    /// Start failed; the reason is in the snapshot error
    Failed,
}

enum WorkerCommand {
    Shutdown { ack: oneshot::Sender<()> },
}

pub struct CallSessionController {
    session_id: SessionId,
    user_id: UserId,
    role: PeerRole,
    booking: Option<Booking>,
    other_participant: Option<ParticipantProfile>,
    deps: CallDependencies,
    settings: CallSettings,
    hooks: CallHooks,
    snapshot: Arc<watch::Sender<CallSnapshot>>,
    status: StatusRecorder,
    presence: Option<PresenceTracker>,
    chat: Option<ChatChannel>,
    frames: Option<watch::Receiver<VideoFrame>>,
    local_stream: Option<MediaStream>,
    commands: Option<mpsc::UnboundedSender<WorkerCommand>>,
    worker: Option<JoinHandle<()>>,
    started: bool,
    ended: bool,
}

impl CallSessionController {
    /// Load the session for `user_id` and join the call page channels
    ///
    /// Fails with `Unauthorized` when the user is neither caller nor callee.
    /// Missing booking or profile data and unavailable presence or chat
    /// channels are logged and tolerated.
    pub async fn open(
        session_id: SessionId,
        user_id: UserId,
        deps: CallDependencies,
        settings: CallSettings,
    ) -> CallResult<Self> {
        let session = deps
            .repository
            .get_call_session(&session_id)
            .await?
            .ok_or(CallError::SessionNotFound(session_id))?;

        let participation = session.participation(&user_id).map_err(|e| {
            warn!(session_id = %session_id, user_id = %user_id, "Rejected call page access");
            CallError::from(e)
        })?;
        let role = PeerRole::from_initiator(participation == Participation::Caller);
        info!(session_id = %session_id, role = %role, status = %session.status(), "Opening call session");

        let booking = match deps.repository.get_booking(session.booking_id()).await {
            Ok(booking) => booking,
            Err(e) => {
                warn!(booking_id = %session.booking_id(), "Failed to load booking: {}", e);
                None
            }
        };

        let other_participant = match session.other_participant(&user_id) {
            Some(other) => lookup_profile(deps.repository.as_ref(), &other).await,
            None => None,
        };
        let sender_name = lookup_profile(deps.repository.as_ref(), &user_id)
            .await
            .map(|profile| profile.display_name)
            .unwrap_or_else(|| "Participant".to_string());

        let (snapshot, _) = watch::channel(CallSnapshot::default());
        let snapshot = Arc::new(snapshot);

        let presence = match PresenceTracker::join(
            deps.realtime.as_ref(),
            &session_id,
            user_id,
            snapshot.clone(),
            deps.toaster.clone(),
        )
        .await
        {
            Ok(presence) => Some(presence),
            Err(e) => {
                warn!(session_id = %session_id, "Presence unavailable: {}", e);
                None
            }
        };

        let chat = match ChatChannel::open(deps.realtime.as_ref(), &session_id, sender_name).await {
            Ok(chat) => Some(chat),
            Err(e) => {
                warn!(session_id = %session_id, "Chat unavailable: {}", e);
                None
            }
        };

        let status = StatusRecorder::new(deps.repository.clone(), session_id, *session.booking_id());

        Ok(Self {
            session_id,
            user_id,
            role,
            booking,
            other_participant,
            deps,
            settings,
            hooks: CallHooks::default(),
            snapshot,
            status,
            presence,
            chat,
            frames: None,
            local_stream: None,
            commands: None,
            worker: None,
            started: false,
            ended: false,
        })
    }

    /// Install hooks; takes effect for the next `start_call`
    pub fn set_hooks(&mut self, hooks: CallHooks) {
        self.hooks = hooks;
    }

    /// Acquire media, build the peer connection and begin negotiation
    ///
    /// Runs at most once per controller. Failures end up in the snapshot
    /// error and a toast, never in the return value.
    pub async fn start_call(&mut self) -> StartOutcome {
        if self.ended {
            warn!(session_id = %self.session_id, "Cannot start an ended call");
            return StartOutcome::Failed;
        }
        if self.started {
            debug!(session_id = %self.session_id, "Call already started");
            return StartOutcome::AlreadyStarted;
        }
        self.started = true;
        metrics::counter!("call_starts_total").increment(1);
        info!(session_id = %self.session_id, role = %self.role, "Starting call");

        match self.launch().await {
            Ok(()) => StartOutcome::Started,
            Err(e) => {
                self.started = false;
                let message = match e {
                    CallError::Realtime(_) => SIGNALING_SETUP_ERROR.to_string(),
                    other => other.to_string(),
                };
                error!(session_id = %self.session_id, "Failed to start call: {}", message);
                let shown = message.clone();
                self.snapshot.send_modify(|s| {
                    s.is_connecting = false;
                    s.error = Some(shown);
                });
                self.deps.toaster.toast(Toast::call_error(message));
                StartOutcome::Failed
            }
        }
    }

    async fn launch(&mut self) -> CallResult<()> {
        self.snapshot.send_modify(|s| {
            s.is_connecting = true;
            s.error = None;
        });

        let mut signaling =
            SignalingTransport::connect(self.deps.realtime.as_ref(), &self.session_id, self.role)
                .await?;

        let acquirer = MediaAcquirer::new(
            self.deps.devices.clone(),
            self.settings.constraints.clone(),
            self.settings.synthetic.clone(),
        );
        let media = match acquirer.acquire(self.role, &self.session_id).await {
            Ok(media) => media,
            Err(e) => {
                signaling.close();
                return Err(e.into());
            }
        };
        let source = media.source;
        self.snapshot.send_modify(|s| s.media_source = Some(source));
        self.frames = media.frames;
        self.local_stream = Some(media.stream.clone());

        let (mut manager, events) = PeerConnectionManager::new(
            self.role,
            self.settings.peer.clone(),
            self.deps.peers.clone(),
            Arc::new(signaling.sender()),
            self.snapshot.clone(),
        );
        let prepared = match manager.create(media.stream).await {
            Ok(()) => manager.begin_negotiation().await,
            Err(e) => Err(e),
        };
        if let Err(e) = prepared {
            self.local_stream = None;
            manager.close().await;
            signaling.close();
            return Err(e);
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let worker = CallWorker {
            session_id: self.session_id,
            manager,
            signaling,
            events,
            commands: command_rx,
            hooks: self.hooks.clone(),
            status: self.status.clone(),
            toaster: self.deps.toaster.clone(),
        };
        self.worker = Some(tokio::spawn(worker.run()));
        self.commands = Some(commands);
        Ok(())
    }

    /// Persist `ended` and release every call resource
    ///
    /// Each step runs even when an earlier one fails. Calling it again does
    /// nothing.
    pub async fn end_call(&mut self) {
        if self.ended {
            debug!(session_id = %self.session_id, "Call already ended");
            return;
        }
        self.ended = true;
        info!(session_id = %self.session_id, role = %self.role, "Ending call");

        if let Err(e) = self.status.record(CallStatus::Ended).await {
            warn!(session_id = %self.session_id, "Failed to persist call end: {}", e);
        }

        if let Some(commands) = self.commands.take() {
            let (ack, done) = oneshot::channel();
            if commands.send(WorkerCommand::Shutdown { ack }).is_ok()
                && tokio::time::timeout(SHUTDOWN_TIMEOUT, done).await.is_err()
            {
                warn!(session_id = %self.session_id, "Call task did not stop in time");
            }
        }
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                worker.abort();
            }
        }
        if let Some(stream) = self.local_stream.take() {
            let stopped = stream.stop_all();
            if stopped > 0 {
                warn!(session_id = %self.session_id, stopped, "Stopped tracks left by the call task");
            }
        }

        if let Some(mut presence) = self.presence.take() {
            presence.leave().await;
        }
        if let Some(mut chat) = self.chat.take() {
            chat.close();
        }
        self.frames = None;

        self.snapshot.send_modify(|s| {
            s.local_stream = None;
            s.remote_stream = None;
            s.is_connecting = false;
            s.is_connected = false;
            s.connection_state = ConnectionState::Closed;
        });
    }

    pub fn toggle_audio(&self, enabled: bool) {
        self.toggle(MediaKind::Audio, enabled);
    }

    pub fn toggle_video(&self, enabled: bool) {
        self.toggle(MediaKind::Video, enabled);
    }

    fn toggle(&self, kind: MediaKind, enabled: bool) {
        self.snapshot.send_modify(|s| {
            if let Some(stream) = &s.local_stream {
                stream.set_enabled(kind, enabled);
            }
            match kind {
                MediaKind::Audio => s.audio_enabled = enabled,
                MediaKind::Video => s.video_enabled = enabled,
            }
        });
        debug!(kind = kind.as_str(), enabled, "Local track toggled");
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver of every snapshot change
    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.subscribe()
    }

    /// Frames of the placeholder video, when the stream is synthetic
    pub fn placeholder_frames(&self) -> Option<watch::Receiver<VideoFrame>> {
        self.frames.clone()
    }

    pub fn chat(&mut self) -> Option<&mut ChatChannel> {
        self.chat.as_mut()
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn is_initiator(&self) -> bool {
        self.role.is_initiator()
    }

    pub fn booking(&self) -> Option<&Booking> {
        self.booking.as_ref()
    }

    pub fn other_participant(&self) -> Option<&ParticipantProfile> {
        self.other_participant.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

impl Drop for CallSessionController {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
        }
        // the worker shuts down once `commands` is dropped
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let status = self.status.clone();
                let session_id = self.session_id;
                handle.spawn(async move {
                    if let Err(e) = status.record(CallStatus::Ended).await {
                        warn!(session_id = %session_id, "Failed to persist call end: {}", e);
                    }
                });
            }
            Err(_) => {
                warn!(session_id = %self.session_id, "Call dropped outside a runtime, end not persisted");
            }
        }
    }
}

async fn lookup_profile(
    repository: &dyn CallSessionRepository,
    user_id: &UserId,
) -> Option<ParticipantProfile> {
    match repository.get_participant(user_id).await {
        Ok(profile) => profile,
        Err(e) => {
            warn!(user_id = %user_id, "Failed to load participant profile: {}", e);
            None
        }
    }
}

/// Call task: single consumer of signaling messages and manager events
struct CallWorker {
    session_id: SessionId,
    manager: PeerConnectionManager,
    signaling: SignalingTransport,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    hooks: CallHooks,
    status: StatusRecorder,
    toaster: Arc<dyn Toaster>,
}

impl CallWorker {
    async fn run(mut self) {
        let mut signaling_open = true;
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let ack = match command {
                        Some(WorkerCommand::Shutdown { ack }) => Some(ack),
                        None => None,
                    };
                    self.shutdown().await;
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    return;
                }
                message = self.signaling.next_message(), if signaling_open => {
                    match message {
                        Some(message) => {
                            let outcome = self.manager.dispatch(PeerEvent::Signal(message)).await;
                            self.react(outcome).await;
                        }
                        None => {
                            warn!(session_id = %self.session_id, "Signaling channel closed");
                            signaling_open = false;
                        }
                    }
                }
                Some(event) = self.events.recv() => {
                    let outcome = self.manager.dispatch(event).await;
                    self.react(outcome).await;
                }
            }
        }
    }

    async fn react(&mut self, outcome: DispatchOutcome) {
        if let (Some(stream), Some(hook)) = (outcome.remote_stream, &self.hooks.on_remote_stream) {
            hook(stream);
        }

        if let Some(state) = outcome.state_changed {
            if let Some(hook) = &self.hooks.on_connection_state_change {
                hook(state);
            }
            match state {
                ConnectionState::Connected => {
                    self.toaster.toast(Toast::connected());
                    self.persist(CallStatus::Connected).await;
                }
                ConnectionState::Failed => self.persist(CallStatus::Failed).await,
                _ => {}
            }
        }

        if outcome.retry_scheduled.is_some() {
            self.toaster.toast(Toast::connection_failed());
        }
        if outcome.retries_exhausted {
            self.toaster.toast(Toast::call_error(RETRY_EXHAUSTED_MESSAGE));
        }
    }

    async fn persist(&self, status: CallStatus) {
        if let Err(e) = self.status.record(status).await {
            error!(session_id = %self.session_id, status = %status, "Failed to persist call status: {}", e);
        }
    }

    async fn shutdown(&mut self) {
        self.manager.close().await;
        self.signaling.close();
        debug!(session_id = %self.session_id, "Call task stopped");
    }
}
