//! Call Flow Integration Tests
//!
//! Mentor and mentee controllers talk through the in-memory broker with
//! simulated peer connections on a headless host.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use mentorcall::application::call::{
    CallDependencies, CallError, CallHooks, CallLauncher, CallSessionController, CallSettings,
    CallSnapshot, ChannelToaster, LogToaster, StartOutcome, ToastLevel,
    RETRY_EXHAUSTED_MESSAGE, SIGNALING_SETUP_ERROR,
};
use mentorcall::domain::call_session::{
    Booking, BookingStatus, CallSession, CallSessionChange, CallSessionRepository,
    CallSessionUpdate, CallStatus, ParticipantProfile,
};
use mentorcall::domain::chat::chat_topic;
use mentorcall::domain::connection::ConnectionState;
use mentorcall::domain::media::{MediaSource, MediaTrack};
use mentorcall::domain::presence::presence_topic;
use mentorcall::domain::shared::value_objects::{BookingId, SessionId, UserId};
use mentorcall::domain::signaling::{
    signaling_topic, IceCandidate, PeerRole, SessionDescription, SignalPayload,
    SignalingMessage, SIGNAL_EVENT,
};
use mentorcall::domain::DomainError;
use mentorcall::infrastructure::media::HeadlessDevices;
use mentorcall::infrastructure::persistence::InMemoryCallSessionRepository;
use mentorcall::infrastructure::realtime::{
    ChannelEvent, ChannelOptions, InMemoryRealtime, RealtimeChannel, RealtimeClient,
};
use mentorcall::infrastructure::webrtc::{
    ConnectionObserver, PeerConnection, PeerConnectionFactory, PeerError, SimulatedPeerFactory,
};
use tokio::sync::{broadcast, mpsc, watch, Notify};

const WAIT: Duration = Duration::from_secs(60);

struct World {
    repository: Arc<InMemoryCallSessionRepository>,
    broker: InMemoryRealtime,
    mentor: UserId,
    mentee: UserId,
    booking_id: BookingId,
    session_id: SessionId,
}

impl World {
    async fn new() -> Self {
        let repository = Arc::new(InMemoryCallSessionRepository::new());
        let mentor = UserId::new();
        let mentee = UserId::new();
        let booking_id = BookingId::new();
        repository
            .insert_participant(ParticipantProfile::new(mentor, "Grace Hopper"))
            .await;
        repository
            .insert_participant(ParticipantProfile::new(mentee, "Alan Turing"))
            .await;
        repository
            .insert_booking(Booking::new(booking_id, mentor, mentee))
            .await;

        let launcher = CallLauncher::new(repository.clone());
        let joined = launcher
            .join_booking_call(&booking_id, &mentor)
            .await
            .expect("Failed to join booking call");
        assert!(joined.is_initiator);

        Self {
            repository,
            broker: InMemoryRealtime::new(),
            mentor,
            mentee,
            booking_id,
            session_id: joined.session_id,
        }
    }

    fn deps(&self, peers: Arc<SimulatedPeerFactory>) -> CallDependencies {
        CallDependencies {
            repository: self.repository.clone(),
            realtime: Arc::new(self.broker.clone()),
            peers,
            devices: Arc::new(HeadlessDevices),
            toaster: Arc::new(LogToaster),
        }
    }

    async fn open(&self, user_id: UserId, peers: Arc<SimulatedPeerFactory>) -> CallSessionController {
        CallSessionController::open(
            self.session_id,
            user_id,
            self.deps(peers),
            CallSettings::default(),
        )
        .await
        .expect("Failed to open call session")
    }
}

async fn wait_until(
    mut rx: watch::Receiver<CallSnapshot>,
    condition: impl FnMut(&CallSnapshot) -> bool,
) -> CallSnapshot {
    tokio::time::timeout(WAIT, rx.wait_for(condition))
        .await
        .expect("Timed out waiting for call state")
        .expect("Call state channel closed")
        .clone()
}

async fn wait_for_status(world: &World, status: CallStatus) -> CallSession {
    let poll = async {
        loop {
            let session = world
                .repository
                .get_call_session(&world.session_id)
                .await
                .unwrap()
                .unwrap();
            if session.status() == status {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT, poll)
        .await
        .expect("Timed out waiting for session status")
}

#[tokio::test(start_paused = true)]
async fn test_mentor_and_mentee_connect_and_end() {
    let world = World::new().await;
    let mut mentor = world.open(world.mentor, Arc::new(SimulatedPeerFactory::new())).await;
    let mut mentee = world.open(world.mentee, Arc::new(SimulatedPeerFactory::new())).await;

    assert!(mentor.is_initiator());
    assert!(!mentee.is_initiator());
    assert_eq!(
        mentor.other_participant().map(|p| p.display_name.as_str()),
        Some("Alan Turing")
    );
    assert_eq!(mentee.booking().map(|b| b.id), Some(world.booking_id));

    assert_eq!(mentor.start_call().await, StartOutcome::Started);
    assert_eq!(mentee.start_call().await, StartOutcome::Started);

    let mentor_state = wait_until(mentor.watch(), |s| s.is_connected).await;
    let mentee_state = wait_until(mentee.watch(), |s| s.is_connected).await;

    assert_eq!(mentor_state.connection_state, ConnectionState::Connected);
    assert_eq!(mentor_state.media_source, Some(MediaSource::Synthetic));
    assert!(mentor_state.connected_at.is_some());
    assert!(mentor_state.error.is_none());
    assert!(mentee_state.local_stream.is_some());
    assert!(mentor.placeholder_frames().is_some());

    let session = wait_for_status(&world, CallStatus::Connected).await;
    assert!(session.started_at().is_some());

    mentee.end_call().await;
    mentor.end_call().await;

    let session = world
        .repository
        .get_call_session(&world.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status(), CallStatus::Ended);
    assert!(session.ended_at().is_some());
    assert!(session.duration_seconds().is_some());

    let booking = world
        .repository
        .get_booking(&world.booking_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);

    let state = mentor.snapshot();
    assert_eq!(state.connection_state, ConnectionState::Closed);
    assert!(state.local_stream.is_none());
    assert!(state.remote_stream.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_presence_marks_other_participant_without_media() {
    let world = World::new().await;
    let mentor = world.open(world.mentor, Arc::new(SimulatedPeerFactory::new())).await;
    let mentee = world.open(world.mentee, Arc::new(SimulatedPeerFactory::new())).await;

    let mentor_state = wait_until(mentor.watch(), |s| s.other_participant_joined).await;
    let mentee_state = wait_until(mentee.watch(), |s| s.other_participant_joined).await;

    assert!(!mentor_state.is_connecting);
    assert!(mentor_state.local_stream.is_none());
    assert!(mentee_state.remote_stream.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_initiator_gives_up_after_retries() {
    let world = World::new().await;
    let failing = Arc::new(SimulatedPeerFactory::new());
    failing.fail_next(4);

    let mut mentor = world.open(world.mentor, failing.clone()).await;
    let mut mentee = world.open(world.mentee, Arc::new(SimulatedPeerFactory::new())).await;
    assert_eq!(mentor.start_call().await, StartOutcome::Started);
    assert_eq!(mentee.start_call().await, StartOutcome::Started);

    let state = wait_until(mentor.watch(), |s| {
        s.error.as_deref() == Some(RETRY_EXHAUSTED_MESSAGE)
            && s.connection_state == ConnectionState::Failed
    })
    .await;

    assert_eq!(state.retry_count, 3);
    assert_eq!(state.connection_state, ConnectionState::Failed);
    assert!(!state.is_connected);
    assert_eq!(failing.created(), 4);

    mentor.end_call().await;
    mentee.end_call().await;
}

#[tokio::test]
async fn test_third_party_cannot_open_call() {
    let world = World::new().await;
    let stranger = UserId::new();

    let result = CallSessionController::open(
        world.session_id,
        stranger,
        world.deps(Arc::new(SimulatedPeerFactory::new())),
        CallSettings::default(),
    )
    .await;

    assert!(matches!(result, Err(CallError::Unauthorized(_))));
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let world = World::new().await;
    let missing = SessionId::new();

    let result = CallSessionController::open(
        missing,
        world.mentor,
        world.deps(Arc::new(SimulatedPeerFactory::new())),
        CallSettings::default(),
    )
    .await;

    assert!(matches!(result, Err(CallError::SessionNotFound(id)) if id == missing));
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_builds_one_connection() {
    let world = World::new().await;
    let peers = Arc::new(SimulatedPeerFactory::new());
    let mut mentor = world.open(world.mentor, peers.clone()).await;

    assert_eq!(mentor.start_call().await, StartOutcome::Started);
    assert_eq!(mentor.start_call().await, StartOutcome::AlreadyStarted);
    assert_eq!(peers.created(), 1);
    assert!(mentor.is_started());

    mentor.end_call().await;
}

#[tokio::test(start_paused = true)]
async fn test_end_call_is_idempotent() {
    let world = World::new().await;
    let mut mentor = world.open(world.mentor, Arc::new(SimulatedPeerFactory::new())).await;
    assert_eq!(mentor.start_call().await, StartOutcome::Started);

    mentor.end_call().await;
    mentor.end_call().await;

    assert!(mentor.is_ended());
    assert_eq!(mentor.start_call().await, StartOutcome::Failed);

    let session = world
        .repository
        .get_call_session(&world.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status(), CallStatus::Ended);
}

#[tokio::test]
async fn test_unreachable_signaling_reports_setup_error() {
    let world = World::new().await;
    world.broker.set_unavailable(true);

    let (toaster, mut toasts) = ChannelToaster::new();
    let mut deps = world.deps(Arc::new(SimulatedPeerFactory::new()));
    deps.toaster = Arc::new(toaster);
    let mut mentor =
        CallSessionController::open(world.session_id, world.mentor, deps, CallSettings::default())
            .await
            .expect("Open tolerates unavailable presence and chat");

    assert_eq!(mentor.start_call().await, StartOutcome::Failed);
    assert!(!mentor.is_started());

    let state = mentor.snapshot();
    assert_eq!(state.error.as_deref(), Some(SIGNALING_SETUP_ERROR));
    assert!(!state.is_connecting);

    let toast = toasts.recv().await.expect("Missing error toast");
    assert_eq!(toast.level, ToastLevel::Error);
    assert_eq!(toast.description, SIGNALING_SETUP_ERROR);
}

#[tokio::test(start_paused = true)]
async fn test_toggles_mute_local_tracks() {
    let world = World::new().await;
    let mut mentor = world.open(world.mentor, Arc::new(SimulatedPeerFactory::new())).await;
    assert_eq!(mentor.start_call().await, StartOutcome::Started);

    mentor.toggle_video(false);
    mentor.toggle_audio(false);
    mentor.toggle_audio(true);

    let state = mentor.snapshot();
    assert!(!state.video_enabled);
    assert!(state.audio_enabled);
    let stream = state.local_stream.expect("Local stream missing");
    assert!(stream.video_tracks().all(|t| !t.is_enabled()));
    assert!(stream.audio_tracks().all(|t| t.is_enabled()));

    mentor.end_call().await;
}

/// Store whose writes always fail
struct ReadOnlyStore {
    inner: Arc<InMemoryCallSessionRepository>,
}

#[async_trait]
impl CallSessionRepository for ReadOnlyStore {
    async fn get_call_session(&self, id: &SessionId) -> mentorcall::Result<Option<CallSession>> {
        self.inner.get_call_session(id).await
    }

    async fn find_open_by_booking(
        &self,
        booking_id: &BookingId,
    ) -> mentorcall::Result<Option<CallSession>> {
        self.inner.find_open_by_booking(booking_id).await
    }

    async fn create_call_session(&self, _session: &CallSession) -> mentorcall::Result<()> {
        Err(DomainError::Storage("read-only store".to_string()))
    }

    async fn update_call_session(
        &self,
        _id: &SessionId,
        _update: &CallSessionUpdate,
    ) -> mentorcall::Result<CallSession> {
        Err(DomainError::Storage("read-only store".to_string()))
    }

    async fn get_booking(&self, id: &BookingId) -> mentorcall::Result<Option<Booking>> {
        self.inner.get_booking(id).await
    }

    async fn update_booking_status(
        &self,
        _id: &BookingId,
        _status: BookingStatus,
    ) -> mentorcall::Result<()> {
        Err(DomainError::Storage("read-only store".to_string()))
    }

    async fn get_participant(
        &self,
        user_id: &UserId,
    ) -> mentorcall::Result<Option<ParticipantProfile>> {
        self.inner.get_participant(user_id).await
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<CallSessionChange> {
        self.inner.subscribe_changes()
    }
}

/// Connections that never finish applying a remote description
struct StallingPeers {
    inner: SimulatedPeerFactory,
    stalled: Arc<Notify>,
}

struct StallingConnection {
    inner: Arc<dyn PeerConnection>,
    stalled: Arc<Notify>,
}

#[async_trait]
impl PeerConnection for StallingConnection {
    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), PeerError> {
        self.inner.add_track(track, stream_id).await
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.inner.create_offer().await
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.inner.create_answer().await
    }

    async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), PeerError> {
        self.stalled.notify_one();
        std::future::pending().await
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.inner.add_ice_candidate(candidate).await
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.inner.close().await
    }
}

#[async_trait]
impl PeerConnectionFactory for StallingPeers {
    async fn create(
        &self,
        ice_servers: &[String],
        observer: ConnectionObserver,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let inner = self.inner.create(ice_servers, observer).await?;
        Ok(Arc::new(StallingConnection {
            inner,
            stalled: self.stalled.clone(),
        }))
    }
}

struct Recorded {
    states: mpsc::UnboundedReceiver<ConnectionState>,
    remote_streams: Arc<AtomicUsize>,
}

fn recording_hooks() -> (CallHooks, Recorded) {
    let (tx, states) = mpsc::unbounded_channel();
    let remote_streams = Arc::new(AtomicUsize::new(0));
    let counter = remote_streams.clone();
    let hooks = CallHooks {
        on_remote_stream: Some(Arc::new(move |_stream| {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
        on_connection_state_change: Some(Arc::new(move |state| {
            let _ = tx.send(state);
        })),
    };
    (
        hooks,
        Recorded {
            states,
            remote_streams,
        },
    )
}

async fn states_until_connected(recorded: &mut Recorded) -> Vec<ConnectionState> {
    let collect = async {
        let mut seen = Vec::new();
        while let Some(state) = recorded.states.recv().await {
            seen.push(state);
            if state == ConnectionState::Connected {
                break;
            }
        }
        seen
    };
    tokio::time::timeout(WAIT, collect)
        .await
        .expect("Timed out waiting for connection hooks")
}

async fn drain_signals(channel: &mut RealtimeChannel) -> Vec<SignalingMessage> {
    let mut messages = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), channel.recv()).await
    {
        if let ChannelEvent::Broadcast { event, payload } = event {
            if event == SIGNAL_EVENT {
                if let Ok(message) = serde_json::from_value::<SignalingMessage>(payload) {
                    messages.push(message);
                }
            }
        }
    }
    messages
}

#[tokio::test(start_paused = true)]
async fn test_hooks_follow_both_ends_to_connected() {
    let world = World::new().await;
    let mut observer = world
        .broker
        .subscribe(&signaling_topic(&world.session_id), ChannelOptions::broadcast())
        .await
        .unwrap();

    let mut mentor = world.open(world.mentor, Arc::new(SimulatedPeerFactory::new())).await;
    let mut mentee = world.open(world.mentee, Arc::new(SimulatedPeerFactory::new())).await;
    let (mentor_hooks, mut mentor_seen) = recording_hooks();
    let (mentee_hooks, mut mentee_seen) = recording_hooks();
    mentor.set_hooks(mentor_hooks);
    mentee.set_hooks(mentee_hooks);
    assert_eq!(mentor.snapshot().connection_state, ConnectionState::New);
    assert_eq!(mentee.snapshot().connection_state, ConnectionState::New);

    assert_eq!(mentor.start_call().await, StartOutcome::Started);
    assert_eq!(mentee.start_call().await, StartOutcome::Started);

    let expected = vec![ConnectionState::Connecting, ConnectionState::Connected];
    assert_eq!(states_until_connected(&mut mentor_seen).await, expected);
    assert_eq!(states_until_connected(&mut mentee_seen).await, expected);
    assert!(mentor_seen.remote_streams.load(Ordering::SeqCst) >= 1);
    assert!(mentee_seen.remote_streams.load(Ordering::SeqCst) >= 1);

    let signals = drain_signals(&mut observer).await;
    let candidates_from = |role: PeerRole| {
        signals
            .iter()
            .filter(|m| m.sender == role && matches!(m.payload, SignalPayload::IceCandidate(_)))
            .count()
    };
    assert!(candidates_from(PeerRole::Initiator) >= 1);
    assert!(candidates_from(PeerRole::Receiver) >= 1);

    let session = wait_for_status(&world, CallStatus::Connected).await;
    assert!(session.started_at().is_some());

    mentee.end_call().await;
    mentor.end_call().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_keeps_first_start_stamp() {
    let world = World::new().await;
    let mentor_peers = Arc::new(SimulatedPeerFactory::new());
    let mut mentor = world.open(world.mentor, mentor_peers.clone()).await;
    let mut mentee = world.open(world.mentee, Arc::new(SimulatedPeerFactory::new())).await;
    assert_eq!(mentor.start_call().await, StartOutcome::Started);
    assert_eq!(mentee.start_call().await, StartOutcome::Started);
    wait_until(mentor.watch(), |s| s.is_connected).await;

    let first = wait_for_status(&world, CallStatus::Connected).await;
    let started_at = first.started_at().expect("started_at not stamped");

    mentor_peers
        .last_connection()
        .expect("No mentor connection")
        .force_state(ConnectionState::Failed);
    let failed = wait_for_status(&world, CallStatus::Failed).await;
    assert_eq!(failed.started_at(), Some(started_at));
    assert!(failed.ended_at().is_some());

    let state = wait_until(mentor.watch(), |s| s.is_connected).await;
    assert_eq!(state.retry_count, 0);
    assert_eq!(mentor_peers.created(), 2);

    let reconnected = wait_for_status(&world, CallStatus::Connected).await;
    assert_eq!(reconnected.started_at(), Some(started_at));
    assert!(reconnected.ended_at().is_none());

    mentee.end_call().await;
    mentor.end_call().await;
}

#[tokio::test(start_paused = true)]
async fn test_end_call_releases_everything_when_store_fails() {
    let world = World::new().await;
    let mut deps = world.deps(Arc::new(SimulatedPeerFactory::new()));
    deps.repository = Arc::new(ReadOnlyStore {
        inner: world.repository.clone(),
    });
    let mut mentor =
        CallSessionController::open(world.session_id, world.mentor, deps, CallSettings::default())
            .await
            .expect("Failed to open call session");
    assert_eq!(mentor.start_call().await, StartOutcome::Started);

    let local = mentor.snapshot().local_stream.expect("Local stream missing");
    let topics = [
        signaling_topic(&world.session_id),
        presence_topic(&world.session_id),
        chat_topic(&world.session_id),
    ];
    for topic in &topics {
        assert_eq!(world.broker.member_count(topic), 1, "{}", topic);
    }

    mentor.end_call().await;

    assert!(local.tracks().iter().all(|t| t.is_stopped()));
    for topic in &topics {
        assert_eq!(world.broker.member_count(topic), 0, "{}", topic);
    }
    assert_eq!(mentor.snapshot().connection_state, ConnectionState::Closed);
    assert!(mentor.is_ended());

    let session = world
        .repository
        .get_call_session(&world.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status(), CallStatus::Initiated);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_call_task_still_stops_local_tracks() {
    let world = World::new().await;
    let stalled = Arc::new(Notify::new());
    let mut deps = world.deps(Arc::new(SimulatedPeerFactory::new()));
    deps.peers = Arc::new(StallingPeers {
        inner: SimulatedPeerFactory::new(),
        stalled: stalled.clone(),
    });

    let mut mentor = world.open(world.mentor, Arc::new(SimulatedPeerFactory::new())).await;
    let mut mentee =
        CallSessionController::open(world.session_id, world.mentee, deps, CallSettings::default())
            .await
            .expect("Failed to open call session");
    assert_eq!(mentor.start_call().await, StartOutcome::Started);
    assert_eq!(mentee.start_call().await, StartOutcome::Started);

    tokio::time::timeout(WAIT, stalled.notified())
        .await
        .expect("Receiver never applied the offer");
    let local = mentee.snapshot().local_stream.expect("Local stream missing");
    assert!(local.tracks().iter().all(|t| !t.is_stopped()));

    mentee.end_call().await;

    assert!(local.tracks().iter().all(|t| t.is_stopped()));
    assert_eq!(mentee.snapshot().connection_state, ConnectionState::Closed);

    mentor.end_call().await;
}
