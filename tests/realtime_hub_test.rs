//! Realtime Hub Integration Tests
//!
//! Runs the API server on an ephemeral port and reaches its broker through
//! `WsRealtimeClient`.

use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use mentorcall::application::call::{
    CallDependencies, CallLauncher, CallSessionController, CallSettings, LogToaster, StartOutcome,
};
use mentorcall::domain::call_session::{Booking, CallSessionRepository};
use mentorcall::domain::shared::value_objects::{BookingId, UserId};
use mentorcall::infrastructure::media::HeadlessDevices;
use mentorcall::infrastructure::persistence::InMemoryCallSessionRepository;
use mentorcall::infrastructure::realtime::{
    ChannelEvent, ChannelOptions, InMemoryRealtime, RealtimeChannel, RealtimeClient,
    WsRealtimeClient,
};
use mentorcall::infrastructure::webrtc::SimulatedPeerFactory;
use mentorcall::interface::api::{build_router, AppState};

const WAIT: Duration = Duration::from_secs(10);

struct Hub {
    url: String,
    broker: InMemoryRealtime,
    repository: Arc<InMemoryCallSessionRepository>,
}

async fn start_hub() -> Hub {
    let repository = Arc::new(InMemoryCallSessionRepository::new());
    let broker = InMemoryRealtime::new();
    let state = AppState::new(repository.clone(), broker.clone());
    let app = build_router(state, PrometheusBuilder::new().build_recorder().handle());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Hub {
        url: format!("ws://{}/realtime", address),
        broker,
        repository,
    }
}

async fn next_broadcast(channel: &mut RealtimeChannel) -> (String, serde_json::Value) {
    let wait = async {
        loop {
            match channel.recv().await {
                Some(ChannelEvent::Broadcast { event, payload }) => return (event, payload),
                Some(_) => continue,
                None => panic!("Channel closed before a broadcast arrived"),
            }
        }
    };
    tokio::time::timeout(WAIT, wait)
        .await
        .expect("Timed out waiting for broadcast")
}

#[tokio::test]
async fn test_broadcast_between_remote_clients() {
    let hub = start_hub().await;
    let alice = WsRealtimeClient::connect(&hub.url).await.unwrap();
    let bob = WsRealtimeClient::connect(&hub.url).await.unwrap();

    let alice_channel = alice
        .subscribe("call-room", ChannelOptions::broadcast())
        .await
        .unwrap();
    let mut bob_channel = bob
        .subscribe("call-room", ChannelOptions::broadcast())
        .await
        .unwrap();
    assert_eq!(hub.broker.member_count("call-room"), 2);

    alice_channel
        .send("signal", &json!({ "type": "ready" }))
        .unwrap();

    let (event, payload) = next_broadcast(&mut bob_channel).await;
    assert_eq!(event, "signal");
    assert_eq!(payload["type"], "ready");
}

#[tokio::test]
async fn test_remote_and_local_subscribers_share_topics() {
    let hub = start_hub().await;
    let remote = WsRealtimeClient::connect(&hub.url).await.unwrap();

    let mut local_channel = hub
        .broker
        .subscribe("chat-room", ChannelOptions::broadcast())
        .await
        .unwrap();
    let remote_channel = remote
        .subscribe("chat-room", ChannelOptions::broadcast())
        .await
        .unwrap();

    remote_channel
        .send("message", &json!({ "message": "hello" }))
        .unwrap();

    let (event, payload) = next_broadcast(&mut local_channel).await;
    assert_eq!(event, "message");
    assert_eq!(payload["message"], "hello");
}

#[tokio::test]
async fn test_presence_through_hub() {
    let hub = start_hub().await;
    let remote = WsRealtimeClient::connect(&hub.url).await.unwrap();

    let mut watcher = hub
        .broker
        .subscribe("presence-room", ChannelOptions::presence("watcher"))
        .await
        .unwrap();
    let tracked = remote
        .subscribe("presence-room", ChannelOptions::presence("alice"))
        .await
        .unwrap();
    tracked.track(&json!({ "online_at": "now" })).unwrap();

    let joined = tokio::time::timeout(WAIT, async {
        loop {
            match watcher.recv().await {
                Some(ChannelEvent::PresenceJoin { key, .. }) if key == "alice" => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    })
    .await
    .expect("Timed out waiting for presence join");
    assert!(joined);
    assert!(hub.broker.presence_state("presence-room").contains_key("alice"));
}

#[tokio::test]
async fn test_call_connects_across_hub() {
    let hub = start_hub().await;
    let mentor = UserId::new();
    let mentee = UserId::new();
    let booking_id = BookingId::new();
    hub.repository
        .insert_booking(Booking::new(booking_id, mentor, mentee))
        .await;
    let repository: Arc<dyn CallSessionRepository> = hub.repository.clone();

    let joined = CallLauncher::new(repository.clone())
        .join_booking_call(&booking_id, &mentor)
        .await
        .unwrap();

    let deps = |realtime: Arc<dyn RealtimeClient>| CallDependencies {
        repository: repository.clone(),
        realtime,
        peers: Arc::new(SimulatedPeerFactory::new()),
        devices: Arc::new(HeadlessDevices),
        toaster: Arc::new(LogToaster),
    };
    let remote: Arc<dyn RealtimeClient> =
        Arc::new(WsRealtimeClient::connect(&hub.url).await.unwrap());
    let local: Arc<dyn RealtimeClient> = Arc::new(hub.broker.clone());

    let mut mentor_call =
        CallSessionController::open(joined.session_id, mentor, deps(remote), CallSettings::default())
            .await
            .unwrap();
    let mut mentee_call =
        CallSessionController::open(joined.session_id, mentee, deps(local), CallSettings::default())
            .await
            .unwrap();

    assert_eq!(mentor_call.start_call().await, StartOutcome::Started);
    assert_eq!(mentee_call.start_call().await, StartOutcome::Started);

    let mut state = mentor_call.watch();
    tokio::time::timeout(WAIT, state.wait_for(|s| s.is_connected))
        .await
        .expect("Timed out waiting for connection")
        .unwrap();
    let mut state = mentee_call.watch();
    tokio::time::timeout(WAIT, state.wait_for(|s| s.is_connected))
        .await
        .expect("Timed out waiting for connection")
        .unwrap();

    mentee_call.end_call().await;
    mentor_call.end_call().await;
}
