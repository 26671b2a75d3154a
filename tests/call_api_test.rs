//! Call API Integration Tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot`
use mentorcall::domain::call_session::{Booking, ParticipantProfile};
use mentorcall::domain::shared::value_objects::{BookingId, UserId};
use mentorcall::infrastructure::persistence::InMemoryCallSessionRepository;
use mentorcall::infrastructure::realtime::InMemoryRealtime;
use mentorcall::interface::api::{build_router, AppState};

struct Fixture {
    app: Router,
    mentor: UserId,
    mentee: UserId,
    booking_id: BookingId,
}

async fn setup() -> Fixture {
    let repository = Arc::new(InMemoryCallSessionRepository::new());
    let mentor = UserId::new();
    let mentee = UserId::new();
    let booking_id = BookingId::new();
    repository
        .insert_participant(ParticipantProfile::new(mentor, "Grace Hopper"))
        .await;
    repository
        .insert_booking(Booking::new(booking_id, mentor, mentee))
        .await;

    let state = AppState::new(repository, InMemoryRealtime::new());
    let prometheus_handle = PrometheusBuilder::new().build_recorder().handle();

    Fixture {
        app: build_router(state, prometheus_handle),
        mentor,
        mentee,
        booking_id,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let fixture = setup().await;

    let (status, json) = send(&fixture.app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"], "OK");
}

#[tokio::test]
async fn test_join_creates_then_reuses_session() {
    let fixture = setup().await;
    let uri = format!("/api/bookings/{}/call", fixture.booking_id);

    let (status, json) = send(
        &fixture.app,
        post_json(&uri, json!({ "user_id": fixture.mentor })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["is_initiator"], true);
    let session_id = json["data"]["session_id"].as_str().unwrap().to_string();

    let (status, json) = send(
        &fixture.app,
        post_json(&uri, json!({ "user_id": fixture.mentee })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["is_initiator"], false);
    assert_eq!(json["data"]["session_id"], session_id.as_str());

    let (status, json) = send(
        &fixture.app,
        get(&format!("/api/call-sessions/{}", session_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "initiated");
    assert_eq!(json["data"]["call_type"], "video");
    assert_eq!(json["data"]["caller_id"], fixture.mentor.to_string());
}

#[tokio::test]
async fn test_join_by_stranger_is_forbidden() {
    let fixture = setup().await;
    let uri = format!("/api/bookings/{}/call", fixture.booking_id);

    let (status, json) = send(
        &fixture.app,
        post_json(&uri, json!({ "user_id": UserId::new() })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_unknown_session_returns_not_found() {
    let fixture = setup().await;

    let (status, json) = send(
        &fixture.app,
        get(&format!("/api/call-sessions/{}", uuid::Uuid::new_v4())),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_decline_is_reserved_for_callee() {
    let fixture = setup().await;
    let (_, json) = send(
        &fixture.app,
        post_json(
            &format!("/api/bookings/{}/call", fixture.booking_id),
            json!({ "user_id": fixture.mentor }),
        ),
    )
    .await;
    let session_id = json["data"]["session_id"].as_str().unwrap().to_string();
    let uri = format!("/api/call-sessions/{}/decline", session_id);

    let (status, _) = send(
        &fixture.app,
        post_json(&uri, json!({ "user_id": fixture.mentor })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(
        &fixture.app,
        post_json(&uri, json!({ "user_id": fixture.mentee })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "cancelled");
}
