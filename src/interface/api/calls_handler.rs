//! Call session API handlers

use super::dto::{ApiResponse, CallSessionResponse, UserRequest};
use crate::application::call::{CallError, CallLauncher, JoinedCall};
use crate::domain::call_session::CallSessionRepository;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{BookingId, SessionId};
use crate::infrastructure::realtime::InMemoryRealtime;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn CallSessionRepository>,
    pub launcher: CallLauncher,
    /// Broker exposed through the realtime hub
    pub broker: InMemoryRealtime,
}

impl AppState {
    pub fn new(repository: Arc<dyn CallSessionRepository>, broker: InMemoryRealtime) -> Self {
        Self {
            launcher: CallLauncher::new(repository.clone()),
            repository,
            broker,
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(data: T) -> ApiResult<T> {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure<T>(err: CallError) -> ApiResult<T> {
    let status = match &err {
        CallError::SessionNotFound(_) | CallError::BookingNotFound(_) => StatusCode::NOT_FOUND,
        CallError::Unauthorized(_) => StatusCode::FORBIDDEN,
        CallError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CallError::Domain(DomainError::InvalidStateTransition(_)) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("API request failed: {}", err);
    }
    (status, Json(ApiResponse::error(err.to_string())))
}

/// Health check
pub async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("OK"))
}

/// Get a call session
pub async fn get_call_session(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> ApiResult<CallSessionResponse> {
    info!("API: Getting call session {}", id);

    match state.repository.get_call_session(&id).await {
        Ok(Some(session)) => ok(CallSessionResponse::from(&session)),
        Ok(None) => failure(CallError::SessionNotFound(id)),
        Err(e) => failure(e.into()),
    }
}

/// Join the call of a booking
pub async fn join_booking_call(
    State(state): State<AppState>,
    Path(booking_id): Path<BookingId>,
    Json(request): Json<UserRequest>,
) -> ApiResult<JoinedCall> {
    info!("API: User {} joining call of booking {}", request.user_id, booking_id);

    match state
        .launcher
        .join_booking_call(&booking_id, &request.user_id)
        .await
    {
        Ok(joined) => ok(joined),
        Err(e) => failure(e),
    }
}

/// Decline an incoming call
pub async fn decline_call(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(request): Json<UserRequest>,
) -> ApiResult<CallSessionResponse> {
    info!("API: User {} declining call session {}", request.user_id, id);

    match state.launcher.decline_call(&id, &request.user_id).await {
        Ok(session) => ok(CallSessionResponse::from(&session)),
        Err(e) => failure(e),
    }
}
