//! PostgreSQL implementation of the call session store

use crate::domain::call_session::{
    Booking, BookingStatus, CallSession, CallSessionChange, CallSessionRepository,
    CallSessionUpdate, CallStatus, CallType, ChangeKind, ParticipantProfile,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BookingId, SessionId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::{FromRow, PgPool};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// NOTIFY channel fed by the `call_sessions` trigger
pub const CHANGE_CHANNEL: &str = "call_session_changes";

const SESSION_COLUMNS: &str = "id, booking_id, caller_id, callee_id, call_type, status, \
     started_at, ended_at, duration_seconds, created_at";

#[derive(FromRow)]
struct CallSessionRow {
    id: Uuid,
    booking_id: Uuid,
    caller_id: Uuid,
    callee_id: Uuid,
    call_type: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CallSessionRow> for CallSession {
    type Error = DomainError;

    fn try_from(r: CallSessionRow) -> Result<Self> {
        Ok(CallSession::restore(
            SessionId::from_uuid(r.id),
            BookingId::from_uuid(r.booking_id),
            UserId::from_uuid(r.caller_id),
            UserId::from_uuid(r.callee_id),
            r.call_type.parse::<CallType>()?,
            r.status.parse::<CallStatus>()?,
            r.started_at,
            r.ended_at,
            r.duration_seconds,
            r.created_at,
        ))
    }
}

#[derive(FromRow)]
struct BookingRow {
    id: Uuid,
    mentor_user_id: Uuid,
    mentee_id: Uuid,
    status: String,
}

#[derive(FromRow)]
struct ProfileRow {
    id: Uuid,
    full_name: Option<String>,
    avatar_url: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize)]
struct ChangeNotice {
    op: String,
    id: Uuid,
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    error!("{}: {}", context, e);
    DomainError::Storage(format!("Database error: {}", e))
}

async fn fetch_session(pool: &PgPool, id: Uuid) -> Result<Option<CallSession>> {
    let query = format!("SELECT {} FROM call_sessions WHERE id = $1", SESSION_COLUMNS);
    sqlx::query_as::<_, CallSessionRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| db_error("Failed to load call session", e))?
        .map(CallSession::try_from)
        .transpose()
}

pub struct PgCallSessionRepository {
    pool: PgPool,
    changes: broadcast::Sender<CallSessionChange>,
    listener: JoinHandle<()>,
}

impl PgCallSessionRepository {
    /// Create the store and start relaying row notifications
    pub async fn connect(pool: PgPool) -> std::result::Result<Self, sqlx::Error> {
        let (changes, _) = broadcast::channel(256);

        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        info!("Listening for call session changes on {}", CHANGE_CHANNEL);

        let relay_pool = pool.clone();
        let relay = changes.clone();
        let listener = tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(n) => n,
                    Err(e) => {
                        error!("Call session change listener failed: {}", e);
                        break;
                    }
                };
                let notice: ChangeNotice = match serde_json::from_str(notification.payload()) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("Ignoring malformed change notice: {}", e);
                        continue;
                    }
                };
                let kind = if notice.op == "INSERT" {
                    ChangeKind::Inserted
                } else {
                    ChangeKind::Updated
                };
                match fetch_session(&relay_pool, notice.id).await {
                    Ok(Some(session)) => {
                        let _ = relay.send(CallSessionChange { kind, session });
                    }
                    Ok(None) => debug!("Changed call session {} no longer exists", notice.id),
                    Err(e) => warn!("Failed to load changed call session: {}", e),
                }
            }
        });

        Ok(Self {
            pool,
            changes,
            listener,
        })
    }
}

impl Drop for PgCallSessionRepository {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl CallSessionRepository for PgCallSessionRepository {
    async fn get_call_session(&self, id: &SessionId) -> Result<Option<CallSession>> {
        fetch_session(&self.pool, id.as_uuid()).await
    }

    async fn find_open_by_booking(&self, booking_id: &BookingId) -> Result<Option<CallSession>> {
        let query = format!(
            "SELECT {} FROM call_sessions \
             WHERE booking_id = $1 AND status NOT IN ('ended', 'failed', 'cancelled') \
             ORDER BY created_at DESC LIMIT 1",
            SESSION_COLUMNS
        );
        sqlx::query_as::<_, CallSessionRow>(&query)
            .bind(booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to find call session by booking", e))?
            .map(CallSession::try_from)
            .transpose()
    }

    async fn create_call_session(&self, session: &CallSession) -> Result<()> {
        debug!("Creating call session: {}", session.id());

        sqlx::query(
            r#"
            INSERT INTO call_sessions (
                id, booking_id, caller_id, callee_id, call_type, status,
                started_at, ended_at, duration_seconds, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(session.id().as_uuid())
        .bind(session.booking_id().as_uuid())
        .bind(session.caller_id().as_uuid())
        .bind(session.callee_id().as_uuid())
        .bind(session.call_type().as_str())
        .bind(session.status().as_str())
        .bind(session.started_at())
        .bind(session.ended_at())
        .bind(session.duration_seconds())
        .bind(session.created_at())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DomainError::Conflict(format!("Call session {} already exists", session.id()))
            }
            other => db_error("Failed to create call session", other),
        })?;

        Ok(())
    }

    async fn update_call_session(
        &self,
        id: &SessionId,
        update: &CallSessionUpdate,
    ) -> Result<CallSession> {
        debug!("Updating call session {} to {}", id, update.status);

        // started_at keeps the first stamp written by either participant
        let query = format!(
            r#"
            UPDATE call_sessions SET
                status = $2,
                started_at = COALESCE(started_at, $3),
                ended_at = CASE WHEN $6 THEN NULL ELSE COALESCE($4, ended_at) END,
                duration_seconds = CASE
                    WHEN $6 THEN NULL
                    WHEN $4 IS NULL THEN duration_seconds
                    ELSE $5
                END
            WHERE id = $1
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<_, CallSessionRow>(&query)
            .bind(id.as_uuid())
            .bind(update.status.as_str())
            .bind(update.started_at)
            .bind(update.ended_at)
            .bind(update.duration_seconds)
            .bind(update.reopen)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to update call session", e))?
            .ok_or_else(|| DomainError::NotFound(format!("Call session {} not found", id)))?;

        CallSession::try_from(row)
    }

    async fn get_booking(&self, id: &BookingId) -> Result<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(
            r#"
            SELECT b.id, m.user_id AS mentor_user_id, b.mentee_id, b.status
            FROM bookings b
            JOIN mentors m ON m.id = b.mentor_id
            WHERE b.id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load booking", e))?;

        row.map(|r| {
            Ok(Booking {
                id: BookingId::from_uuid(r.id),
                mentor_user_id: UserId::from_uuid(r.mentor_user_id),
                mentee_id: UserId::from_uuid(r.mentee_id),
                status: r.status.parse::<BookingStatus>()?,
            })
        })
        .transpose()
    }

    async fn update_booking_status(&self, id: &BookingId, status: BookingStatus) -> Result<()> {
        let result = sqlx::query("UPDATE bookings SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to update booking status", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("Booking {} not found", id)));
        }
        Ok(())
    }

    async fn get_participant(&self, user_id: &UserId) -> Result<Option<ParticipantProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT p.id, p.full_name, p.avatar_url, m.title
            FROM profiles p
            LEFT JOIN mentors m ON m.user_id = p.id
            WHERE p.id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load participant", e))?;

        Ok(row.map(|r| ParticipantProfile {
            user_id: UserId::from_uuid(r.id),
            display_name: r.full_name.unwrap_or_else(|| "Participant".to_string()),
            title: r.title,
            avatar_url: r.avatar_url,
        }))
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<CallSessionChange> {
        self.changes.subscribe()
    }
}
