//! Call session repository implementation
//!
//! Sessions are created under a transaction-scoped advisory lock on the
//! booking and a partial unique index on open sessions. Status changes use a
//! conditional update so racing writers resolve first-writer-wins.

use super::booking_repo::{BookingRow, BOOKING_COLUMNS};
use super::lock_booking;
use counsel_core::{
    models::{Booking, CallSession, CallStatus},
    traits::CallSessionRepository,
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

pub(crate) const SESSION_COLUMNS: &str = "id, booking_id, requester_id, counsellor_id, status, \
     requested_at, accepted_at, ended_at, completed_at, updated_at";

/// PostgreSQL implementation of CallSessionRepository
pub struct PgCallSessionRepository {
    pool: PgPool,
}

impl PgCallSessionRepository {
    /// Create a new call session repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse call status from string
    fn parse_status(s: &str) -> CallStatus {
        CallStatus::from_str(s).unwrap_or(CallStatus::Pending)
    }
}

#[async_trait]
impl CallSessionRepository for PgCallSessionRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CallSession>> {
        debug!("Finding call session by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, CallSessionRow>(&format!(
            "SELECT {} FROM call_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding call session {}: {}", id, e);
            AppError::Database(format!("Failed to find call session: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_latest_by_booking(&self, booking_id: i64) -> AppResult<Option<CallSession>> {
        debug!("Finding latest call session for booking: {}", booking_id);

        let result = sqlx::query_as::<sqlx::Postgres, CallSessionRow>(&format!(
            r#"
            SELECT {}
            FROM call_sessions
            WHERE booking_id = $1
            ORDER BY requested_at DESC
            LIMIT 1
            "#,
            SESSION_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding session for booking {}: {}", booking_id, e);
            AppError::Database(format!("Failed to find call session: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self, booking), fields(booking_id = booking.id))]
    async fn open_session(&self, booking: &Booking) -> AppResult<(CallSession, bool)> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        lock_booking(&mut tx, booking.id).await?;

        // Re-read the booking under the lock
        let current: Booking = sqlx::query_as::<sqlx::Postgres, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(booking.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to read booking: {}", e);
            AppError::Database(format!("Failed to read booking: {}", e))
        })?
        .ok_or_else(|| AppError::BookingNotFound(booking.id.to_string()))?
        .into();

        let existing = sqlx::query_as::<sqlx::Postgres, CallSessionRow>(&format!(
            r#"
            SELECT {}
            FROM call_sessions
            WHERE booking_id = $1 AND status IN ('PENDING', 'ACCEPTED')
            "#,
            SESSION_COLUMNS
        ))
        .bind(booking.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to look up open session: {}", e);
            AppError::Database(format!("Failed to look up open session: {}", e))
        })?;

        if let Some(row) = existing {
            tx.commit().await.map_err(|e| {
                error!("Failed to commit transaction: {}", e);
                AppError::Transaction(format!("Failed to commit transaction: {}", e))
            })?;
            debug!("Returning existing open session");
            return Ok((row.into(), false));
        }

        // An ended call must be settled before the booking rings again
        let unsettled: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM call_sessions WHERE booking_id = $1 AND status = 'ENDED' LIMIT 1",
        )
        .bind(booking.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to look up unsettled session: {}", e);
            AppError::Database(format!("Failed to look up unsettled session: {}", e))
        })?;

        if let Some((session_id,)) = unsettled {
            debug!(%session_id, "Refusing new call while an ended call is unsettled");
            return Err(AppError::InvalidTransition {
                from: CallStatus::Ended.to_string(),
                event: "initiate".to_string(),
            });
        }

        if !current.status.allows_calls() {
            return Err(AppError::InvalidBookingState {
                booking_id: current.id,
                status: current.status.to_string(),
                expected: "wallet_credited".to_string(),
            });
        }

        let session = CallSession::new(&current);

        let row = sqlx::query_as::<sqlx::Postgres, CallSessionRow>(&format!(
            r#"
            INSERT INTO call_sessions (
                id, booking_id, requester_id, counsellor_id, status, requested_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session.id)
        .bind(session.booking_id)
        .bind(session.requester_id)
        .bind(session.counsellor_id)
        .bind(session.status.to_string())
        .bind(session.requested_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to create call session: {}", e);
            AppError::Database(format!("Failed to create call session: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        info!(session_id = %session.id, "Created call session");

        Ok((row.into(), true))
    }

    #[instrument(skip(self, updated), fields(to = %updated.status))]
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: CallStatus,
        updated: &CallSession,
    ) -> AppResult<Option<CallSession>> {
        debug!("Moving call session {} from {}", id, expected);

        let result = sqlx::query_as::<sqlx::Postgres, CallSessionRow>(&format!(
            r#"
            UPDATE call_sessions
            SET status = $3,
                accepted_at = $4,
                ended_at = $5,
                completed_at = $6,
                updated_at = $7
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(id)
        .bind(expected.to_string())
        .bind(updated.status.to_string())
        .bind(updated.accepted_at)
        .bind(updated.ended_at)
        .bind(updated.completed_at)
        .bind(updated.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error updating call session {}: {}", id, e);
            AppError::Database(format!("Failed to update call session: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_pending_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<CallSession>> {
        let rows = sqlx::query_as::<sqlx::Postgres, CallSessionRow>(&format!(
            r#"
            SELECT {}
            FROM call_sessions
            WHERE status = 'PENDING' AND requested_at < $1
            ORDER BY requested_at
            "#,
            SESSION_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding stale pending sessions: {}", e);
            AppError::Database(format!("Failed to find pending sessions: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_pending_for_counsellor(&self, counsellor_id: i64) -> AppResult<Option<CallSession>> {
        let result = sqlx::query_as::<sqlx::Postgres, CallSessionRow>(&format!(
            r#"
            SELECT {}
            FROM call_sessions
            WHERE counsellor_id = $1 AND status = 'PENDING'
            ORDER BY requested_at
            LIMIT 1
            "#,
            SESSION_COLUMNS
        ))
        .bind(counsellor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding pending call for counsellor: {}", e);
            AppError::Database(format!("Failed to find pending call: {}", e))
        })?;

        Ok(result.map(Into::into))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CallSessionRow {
    id: Uuid,
    booking_id: i64,
    requester_id: i64,
    counsellor_id: i64,
    status: String,
    requested_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<CallSessionRow> for CallSession {
    fn from(row: CallSessionRow) -> Self {
        Self {
            id: row.id,
            booking_id: row.booking_id,
            requester_id: row.requester_id,
            counsellor_id: row.counsellor_id,
            status: PgCallSessionRepository::parse_status(&row.status),
            requested_at: row.requested_at,
            accepted_at: row.accepted_at,
            ended_at: row.ended_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counsel_core::models::{BookingStatus, NewBooking};
    use counsel_core::traits::BookingRepository;
    use crate::PgBookingRepository;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_status() {
        assert_eq!(
            PgCallSessionRepository::parse_status("ACCEPTED"),
            CallStatus::Accepted
        );
        assert_eq!(
            PgCallSessionRepository::parse_status("completed"),
            CallStatus::Completed
        );
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_open_session_is_idempotent() {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/counsel_broker".to_string());
        let pool = PgPool::connect(&url).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();

        let bookings = PgBookingRepository::new(pool.clone());
        let booking = bookings
            .create(&NewBooking {
                requester_id: 1001,
                counsellor_id: 2001,
                fee: dec!(500.00),
                duration_minutes: 20,
                scheduled_at: None,
            })
            .await
            .unwrap();
        sqlx::query("UPDATE bookings SET status = $2 WHERE id = $1")
            .bind(booking.id)
            .bind(BookingStatus::WalletCredited.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let repo = PgCallSessionRepository::new(pool);
        let (first, created) = repo.open_session(&booking).await.unwrap();
        let (second, created_again) = repo.open_session(&booking).await.unwrap();
        assert!(created);
        assert!(!created_again);
        assert_eq!(first.id, second.id);
    }
}
