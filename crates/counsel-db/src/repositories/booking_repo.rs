//! Booking repository implementation
//!
//! Provides PostgreSQL-backed storage for bookings.

use counsel_core::{
    models::{Booking, BookingStatus, NewBooking},
    traits::BookingRepository,
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument};

pub(crate) const BOOKING_COLUMNS: &str = "id, requester_id, counsellor_id, fee, duration_minutes, \
     status, scheduled_at, created_at, updated_at";

/// PostgreSQL implementation of BookingRepository
pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    /// Create a new booking repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse booking status from string
    fn parse_status(s: &str) -> BookingStatus {
        BookingStatus::from_str(s).unwrap_or(BookingStatus::Pending)
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Booking>> {
        debug!("Finding booking by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding booking {}: {}", id, e);
            AppError::Database(format!("Failed to find booking: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self, booking), fields(requester_id = booking.requester_id, counsellor_id = booking.counsellor_id))]
    async fn create(&self, booking: &NewBooking) -> AppResult<Booking> {
        debug!("Creating booking");

        let row = sqlx::query_as::<sqlx::Postgres, BookingRow>(&format!(
            r#"
            INSERT INTO bookings (requester_id, counsellor_id, fee, duration_minutes, status, scheduled_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(booking.requester_id)
        .bind(booking.counsellor_id)
        .bind(booking.fee)
        .bind(booking.duration_minutes)
        .bind(BookingStatus::Pending.to_string())
        .bind(booking.scheduled_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error creating booking: {}", e);
            AppError::Database(format!("Failed to create booking: {}", e))
        })?;

        Ok(row.into())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BookingRow {
    id: i64,
    requester_id: i64,
    counsellor_id: i64,
    fee: Decimal,
    duration_minutes: i32,
    status: String,
    scheduled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Self {
            id: row.id,
            requester_id: row.requester_id,
            counsellor_id: row.counsellor_id,
            fee: row.fee,
            duration_minutes: row.duration_minutes,
            status: PgBookingRepository::parse_status(&row.status),
            scheduled_at: row.scheduled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(
            PgBookingRepository::parse_status("wallet_credited"),
            BookingStatus::WalletCredited
        );
        assert_eq!(
            PgBookingRepository::parse_status("completed"),
            BookingStatus::Completed
        );
    }
}
