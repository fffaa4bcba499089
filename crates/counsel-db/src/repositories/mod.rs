//! Repository implementations
//!
//! This module contains concrete implementations of the repository traits
//! defined in counsel-core, using sqlx for PostgreSQL access.

pub mod booking_repo;
pub mod call_session_repo;
pub mod ledger_repo;

pub use booking_repo::PgBookingRepository;
pub use call_session_repo::PgCallSessionRepository;
pub use ledger_repo::PgLedgerRepository;

/// Take the transaction-scoped advisory lock that serializes writers of one booking
pub(crate) async fn lock_booking(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    booking_id: i64,
) -> Result<(), counsel_core::AppError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(booking_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to take booking lock {}: {}", booking_id, e);
            counsel_core::AppError::Database(format!("Failed to lock booking: {}", e))
        })?;
    Ok(())
}
