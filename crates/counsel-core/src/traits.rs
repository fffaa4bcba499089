//! Common traits for repositories and collaborators
//!
//! Defines the storage seams implemented by `counsel-db` (PostgreSQL and
//! in-memory) and the credential verifier implemented by `counsel-auth`.

use crate::error::AppError;
use crate::models::{
    Booking, CallSession, CallStatus, Identity, LedgerEntry, LedgerTotals, NewBooking,
    SettlementPlan, SettlementResult, Wallet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Booking store
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Find booking by ID
    async fn find_by_id(&self, id: i64) -> Result<Option<Booking>, AppError>;

    /// Register a booking in `pending` status
    async fn create(&self, booking: &NewBooking) -> Result<Booking, AppError>;
}

/// Call session store
#[async_trait]
pub trait CallSessionRepository: Send + Sync {
    /// Find session by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<CallSession>, AppError>;

    /// Most recent session for a booking, by request time
    async fn find_latest_by_booking(&self, booking_id: i64)
        -> Result<Option<CallSession>, AppError>;

    /// Insert a PENDING session for the booking, or return the open one.
    ///
    /// Re-checks that the booking is `wallet_credited` in the same
    /// transaction. Returns the session and whether it was created.
    async fn open_session(&self, booking: &Booking) -> Result<(CallSession, bool), AppError>;

    /// Store `updated` only if the session is still in `expected`.
    ///
    /// Returns `None` when another writer moved the session first.
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: CallStatus,
        updated: &CallSession,
    ) -> Result<Option<CallSession>, AppError>;

    /// PENDING sessions requested before `cutoff`
    async fn find_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CallSession>, AppError>;

    /// Oldest PENDING session awaiting the counsellor
    async fn find_pending_for_counsellor(
        &self,
        counsellor_id: i64,
    ) -> Result<Option<CallSession>, AppError>;
}

/// Wallet ledger store.
///
/// Every method that changes a wallet writes its ledger entries in the same
/// transaction.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Find wallet by account ID
    async fn find_wallet(&self, account_id: i64) -> Result<Option<Wallet>, AppError>;

    /// Ledger entries for an account, newest first, with total count
    async fn list_entries(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LedgerEntry>, i64), AppError>;

    /// Sum of currency and minute entries for an account
    async fn ledger_totals(&self, account_id: i64) -> Result<LedgerTotals, AppError>;

    /// Move a `pending` booking to `wallet_credited` and deposit its fee
    /// into the requester's wallet. A credited booking is left unchanged.
    async fn credit_booking_payment(&self, booking_id: i64) -> Result<(Booking, Wallet), AppError>;

    /// Debit an account with a WITHDRAWAL entry
    async fn withdraw(
        &self,
        account_id: i64,
        amount: Decimal,
        description: &str,
    ) -> Result<Wallet, AppError>;

    /// Apply a settlement plan atomically.
    ///
    /// If a settlement for the booking already exists it is returned and
    /// nothing is written. The flag reports whether this call wrote it.
    async fn apply_settlement(
        &self,
        plan: &SettlementPlan,
    ) -> Result<(SettlementResult, bool), AppError>;

    /// Recorded settlement for a booking
    async fn find_settlement(&self, booking_id: i64) -> Result<Option<SettlementResult>, AppError>;
}

/// Bearer credential verification
pub trait CredentialVerifier: Send + Sync {
    /// Verify a token and return the identity it carries
    fn verify(&self, token: &str) -> Result<Identity, AppError>;
}
