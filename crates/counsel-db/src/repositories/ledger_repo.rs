//! Wallet ledger repository implementation
//!
//! Every wallet mutation happens in one transaction together with its
//! ledger entries. Settlement takes the booking advisory lock, then locks the
//! two wallets in ascending account-id order.

use super::booking_repo::{BookingRow, BOOKING_COLUMNS};
use super::call_session_repo::{CallSessionRow, SESSION_COLUMNS};
use super::lock_booking;
use counsel_core::{
    models::{
        Booking, BookingStatus, CallSession, CallStatus, EntryKind, LedgerEntry, LedgerTotals,
        NewLedgerEntry, SettlementPlan, SettlementResult, Wallet,
    },
    traits::LedgerRepository,
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const WALLET_COLUMNS: &str = "account_id, balance, extra_minutes, created_at, updated_at";

const SETTLEMENT_COLUMNS: &str = "booking_id, session_id, fee, actual_duration_minutes, \
     extra_minutes_credited, requester_balance, counsellor_balance, settled_at";

/// PostgreSQL implementation of LedgerRepository
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    /// Create a new ledger repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse entry kind from string
    fn parse_kind(s: &str) -> EntryKind {
        EntryKind::from_str(s).unwrap_or(EntryKind::Deposit)
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })
    }
}

async fn commit(tx: Transaction<'_, Postgres>) -> AppResult<()> {
    tx.commit().await.map_err(|e| {
        error!("Failed to commit transaction: {}", e);
        AppError::Transaction(format!("Failed to commit transaction: {}", e))
    })
}

/// Create the wallet row if it does not exist yet
async fn ensure_wallet(tx: &mut Transaction<'_, Postgres>, account_id: i64) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO wallets (account_id)
        VALUES ($1)
        ON CONFLICT (account_id) DO NOTHING
        "#,
    )
    .bind(account_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        error!("Failed to create wallet {}: {}", account_id, e);
        AppError::Database(format!("Failed to create wallet: {}", e))
    })?;
    Ok(())
}

async fn lock_wallet(tx: &mut Transaction<'_, Postgres>, account_id: i64) -> AppResult<Option<Wallet>> {
    let row = sqlx::query_as::<sqlx::Postgres, WalletRow>(&format!(
        "SELECT {} FROM wallets WHERE account_id = $1 FOR UPDATE",
        WALLET_COLUMNS
    ))
    .bind(account_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| {
        error!("Failed to lock wallet {}: {}", account_id, e);
        AppError::Database(format!("Failed to lock wallet: {}", e))
    })?;

    Ok(row.map(Into::into))
}

async fn adjust_wallet(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i64,
    balance_delta: Decimal,
    minutes_delta: i32,
) -> AppResult<Wallet> {
    let row = sqlx::query_as::<sqlx::Postgres, WalletRow>(&format!(
        r#"
        UPDATE wallets
        SET balance = balance + $2,
            extra_minutes = extra_minutes + $3,
            updated_at = NOW()
        WHERE account_id = $1
        RETURNING {}
        "#,
        WALLET_COLUMNS
    ))
    .bind(account_id)
    .bind(balance_delta)
    .bind(minutes_delta)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        error!("Failed to update wallet {}: {}", account_id, e);
        AppError::Database(format!("Failed to update wallet: {}", e))
    })?;

    Ok(row.into())
}

async fn insert_entry(tx: &mut Transaction<'_, Postgres>, entry: &NewLedgerEntry) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (account_id, amount, kind, description, booking_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(entry.account_id)
    .bind(entry.amount)
    .bind(entry.kind.to_string())
    .bind(&entry.description)
    .bind(entry.booking_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        error!("Failed to append ledger entry: {}", e);
        AppError::Database(format!("Failed to append ledger entry: {}", e))
    })?;
    Ok(())
}

async fn lock_booking_row(tx: &mut Transaction<'_, Postgres>, booking_id: i64) -> AppResult<Booking> {
    let row = sqlx::query_as::<sqlx::Postgres, BookingRow>(&format!(
        "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
        BOOKING_COLUMNS
    ))
    .bind(booking_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| {
        error!("Failed to lock booking {}: {}", booking_id, e);
        AppError::Database(format!("Failed to lock booking: {}", e))
    })?
    .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;

    Ok(row.into())
}

async fn set_booking_status(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: i64,
    status: BookingStatus,
) -> AppResult<()> {
    sqlx::query("UPDATE bookings SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(booking_id)
        .bind(status.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Failed to update booking {}: {}", booking_id, e);
            AppError::Database(format!("Failed to update booking: {}", e))
        })?;
    Ok(())
}

async fn fetch_settlement<'e, E>(executor: E, booking_id: i64) -> AppResult<Option<SettlementResult>>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<sqlx::Postgres, SettlementRow>(&format!(
        "SELECT {} FROM settlements WHERE booking_id = $1",
        SETTLEMENT_COLUMNS
    ))
    .bind(booking_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| {
        error!("Failed to read settlement for booking {}: {}", booking_id, e);
        AppError::Database(format!("Failed to read settlement: {}", e))
    })?;

    Ok(row.map(Into::into))
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    #[instrument(skip(self))]
    async fn find_wallet(&self, account_id: i64) -> AppResult<Option<Wallet>> {
        debug!("Finding wallet for account: {}", account_id);

        let row = sqlx::query_as::<sqlx::Postgres, WalletRow>(&format!(
            "SELECT {} FROM wallets WHERE account_id = $1",
            WALLET_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding wallet {}: {}", account_id, e);
            AppError::Database(format!("Failed to find wallet: {}", e))
        })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_entries(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<LedgerEntry>, i64)> {
        let rows = sqlx::query_as::<sqlx::Postgres, LedgerEntryRow>(
            r#"
            SELECT id, account_id, amount, kind, description, booking_id, created_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing ledger entries: {}", e);
            AppError::Database(format!("Failed to list ledger entries: {}", e))
        })?;

        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM ledger_entries WHERE account_id = $1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error counting ledger entries: {}", e);
                    AppError::Database(format!("Failed to count ledger entries: {}", e))
                })?;

        Ok((rows.into_iter().map(Into::into).collect(), total.0))
    }

    #[instrument(skip(self))]
    async fn ledger_totals(&self, account_id: i64) -> AppResult<LedgerTotals> {
        let (currency, minutes, entries): (Decimal, Decimal, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (WHERE kind <> 'EXTRA_MINUTES_CREDIT'), 0),
                COALESCE(SUM(amount) FILTER (WHERE kind = 'EXTRA_MINUTES_CREDIT'), 0),
                COUNT(*)
            FROM ledger_entries
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error summing ledger entries: {}", e);
            AppError::Database(format!("Failed to sum ledger entries: {}", e))
        })?;

        Ok(LedgerTotals {
            currency,
            minutes,
            entries,
        })
    }

    #[instrument(skip(self))]
    async fn credit_booking_payment(&self, booking_id: i64) -> AppResult<(Booking, Wallet)> {
        let mut tx = self.begin().await?;
        lock_booking(&mut tx, booking_id).await?;

        let booking = lock_booking_row(&mut tx, booking_id).await?;

        match booking.status {
            BookingStatus::WalletCredited => {
                let wallet = lock_wallet(&mut tx, booking.requester_id)
                    .await?
                    .unwrap_or_else(|| Wallet::empty(booking.requester_id));
                commit(tx).await?;
                debug!("Booking already credited");
                Ok((booking, wallet))
            }
            BookingStatus::Pending => {
                set_booking_status(&mut tx, booking_id, BookingStatus::WalletCredited).await?;
                ensure_wallet(&mut tx, booking.requester_id).await?;
                lock_wallet(&mut tx, booking.requester_id).await?;
                let wallet = adjust_wallet(&mut tx, booking.requester_id, booking.fee, 0).await?;
                insert_entry(
                    &mut tx,
                    &NewLedgerEntry::new(
                        booking.requester_id,
                        booking.fee,
                        EntryKind::Deposit,
                        format!("Payment for booking {}", booking_id),
                    )
                    .for_booking(booking_id),
                )
                .await?;

                commit(tx).await?;

                info!(
                    "Credited {} to wallet {} for booking {}",
                    booking.fee, booking.requester_id, booking_id
                );

                let booking = Booking {
                    status: BookingStatus::WalletCredited,
                    ..booking
                };
                Ok((booking, wallet))
            }
            other => Err(AppError::InvalidBookingState {
                booking_id,
                status: other.to_string(),
                expected: BookingStatus::Pending.to_string(),
            }),
        }
    }

    #[instrument(skip(self, description))]
    async fn withdraw(&self, account_id: i64, amount: Decimal, description: &str) -> AppResult<Wallet> {
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "withdrawal amount must be positive: {}",
                amount
            )));
        }

        let mut tx = self.begin().await?;

        let wallet = lock_wallet(&mut tx, account_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(account_id.to_string()))?;

        if !wallet.can_cover(amount) {
            warn!(
                "Insufficient balance for withdrawal from {}: required {}, available {}",
                account_id, amount, wallet.balance
            );
            return Err(AppError::InsufficientFunds {
                required: amount.to_string(),
                available: wallet.balance.to_string(),
            });
        }

        let wallet = adjust_wallet(&mut tx, account_id, -amount, 0).await?;
        insert_entry(
            &mut tx,
            &NewLedgerEntry::new(account_id, -amount, EntryKind::Withdrawal, description),
        )
        .await?;

        commit(tx).await?;

        info!("Withdrew {} from wallet {}", amount, account_id);
        Ok(wallet)
    }

    #[instrument(skip(self, plan), fields(booking_id = plan.booking_id, session_id = %plan.session.id))]
    async fn apply_settlement(&self, plan: &SettlementPlan) -> AppResult<(SettlementResult, bool)> {
        let mut tx = self.begin().await?;
        lock_booking(&mut tx, plan.booking_id).await?;

        if let Some(existing) = fetch_settlement(&mut *tx, plan.booking_id).await? {
            commit(tx).await?;
            debug!("Settlement already recorded");
            return Ok((existing, false));
        }

        let booking = lock_booking_row(&mut tx, plan.booking_id).await?;
        if booking.status != BookingStatus::WalletCredited {
            return Err(AppError::InvalidBookingState {
                booking_id: booking.id,
                status: booking.status.to_string(),
                expected: BookingStatus::WalletCredited.to_string(),
            });
        }

        let latest: Option<CallSession> = sqlx::query_as::<sqlx::Postgres, CallSessionRow>(&format!(
            r#"
            SELECT {}
            FROM call_sessions
            WHERE booking_id = $1
            ORDER BY requested_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
            SESSION_COLUMNS
        ))
        .bind(plan.booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to lock call session: {}", e);
            AppError::Database(format!("Failed to lock call session: {}", e))
        })?
        .map(Into::into);

        match latest {
            Some(ref s) if s.id == plan.session.id && s.status == CallStatus::Ended => {}
            Some(s) => {
                return Err(AppError::InvalidTransition {
                    from: s.status.to_string(),
                    event: "settle".to_string(),
                })
            }
            None => return Err(AppError::SessionNotFound(plan.session.id.to_string())),
        }

        for account_id in plan.lock_order() {
            ensure_wallet(&mut tx, account_id).await?;
        }
        let mut requester_balance = Decimal::ZERO;
        for account_id in plan.lock_order() {
            let wallet = lock_wallet(&mut tx, account_id)
                .await?
                .ok_or_else(|| AppError::WalletNotFound(account_id.to_string()))?;
            if account_id == plan.requester_id {
                requester_balance = wallet.balance;
            }
        }

        if requester_balance < plan.fee {
            warn!(
                "Insufficient balance for settlement: required {}, available {}",
                plan.fee, requester_balance
            );
            return Err(AppError::InsufficientFunds {
                required: plan.fee.to_string(),
                available: requester_balance.to_string(),
            });
        }

        let requester = adjust_wallet(&mut tx, plan.requester_id, -plan.fee, plan.extra_minutes).await?;
        let counsellor = adjust_wallet(&mut tx, plan.counsellor_id, plan.fee, 0).await?;

        for entry in plan.entries() {
            insert_entry(&mut tx, &entry).await?;
        }

        let settlement = sqlx::query_as::<sqlx::Postgres, SettlementRow>(&format!(
            r#"
            INSERT INTO settlements (
                booking_id, session_id, fee, actual_duration_minutes,
                extra_minutes_credited, requester_balance, counsellor_balance, settled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            SETTLEMENT_COLUMNS
        ))
        .bind(plan.booking_id)
        .bind(plan.session.id)
        .bind(plan.fee)
        .bind(plan.actual_duration_minutes)
        .bind(plan.extra_minutes)
        .bind(requester.balance)
        .bind(counsellor.balance)
        .bind(plan.settled_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to record settlement: {}", e);
            AppError::Database(format!("Failed to record settlement: {}", e))
        })?;

        set_booking_status(&mut tx, plan.booking_id, BookingStatus::Completed).await?;

        let moved = sqlx::query(
            r#"
            UPDATE call_sessions
            SET status = $3, completed_at = $4, updated_at = $4
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(plan.session.id)
        .bind(CallStatus::Ended.to_string())
        .bind(CallStatus::Completed.to_string())
        .bind(plan.settled_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to complete call session: {}", e);
            AppError::Database(format!("Failed to complete call session: {}", e))
        })?;

        if moved.rows_affected() != 1 {
            return Err(AppError::Transaction(
                "call session changed during settlement".to_string(),
            ));
        }

        commit(tx).await?;

        info!(
            "Settled booking {}: {} transferred, {} extra minutes",
            plan.booking_id, plan.fee, plan.extra_minutes
        );

        Ok((settlement.into(), true))
    }

    #[instrument(skip(self))]
    async fn find_settlement(&self, booking_id: i64) -> AppResult<Option<SettlementResult>> {
        fetch_settlement(&self.pool, booking_id).await
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    account_id: i64,
    balance: Decimal,
    extra_minutes: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Self {
            account_id: row.account_id,
            balance: row.balance,
            extra_minutes: row.extra_minutes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerEntryRow {
    id: i64,
    account_id: i64,
    amount: Decimal,
    kind: String,
    description: String,
    booking_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<LedgerEntryRow> for LedgerEntry {
    fn from(row: LedgerEntryRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            amount: row.amount,
            kind: PgLedgerRepository::parse_kind(&row.kind),
            description: row.description,
            booking_id: row.booking_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SettlementRow {
    booking_id: i64,
    session_id: Uuid,
    fee: Decimal,
    actual_duration_minutes: Decimal,
    extra_minutes_credited: i32,
    requester_balance: Decimal,
    counsellor_balance: Decimal,
    settled_at: DateTime<Utc>,
}

impl From<SettlementRow> for SettlementResult {
    fn from(row: SettlementRow) -> Self {
        Self {
            booking_id: row.booking_id,
            session_id: row.session_id,
            fee: row.fee,
            actual_duration_minutes: row.actual_duration_minutes,
            extra_minutes_credited: row.extra_minutes_credited,
            requester_balance: row.requester_balance,
            counsellor_balance: row.counsellor_balance,
            settled_at: row.settled_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(
            PgLedgerRepository::parse_kind("EXTRA_MINUTES_CREDIT"),
            EntryKind::ExtraMinutesCredit
        );
        assert_eq!(
            PgLedgerRepository::parse_kind("withdrawal"),
            EntryKind::Withdrawal
        );
    }
}
