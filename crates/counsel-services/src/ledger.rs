//! Wallet ledger service
//!
//! Payment recording, withdrawals and read-only wallet views. Every wallet
//! change goes through the ledger repository, which writes the balance and
//! its entries together.

use crate::locks::BookingLocks;
use counsel_core::models::{AuditReport, Booking, LedgerEntry, Wallet};
use counsel_core::traits::LedgerRepository;
use counsel_core::{AppError, AppResult};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Largest history page served at once
pub const MAX_PAGE_SIZE: i64 = 100;

/// One page of an account's ledger, newest first
#[derive(Debug, Clone, Serialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

pub struct LedgerService {
    ledger: Arc<dyn LedgerRepository>,
    locks: Arc<BookingLocks>,
}

impl LedgerService {
    pub fn new(ledger: Arc<dyn LedgerRepository>, locks: Arc<BookingLocks>) -> Self {
        Self { ledger, locks }
    }

    /// Confirm payment for a booking and credit the requester's wallet
    #[instrument(skip(self))]
    pub async fn record_payment(&self, booking_id: i64) -> AppResult<(Booking, Wallet)> {
        let _guard = self.locks.lock(booking_id).await;
        let (booking, wallet) = self.ledger.credit_booking_payment(booking_id).await?;
        info!(
            requester_id = booking.requester_id,
            balance = %wallet.balance,
            "Payment recorded"
        );
        Ok((booking, wallet))
    }

    #[instrument(skip(self, description))]
    pub async fn withdraw(
        &self,
        account_id: i64,
        amount: Decimal,
        description: &str,
    ) -> AppResult<Wallet> {
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "withdrawal amount must be positive: {}",
                amount
            )));
        }
        self.ledger.withdraw(account_id, amount, description).await
    }

    pub async fn wallet(&self, account_id: i64) -> AppResult<Wallet> {
        self.ledger
            .find_wallet(account_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(account_id.to_string()))
    }

    /// Page through an account's entries; pages start at 1
    pub async fn history(&self, account_id: i64, page: i64, per_page: i64) -> AppResult<LedgerPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
        let (entries, total) = self
            .ledger
            .list_entries(account_id, per_page, (page - 1) * per_page)
            .await?;

        Ok(LedgerPage {
            entries,
            total,
            page,
            per_page,
        })
    }

    /// Recompute a wallet from its entries
    #[instrument(skip(self))]
    pub async fn audit(&self, account_id: i64) -> AppResult<AuditReport> {
        let wallet = self.wallet(account_id).await?;
        let totals = self.ledger.ledger_totals(account_id).await?;
        let report = AuditReport::new(&wallet, totals);
        if !report.consistent {
            warn!(
                balance = %report.balance,
                ledger_balance = %report.ledger_balance,
                extra_minutes = report.extra_minutes,
                ledger_extra_minutes = %report.ledger_extra_minutes,
                "Wallet does not match its ledger"
            );
        }
        Ok(report)
    }
}
