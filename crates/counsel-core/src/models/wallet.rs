//! Wallet and ledger models
//!
//! Wallets are mutated only together with at least one append-only ledger
//! entry. Currency entries sum to the balance; EXTRA_MINUTES_CREDIT entries
//! sum to the extra-minutes credit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// Money in (payment credit, settlement payout)
    Deposit,
    /// Money out of the requester at settlement
    Transfer,
    /// Money out to an external destination
    Withdrawal,
    /// Unused minutes credited back to the requester; amount is a minute count
    ExtraMinutesCredit,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Deposit => write!(f, "DEPOSIT"),
            EntryKind::Transfer => write!(f, "TRANSFER"),
            EntryKind::Withdrawal => write!(f, "WITHDRAWAL"),
            EntryKind::ExtraMinutesCredit => write!(f, "EXTRA_MINUTES_CREDIT"),
        }
    }
}

impl EntryKind {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DEPOSIT" => Some(EntryKind::Deposit),
            "TRANSFER" => Some(EntryKind::Transfer),
            "WITHDRAWAL" => Some(EntryKind::Withdrawal),
            "EXTRA_MINUTES_CREDIT" => Some(EntryKind::ExtraMinutesCredit),
            _ => None,
        }
    }

    /// Whether the entry amount is money (as opposed to minutes)
    pub fn is_currency(&self) -> bool {
        !matches!(self, EntryKind::ExtraMinutesCredit)
    }
}

/// Wallet entity, one per account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub account_id: i64,
    pub balance: Decimal,
    pub extra_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Empty wallet for lazy creation on first credit
    pub fn empty(account_id: i64) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            balance: Decimal::ZERO,
            extra_minutes: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: i64,
    /// Signed amount: positive credits, negative debits
    pub amount: Decimal,
    pub kind: EntryKind,
    pub description: String,
    pub booking_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Entry to be appended; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub account_id: i64,
    pub amount: Decimal,
    pub kind: EntryKind,
    pub description: String,
    pub booking_id: Option<i64>,
}

impl NewLedgerEntry {
    pub fn new(account_id: i64, amount: Decimal, kind: EntryKind, description: impl Into<String>) -> Self {
        Self {
            account_id,
            amount,
            kind,
            description: description.into(),
            booking_id: None,
        }
    }

    pub fn for_booking(mut self, booking_id: i64) -> Self {
        self.booking_id = Some(booking_id);
        self
    }
}

/// Sums of a wallet's ledger entries
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub currency: Decimal,
    pub minutes: Decimal,
    pub entries: i64,
}

/// Result of recomputing a wallet from its ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub account_id: i64,
    pub balance: Decimal,
    pub ledger_balance: Decimal,
    pub extra_minutes: i32,
    pub ledger_extra_minutes: Decimal,
    pub entry_count: i64,
    pub consistent: bool,
}

impl AuditReport {
    pub fn new(wallet: &Wallet, totals: LedgerTotals) -> Self {
        let consistent = wallet.balance == totals.currency
            && Decimal::from(wallet.extra_minutes) == totals.minutes;
        Self {
            account_id: wallet.account_id,
            balance: wallet.balance,
            ledger_balance: totals.currency,
            extra_minutes: wallet.extra_minutes,
            ledger_extra_minutes: totals.minutes,
            entry_count: totals.entries,
            consistent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_entry_kind_round_trip() {
        for kind in [
            EntryKind::Deposit,
            EntryKind::Transfer,
            EntryKind::Withdrawal,
            EntryKind::ExtraMinutesCredit,
        ] {
            assert_eq!(EntryKind::from_str(&kind.to_string()), Some(kind));
        }
        assert!(!EntryKind::ExtraMinutesCredit.is_currency());
        assert!(EntryKind::Transfer.is_currency());
    }

    #[test]
    fn test_audit_detects_drift() {
        let mut wallet = Wallet::empty(5);
        wallet.balance = dec!(100.00);
        wallet.extra_minutes = 8;

        let ok = AuditReport::new(
            &wallet,
            LedgerTotals {
                currency: dec!(100.00),
                minutes: dec!(8),
                entries: 3,
            },
        );
        assert!(ok.consistent);

        let drift = AuditReport::new(
            &wallet,
            LedgerTotals {
                currency: dec!(90.00),
                minutes: dec!(8),
                entries: 3,
            },
        );
        assert!(!drift.consistent);
    }

    #[test]
    fn test_can_cover() {
        let mut wallet = Wallet::empty(1);
        wallet.balance = dec!(100.00);
        assert!(wallet.can_cover(dec!(100.00)));
        assert!(!wallet.can_cover(dec!(500.00)));
    }
}
