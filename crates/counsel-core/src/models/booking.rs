//! Booking model
//!
//! A booking is a purchased, time-boxed consultation between a requester and
//! a counsellor. The payment subsystem owns it; the call core only credits it
//! and closes it.

use super::binding::PartyRole;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Booking lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Created, payment not yet verified
    #[default]
    Pending,
    /// Fee deposited into the requester's wallet; calls may be placed
    WalletCredited,
    /// Settled
    Completed,
    /// Payment failed
    Failed,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Pending => write!(f, "pending"),
            BookingStatus::WalletCredited => write!(f, "wallet_credited"),
            BookingStatus::Completed => write!(f, "completed"),
            BookingStatus::Failed => write!(f, "failed"),
        }
    }
}

impl BookingStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "wallet_credited" => Some(BookingStatus::WalletCredited),
            "completed" => Some(BookingStatus::Completed),
            "failed" => Some(BookingStatus::Failed),
            _ => None,
        }
    }

    /// Whether a call may be initiated against the booking
    pub fn allows_calls(&self) -> bool {
        matches!(self, BookingStatus::WalletCredited)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Failed)
    }
}

/// Booking entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,

    /// Account that purchased the session
    pub requester_id: i64,

    /// Account that delivers the session
    pub counsellor_id: i64,

    /// Session fee
    pub fee: Decimal,

    /// Agreed duration in whole minutes
    pub duration_minutes: i32,

    pub status: BookingStatus,

    pub scheduled_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Resolve the role an account plays in this booking
    pub fn party_role(&self, account_id: i64) -> Option<PartyRole> {
        if account_id == self.requester_id {
            Some(PartyRole::Requester)
        } else if account_id == self.counsellor_id {
            Some(PartyRole::Counsellor)
        } else {
            None
        }
    }

    pub fn is_party(&self, account_id: i64) -> bool {
        self.party_role(account_id).is_some()
    }
}

/// Input for registering a booking created by the payment subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    pub requester_id: i64,
    pub counsellor_id: i64,
    pub fee: Decimal,
    pub duration_minutes: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn booking() -> Booking {
        let now = Utc::now();
        Booking {
            id: 1,
            requester_id: 10,
            counsellor_id: 20,
            fee: dec!(500.00),
            duration_minutes: 20,
            status: BookingStatus::WalletCredited,
            scheduled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_party_role_resolution() {
        let b = booking();
        assert_eq!(b.party_role(10), Some(PartyRole::Requester));
        assert_eq!(b.party_role(20), Some(PartyRole::Counsellor));
        assert_eq!(b.party_role(30), None);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::WalletCredited,
            BookingStatus::Completed,
            BookingStatus::Failed,
        ] {
            assert_eq!(BookingStatus::from_str(&status.to_string()), Some(status));
        }
        assert!(BookingStatus::WalletCredited.allows_calls());
        assert!(!BookingStatus::Completed.allows_calls());
    }
}
