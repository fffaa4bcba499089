//! Settlement arithmetic
//!
//! A settlement moves the full booking fee from the requester to the
//! counsellor and credits unused agreed minutes back to the requester.
//! The plan is computed up front so the store can apply it in a single
//! transaction.

use super::booking::Booking;
use super::call_session::{Actor, CallEvent, CallSession};
use super::wallet::{EntryKind, NewLedgerEntry};
use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unused minutes: `trunc(max(0, agreed - actual))`, truncating toward zero
pub fn unused_minutes(agreed_minutes: i32, actual_minutes: Decimal) -> AppResult<i32> {
    if actual_minutes.is_sign_negative() && !actual_minutes.is_zero() {
        return Err(AppError::Validation(format!(
            "actual duration cannot be negative: {}",
            actual_minutes
        )));
    }

    let remaining = (Decimal::from(agreed_minutes) - actual_minutes).max(Decimal::ZERO);
    remaining
        .trunc()
        .to_i32()
        .ok_or_else(|| AppError::Internal(format!("unused minutes out of range: {}", remaining)))
}

/// Everything the store needs to apply one settlement atomically
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub booking_id: i64,
    pub requester_id: i64,
    pub counsellor_id: i64,
    pub fee: Decimal,
    pub actual_duration_minutes: Decimal,
    pub extra_minutes: i32,
    /// Session snapshot the call moves from (must still be ENDED at apply time)
    pub session: CallSession,
    /// Session snapshot after ENDED -> COMPLETED
    pub completed: CallSession,
    pub settled_at: DateTime<Utc>,
}

impl SettlementPlan {
    /// Validate preconditions and compute the plan.
    ///
    /// The booking must be `wallet_credited` and the session must be its
    /// most recent one, in ENDED.
    pub fn new(
        booking: &Booking,
        session: &CallSession,
        actual_duration_minutes: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let extra_minutes = unused_minutes(booking.duration_minutes, actual_duration_minutes)?;

        if !booking.status.allows_calls() {
            return Err(AppError::InvalidBookingState {
                booking_id: booking.id,
                status: booking.status.to_string(),
                expected: "wallet_credited".to_string(),
            });
        }

        if session.booking_id != booking.id {
            return Err(AppError::Internal(format!(
                "session {} does not belong to booking {}",
                session.id, booking.id
            )));
        }

        let completed = session.apply(CallEvent::Settle, &Actor::System, now)?;

        Ok(Self {
            booking_id: booking.id,
            requester_id: booking.requester_id,
            counsellor_id: booking.counsellor_id,
            fee: booking.fee,
            actual_duration_minutes,
            extra_minutes,
            session: session.clone(),
            completed,
            settled_at: now,
        })
    }

    /// Ledger entries to append, in order
    pub fn entries(&self) -> Vec<NewLedgerEntry> {
        let mut entries = vec![
            NewLedgerEntry::new(
                self.requester_id,
                -self.fee,
                EntryKind::Transfer,
                format!("Session fee for booking {}", self.booking_id),
            )
            .for_booking(self.booking_id),
            NewLedgerEntry::new(
                self.counsellor_id,
                self.fee,
                EntryKind::Deposit,
                format!("Payout for booking {}", self.booking_id),
            )
            .for_booking(self.booking_id),
        ];

        if self.extra_minutes > 0 {
            entries.push(
                NewLedgerEntry::new(
                    self.requester_id,
                    Decimal::from(self.extra_minutes),
                    EntryKind::ExtraMinutesCredit,
                    format!(
                        "{} unused minutes from booking {}",
                        self.extra_minutes, self.booking_id
                    ),
                )
                .for_booking(self.booking_id),
            );
        }

        entries
    }

    /// Wallet ids in lock order (ascending account id)
    pub fn lock_order(&self) -> [i64; 2] {
        if self.requester_id <= self.counsellor_id {
            [self.requester_id, self.counsellor_id]
        } else {
            [self.counsellor_id, self.requester_id]
        }
    }
}

/// Persisted outcome of a settlement; a retried settle returns it unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub booking_id: i64,
    pub session_id: Uuid,
    pub fee: Decimal,
    pub actual_duration_minutes: Decimal,
    pub extra_minutes_credited: i32,
    pub requester_balance: Decimal,
    pub counsellor_balance: Decimal,
    pub settled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingStatus, CallStatus, PartyRole};
    use rust_decimal_macros::dec;

    fn booking() -> Booking {
        let now = Utc::now();
        Booking {
            id: 3,
            requester_id: 10,
            counsellor_id: 4,
            fee: dec!(500.00),
            duration_minutes: 20,
            status: BookingStatus::WalletCredited,
            scheduled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn ended(booking: &Booking) -> CallSession {
        let s = CallSession::new(booking);
        s.apply(
            CallEvent::End,
            &Actor::party(booking.requester_id, PartyRole::Requester),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_unused_minutes_truncates_toward_zero() {
        assert_eq!(unused_minutes(20, dec!(12)).unwrap(), 8);
        assert_eq!(unused_minutes(20, dec!(12.4)).unwrap(), 7);
        assert_eq!(unused_minutes(20, dec!(19.99)).unwrap(), 0);
        assert_eq!(unused_minutes(20, dec!(25)).unwrap(), 0);
        assert_eq!(unused_minutes(20, dec!(0)).unwrap(), 20);
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let err = unused_minutes(20, dec!(-1)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_plan_entries() {
        let b = booking();
        let plan = SettlementPlan::new(&b, &ended(&b), dec!(12), Utc::now()).unwrap();
        assert_eq!(plan.extra_minutes, 8);
        assert_eq!(plan.completed.status, CallStatus::Completed);

        let entries = plan.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].account_id, 10);
        assert_eq!(entries[0].amount, dec!(-500.00));
        assert_eq!(entries[0].kind, EntryKind::Transfer);
        assert_eq!(entries[1].account_id, 4);
        assert_eq!(entries[1].amount, dec!(500.00));
        assert_eq!(entries[2].kind, EntryKind::ExtraMinutesCredit);
        assert_eq!(entries[2].amount, dec!(8));
        assert!(entries.iter().all(|e| e.booking_id == Some(3)));
    }

    #[test]
    fn test_no_minutes_entry_when_fully_used() {
        let b = booking();
        let plan = SettlementPlan::new(&b, &ended(&b), dec!(20), Utc::now()).unwrap();
        assert_eq!(plan.entries().len(), 2);
    }

    #[test]
    fn test_plan_requires_ended_session() {
        let b = booking();
        let pending = CallSession::new(&b);
        let err = SettlementPlan::new(&b, &pending, dec!(5), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn test_plan_requires_credited_booking() {
        let mut b = booking();
        let session = ended(&b);
        b.status = BookingStatus::Completed;
        let err = SettlementPlan::new(&b, &session, dec!(5), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidBookingState { .. }));
    }

    #[test]
    fn test_lock_order_is_ascending() {
        let b = booking();
        let plan = SettlementPlan::new(&b, &ended(&b), dec!(1), Utc::now()).unwrap();
        assert_eq!(plan.lock_order(), [4, 10]);
    }
}
