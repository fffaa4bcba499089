//! Settlement engine
//!
//! Closes out a booking after its call ended: the requester pays the full
//! fee to the counsellor and is credited the minutes they did not use.
//! Settling is idempotent per booking; a retry returns the recorded result.

use crate::hub::{HubMessage, NotificationHub, Scope};
use crate::locks::BookingLocks;
use chrono::Utc;
use counsel_core::models::{Identity, SettlementPlan, SettlementResult};
use counsel_core::traits::{BookingRepository, CallSessionRepository, LedgerRepository};
use counsel_core::{AppError, AppResult};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct SettlementEngine {
    bookings: Arc<dyn BookingRepository>,
    sessions: Arc<dyn CallSessionRepository>,
    ledger: Arc<dyn LedgerRepository>,
    hub: Arc<NotificationHub>,
    locks: Arc<BookingLocks>,
}

impl SettlementEngine {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        sessions: Arc<dyn CallSessionRepository>,
        ledger: Arc<dyn LedgerRepository>,
        hub: Arc<NotificationHub>,
        locks: Arc<BookingLocks>,
    ) -> Self {
        Self {
            bookings,
            sessions,
            ledger,
            hub,
            locks,
        }
    }

    /// Settle a booking whose latest call has ended.
    ///
    /// # Errors
    ///
    /// - `Validation` for a negative duration
    /// - `InvalidBookingState` unless the booking is `wallet_credited`
    /// - `InvalidTransition` unless the latest session is ENDED
    /// - `InsufficientFunds` when the requester cannot cover the fee
    #[instrument(skip(self))]
    pub async fn settle(
        &self,
        booking_id: i64,
        actual_duration_minutes: Decimal,
    ) -> AppResult<SettlementResult> {
        if actual_duration_minutes < Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "actual duration cannot be negative: {}",
                actual_duration_minutes
            )));
        }

        let guard = self.locks.lock(booking_id).await;

        if let Some(existing) = self.ledger.find_settlement(booking_id).await? {
            debug!("Booking already settled");
            return Ok(existing);
        }

        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;

        let session = self
            .sessions
            .find_latest_by_booking(booking_id)
            .await?
            .ok_or_else(|| {
                AppError::SessionNotFound(format!("no call for booking {}", booking_id))
            })?;

        let plan = SettlementPlan::new(&booking, &session, actual_duration_minutes, Utc::now())?;
        let (result, created) = self.ledger.apply_settlement(&plan).await?;

        if created {
            info!(
                session_id = %result.session_id,
                fee = %result.fee,
                extra_minutes = result.extra_minutes_credited,
                "Booking settled"
            );
            self.hub
                .publish(
                    booking_id,
                    HubMessage::CallCompleted {
                        session: plan.completed.clone(),
                        settlement: result.clone(),
                    },
                    Scope::All,
                )
                .await;
        }

        drop(guard);
        self.locks.prune();

        Ok(result)
    }

    /// Settle on behalf of a caller: a party to the booking or an admin
    pub async fn settle_by(
        &self,
        identity: Identity,
        booking_id: i64,
        actual_duration_minutes: Decimal,
    ) -> AppResult<SettlementResult> {
        if !identity.role.is_admin() {
            let booking = self
                .bookings
                .find_by_id(booking_id)
                .await?
                .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;
            if !booking.is_party(identity.account_id) {
                return Err(AppError::NotAuthorized(format!(
                    "account {} is not a party to booking {}",
                    identity.account_id, booking_id
                )));
            }
        }

        self.settle(booking_id, actual_duration_minutes).await
    }

    /// Recorded settlement for a booking, if any
    pub async fn find(&self, booking_id: i64) -> AppResult<Option<SettlementResult>> {
        self.ledger.find_settlement(booking_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counsel_core::models::{
        AccountRole, Actor, CallEvent, CallStatus, EntryKind, NewBooking, PartyRole,
    };
    use counsel_core::traits::CallSessionRepository;
    use counsel_db::MemoryStore;
    use rust_decimal_macros::dec;

    const REQUESTER: i64 = 10;
    const COUNSELLOR: i64 = 20;

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: SettlementEngine,
        booking_id: i64,
    }

    /// Paid booking (fee 500.00, 20 minutes) whose call is in `status`
    async fn fixture(status: Option<CallStatus>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(BookingLocks::new());
        let hub = Arc::new(NotificationHub::new(store.clone(), locks.clone(), 16));
        let engine = SettlementEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            hub,
            locks,
        );

        let booking = store
            .create(&NewBooking {
                requester_id: REQUESTER,
                counsellor_id: COUNSELLOR,
                fee: dec!(500.00),
                duration_minutes: 20,
                scheduled_at: None,
            })
            .await
            .unwrap();
        let (booking, _) = store.credit_booking_payment(booking.id).await.unwrap();

        if let Some(status) = status {
            let (session, _) = store.open_session(&booking).await.unwrap();
            let counsellor = Actor::party(COUNSELLOR, PartyRole::Counsellor);
            let path: &[CallEvent] = match status {
                CallStatus::Pending => &[],
                CallStatus::Accepted => &[CallEvent::Accept],
                CallStatus::Ended => &[CallEvent::Accept, CallEvent::End],
                _ => unreachable!(),
            };
            let mut current = session;
            for event in path {
                let next = current.apply(*event, &counsellor, Utc::now()).unwrap();
                current = store
                    .compare_and_set_status(current.id, current.status, &next)
                    .await
                    .unwrap()
                    .unwrap();
            }
        }

        Fixture {
            store,
            engine,
            booking_id: booking.id,
        }
    }

    #[tokio::test]
    async fn test_settle_moves_fee_and_credits_minutes() {
        let f = fixture(Some(CallStatus::Ended)).await;

        let result = f.engine.settle(f.booking_id, dec!(12)).await.unwrap();
        assert_eq!(result.fee, dec!(500.00));
        assert_eq!(result.extra_minutes_credited, 8);
        assert_eq!(result.requester_balance, dec!(0.00));
        assert_eq!(result.counsellor_balance, dec!(500.00));

        let requester = f.store.find_wallet(REQUESTER).await.unwrap().unwrap();
        assert_eq!(requester.extra_minutes, 8);

        let (entries, _) = f.store.list_entries(REQUESTER, 10, 0).await.unwrap();
        let kinds: Vec<EntryKind> = entries.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EntryKind::Transfer));
        assert!(kinds.contains(&EntryKind::ExtraMinutesCredit));

        let session = f.store.find_latest_by_booking(f.booking_id).await.unwrap().unwrap();
        assert_eq!(session.status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn test_settle_twice_writes_once() {
        let f = fixture(Some(CallStatus::Ended)).await;

        let first = f.engine.settle(f.booking_id, dec!(12)).await.unwrap();
        let entries = f.store.entry_count();
        let second = f.engine.settle(f.booking_id, dec!(3)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.store.entry_count(), entries);
    }

    #[tokio::test]
    async fn test_overrun_credits_no_minutes() {
        let f = fixture(Some(CallStatus::Ended)).await;
        let result = f.engine.settle(f.booking_id, dec!(25.5)).await.unwrap();
        assert_eq!(result.extra_minutes_credited, 0);

        let (entries, _) = f.store.list_entries(REQUESTER, 10, 0).await.unwrap();
        assert!(entries.iter().all(|e| e.kind != EntryKind::ExtraMinutesCredit));
    }

    #[tokio::test]
    async fn test_settle_requires_ended_call() {
        let f = fixture(Some(CallStatus::Accepted)).await;
        let entries = f.store.entry_count();

        let err = f.engine.settle(f.booking_id, dec!(12)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(f.store.entry_count(), entries);
    }

    #[tokio::test]
    async fn test_settle_without_call() {
        let f = fixture(None).await;
        let err = f.engine.settle(f.booking_id, dec!(12)).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_negative_duration_is_rejected() {
        let f = fixture(Some(CallStatus::Ended)).await;
        let err = f.engine.settle(f.booking_id, dec!(-1)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_settle_by_checks_party() {
        let f = fixture(Some(CallStatus::Ended)).await;
        let stranger = Identity {
            account_id: 99,
            role: AccountRole::User,
        };
        let err = f
            .engine
            .settle_by(stranger, f.booking_id, dec!(12))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));

        let admin = Identity {
            account_id: 99,
            role: AccountRole::Admin,
        };
        let result = f.engine.settle_by(admin, f.booking_id, dec!(12)).await.unwrap();
        assert_eq!(result.extra_minutes_credited, 8);
        assert_eq!(f.engine.find(f.booking_id).await.unwrap(), Some(result));
    }
}
