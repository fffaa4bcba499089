//! Call session service
//!
//! Drives the call lifecycle for a booking. Each write holds the booking's
//! lock from persist through publish, so subscribers observe transitions in
//! commit order. Persisted transitions use compare-and-set on the previous
//! status; a lost race surfaces as `InvalidTransition`.

use crate::hub::{HubMessage, NotificationHub, Scope};
use crate::locks::BookingLocks;
use chrono::Utc;
use counsel_core::models::{Actor, Booking, CallEvent, CallSession};
use counsel_core::traits::{BookingRepository, CallSessionRepository};
use counsel_core::{AppError, AppResult};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Call lifecycle operations
pub struct CallSessionService {
    bookings: Arc<dyn BookingRepository>,
    sessions: Arc<dyn CallSessionRepository>,
    hub: Arc<NotificationHub>,
    locks: Arc<BookingLocks>,
}

impl CallSessionService {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        sessions: Arc<dyn CallSessionRepository>,
        hub: Arc<NotificationHub>,
        locks: Arc<BookingLocks>,
    ) -> Self {
        Self {
            bookings,
            sessions,
            hub,
            locks,
        }
    }

    async fn booking(&self, booking_id: i64) -> AppResult<Booking> {
        self.bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))
    }

    /// Resolve the caller's role on a booking
    pub async fn actor_for(&self, booking_id: i64, account_id: i64) -> AppResult<Actor> {
        let booking = self.booking(booking_id).await?;
        booking
            .party_role(account_id)
            .map(|role| Actor::party(account_id, role))
            .ok_or_else(|| {
                AppError::NotAuthorized(format!(
                    "account {} is not a party to booking {}",
                    account_id, booking_id
                ))
            })
    }

    /// Ring the counsellor for a paid booking.
    ///
    /// Returns the open session unchanged when one already exists; only a
    /// newly created session is announced.
    #[instrument(skip(self))]
    pub async fn initiate(&self, booking_id: i64, requester_id: i64) -> AppResult<CallSession> {
        let _guard = self.locks.lock(booking_id).await;

        let booking = self.booking(booking_id).await?;
        if booking.requester_id != requester_id {
            return Err(AppError::NotAuthorized(format!(
                "account {} is not the requester of booking {}",
                requester_id, booking_id
            )));
        }

        let (session, created) = self.sessions.open_session(&booking).await?;
        if created {
            info!(session_id = %session.id, "Call requested");
            self.hub
                .publish(booking_id, HubMessage::CallRequested(session.clone()), Scope::All)
                .await;
        } else {
            debug!(session_id = %session.id, status = %session.status, "Returning open session");
        }

        Ok(session)
    }

    /// Apply a party or sweeper event to a session.
    ///
    /// Settlement is only reachable through the settlement engine.
    #[instrument(skip(self, actor), fields(event = %event))]
    pub async fn transition(
        &self,
        session_id: Uuid,
        event: CallEvent,
        actor: Actor,
    ) -> AppResult<CallSession> {
        let found = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        let _guard = self.locks.lock(found.booking_id).await;

        if event == CallEvent::Settle {
            return Err(AppError::NotAuthorized(
                "settlement is driven by the settlement engine".to_string(),
            ));
        }

        // Re-read under the lock; the first read only located the booking
        let current = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        let updated = current.apply(event, &actor, Utc::now())?;

        let stored = match self
            .sessions
            .compare_and_set_status(session_id, current.status, &updated)
            .await?
        {
            Some(stored) => stored,
            None => {
                // Another process moved the session first
                let latest = self
                    .sessions
                    .find_by_id(session_id)
                    .await?
                    .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
                warn!(
                    session_id = %session_id,
                    status = %latest.status,
                    "Lost transition race"
                );
                return Err(AppError::InvalidTransition {
                    from: latest.status.to_string(),
                    event: event.to_string(),
                });
            }
        };

        info!(
            session_id = %stored.id,
            booking_id = stored.booking_id,
            from = %current.status,
            to = %stored.status,
            "Call transitioned"
        );

        if let Some(message) = HubMessage::for_transition(&stored) {
            self.hub.publish(stored.booking_id, message, Scope::All).await;
        }

        Ok(stored)
    }

    /// Most recent session of a booking, without a party check
    pub async fn latest(&self, booking_id: i64) -> AppResult<CallSession> {
        self.sessions
            .find_latest_by_booking(booking_id)
            .await?
            .ok_or_else(|| {
                AppError::SessionNotFound(format!("no call for booking {}", booking_id))
            })
    }

    async fn on_latest(&self, booking_id: i64, event: CallEvent, actor: Actor) -> AppResult<CallSession> {
        let session = self.latest(booking_id).await?;
        self.transition(session.id, event, actor).await
    }

    /// Counsellor picks up the booking's ringing call
    pub async fn accept(&self, booking_id: i64, actor: Actor) -> AppResult<CallSession> {
        self.on_latest(booking_id, CallEvent::Accept, actor).await
    }

    /// Counsellor declines the booking's ringing call
    pub async fn reject(&self, booking_id: i64, actor: Actor) -> AppResult<CallSession> {
        self.on_latest(booking_id, CallEvent::Reject, actor).await
    }

    /// Either party hangs up
    pub async fn end(&self, booking_id: i64, actor: Actor) -> AppResult<CallSession> {
        self.on_latest(booking_id, CallEvent::End, actor).await
    }

    /// Give up on a call nobody answered
    pub async fn expire(&self, session_id: Uuid) -> AppResult<CallSession> {
        self.transition(session_id, CallEvent::Expire, Actor::System).await
    }

    /// Most recent session of a booking, visible to its parties only
    #[instrument(skip(self))]
    pub async fn current(&self, booking_id: i64, account_id: i64) -> AppResult<Option<CallSession>> {
        self.actor_for(booking_id, account_id).await?;
        self.sessions.find_latest_by_booking(booking_id).await
    }

    /// Oldest call still ringing for a counsellor
    pub async fn pending_for_counsellor(&self, counsellor_id: i64) -> AppResult<Option<CallSession>> {
        self.sessions.find_pending_for_counsellor(counsellor_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counsel_core::models::{Binding, CallStatus, NewBooking, PartyRole};
    use counsel_core::traits::LedgerRepository;
    use counsel_db::MemoryStore;
    use rust_decimal_macros::dec;

    const REQUESTER: i64 = 1;
    const COUNSELLOR: i64 = 2;

    struct Fixture {
        store: Arc<MemoryStore>,
        hub: Arc<NotificationHub>,
        service: CallSessionService,
        booking_id: i64,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(BookingLocks::new());
        let hub = Arc::new(NotificationHub::new(store.clone(), locks.clone(), 16));
        let service = CallSessionService::new(store.clone(), store.clone(), hub.clone(), locks);

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
        store.credit_booking_payment(booking.id).await.unwrap();

        Fixture {
            store,
            hub,
            service,
            booking_id: booking.id,
        }
    }

    fn counsellor() -> Actor {
        Actor::party(COUNSELLOR, PartyRole::Counsellor)
    }

    fn requester() -> Actor {
        Actor::party(REQUESTER, PartyRole::Requester)
    }

    #[tokio::test]
    async fn test_initiate_is_idempotent() {
        let f = fixture().await;
        let first = f.service.initiate(f.booking_id, REQUESTER).await.unwrap();
        let second = f.service.initiate(f.booking_id, REQUESTER).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.status, CallStatus::Pending);
        assert_eq!(f.store.sessions_for(f.booking_id).len(), 1);
    }

    #[tokio::test]
    async fn test_initiate_requires_requester() {
        let f = fixture().await;
        let err = f.service.initiate(f.booking_id, COUNSELLOR).await.unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));

        let err = f.service.initiate(f.booking_id + 100, REQUESTER).await.unwrap_err();
        assert!(matches!(err, AppError::BookingNotFound(_)));
    }

    #[tokio::test]
    async fn test_initiate_requires_paid_booking() {
        let f = fixture().await;
        let unpaid = f
            .store
            .create(&NewBooking {
                requester_id: REQUESTER,
                counsellor_id: COUNSELLOR,
                fee: dec!(100.00),
                duration_minutes: 10,
                scheduled_at: None,
            })
            .await
            .unwrap();

        let err = f.service.initiate(unpaid.id, REQUESTER).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidBookingState { .. }));
        assert!(f.store.sessions_for(unpaid.id).is_empty());
    }

    #[tokio::test]
    async fn test_accept_then_end() {
        let f = fixture().await;
        f.service.initiate(f.booking_id, REQUESTER).await.unwrap();

        let accepted = f.service.accept(f.booking_id, counsellor()).await.unwrap();
        assert_eq!(accepted.status, CallStatus::Accepted);
        assert!(accepted.accepted_at.is_some());

        let ended = f.service.end(f.booking_id, requester()).await.unwrap();
        assert_eq!(ended.status, CallStatus::Ended);
        assert!(ended.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_requester_cannot_accept() {
        let f = fixture().await;
        f.service.initiate(f.booking_id, REQUESTER).await.unwrap();

        let err = f.service.accept(f.booking_id, requester()).await.unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_stranger_is_refused_before_state_check() {
        let f = fixture().await;
        let session = f.service.initiate(f.booking_id, REQUESTER).await.unwrap();
        f.service.end(f.booking_id, requester()).await.unwrap();

        // Session is ENDED, so accept is invalid too; authorization wins
        let stranger = Actor::party(99, PartyRole::Counsellor);
        let err = f
            .service
            .transition(session.id, CallEvent::Accept, stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_settle_event_is_refused() {
        let f = fixture().await;
        let session = f.service.initiate(f.booking_id, REQUESTER).await.unwrap();
        f.service.end(f.booking_id, requester()).await.unwrap();

        let err = f
            .service
            .transition(session.id, CallEvent::Settle, Actor::System)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_invalid_transition_has_no_side_effect() {
        let f = fixture().await;
        f.service.initiate(f.booking_id, REQUESTER).await.unwrap();
        f.service.reject(f.booking_id, counsellor()).await.unwrap();

        let err = f.service.accept(f.booking_id, counsellor()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let sessions = f.store.sessions_for(f.booking_id);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, CallStatus::Rejected);
    }

    #[tokio::test]
    async fn test_new_call_after_rejection() {
        let f = fixture().await;
        let first = f.service.initiate(f.booking_id, REQUESTER).await.unwrap();
        f.service.reject(f.booking_id, counsellor()).await.unwrap();

        let second = f.service.initiate(f.booking_id, REQUESTER).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.status, CallStatus::Pending);
    }

    #[tokio::test]
    async fn test_expire_pending_call() {
        let f = fixture().await;
        let session = f.service.initiate(f.booking_id, REQUESTER).await.unwrap();

        let expired = f.service.expire(session.id).await.unwrap();
        assert_eq!(expired.status, CallStatus::Rejected);
    }

    #[tokio::test]
    async fn test_transitions_are_broadcast() {
        let f = fixture().await;
        let mut rx = f
            .hub
            .join(&Binding::new(f.booking_id, PartyRole::Requester, REQUESTER))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().kind(), "connection_established");

        f.service.initiate(f.booking_id, REQUESTER).await.unwrap();
        f.service.initiate(f.booking_id, REQUESTER).await.unwrap();
        f.service.accept(f.booking_id, counsellor()).await.unwrap();
        f.service.end(f.booking_id, counsellor()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind(), "call_requested");
        assert_eq!(rx.recv().await.unwrap().kind(), "call_accepted");
        assert_eq!(rx.recv().await.unwrap().kind(), "call_ended");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_current_is_for_parties_only() {
        let f = fixture().await;
        assert!(f.service.current(f.booking_id, REQUESTER).await.unwrap().is_none());

        let session = f.service.initiate(f.booking_id, REQUESTER).await.unwrap();
        let current = f.service.current(f.booking_id, COUNSELLOR).await.unwrap();
        assert_eq!(current.map(|s| s.id), Some(session.id));

        let err = f.service.current(f.booking_id, 42).await.unwrap_err();
        assert!(matches!(err, AppError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_pending_for_counsellor() {
        let f = fixture().await;
        assert!(f.service.pending_for_counsellor(COUNSELLOR).await.unwrap().is_none());

        let session = f.service.initiate(f.booking_id, REQUESTER).await.unwrap();
        let pending = f.service.pending_for_counsellor(COUNSELLOR).await.unwrap();
        assert_eq!(pending.map(|s| s.id), Some(session.id));

        f.service.accept(f.booking_id, counsellor()).await.unwrap();
        assert!(f.service.pending_for_counsellor(COUNSELLOR).await.unwrap().is_none());
    }
}
