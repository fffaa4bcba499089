//! Pending call sweeper
//!
//! Calls ring until answered unless a timeout is configured. When one is,
//! this task periodically expires PENDING sessions older than the timeout.

use crate::call_session::CallSessionService;
use chrono::Utc;
use counsel_core::traits::CallSessionRepository;
use counsel_core::{AppError, AppResult};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct PendingCallSweeper {
    sessions: Arc<dyn CallSessionRepository>,
    calls: Arc<CallSessionService>,
    timeout: Duration,
    period: Duration,
}

impl PendingCallSweeper {
    pub fn new(
        sessions: Arc<dyn CallSessionRepository>,
        calls: Arc<CallSessionService>,
        timeout: Duration,
        period: Duration,
    ) -> Self {
        Self {
            sessions,
            calls,
            timeout,
            period,
        }
    }

    /// Expire every stale PENDING session once; returns how many expired
    pub async fn sweep_once(&self) -> AppResult<usize> {
        let timeout = chrono::Duration::from_std(self.timeout)
            .map_err(|e| AppError::Config(format!("pending timeout out of range: {}", e)))?;
        let cutoff = Utc::now() - timeout;
        let stale = self.sessions.find_pending_older_than(cutoff).await?;

        let mut expired = 0;
        for session in stale {
            match self.calls.expire(session.id).await {
                Ok(_) => {
                    info!(session_id = %session.id, booking_id = session.booking_id, "Expired unanswered call");
                    expired += 1;
                }
                // Answered between the scan and the expire
                Err(AppError::InvalidTransition { from, .. }) => {
                    debug!(session_id = %session.id, status = %from, "Call no longer pending");
                }
                Err(e) => {
                    warn!(session_id = %session.id, "Failed to expire call: {}", e);
                }
            }
        }
        Ok(expired)
    }

    /// Run the sweep on a fixed period until the task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            timeout_secs = self.timeout.as_secs(),
            period_secs = self.period.as_secs(),
            "Starting pending call sweeper"
        );

        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once().await {
                    error!("Pending call sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::NotificationHub;
    use crate::locks::BookingLocks;
    use counsel_core::models::{Actor, CallStatus, NewBooking, PartyRole};
    use counsel_core::traits::{BookingRepository, LedgerRepository};
    use counsel_db::MemoryStore;
    use rust_decimal_macros::dec;

    async fn setup(timeout: Duration) -> (Arc<MemoryStore>, Arc<CallSessionService>, PendingCallSweeper) {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(BookingLocks::new());
        let hub = Arc::new(NotificationHub::new(store.clone(), locks.clone(), 8));
        let calls = Arc::new(CallSessionService::new(
            store.clone(),
            store.clone(),
            hub,
            locks,
        ));
        let sweeper = PendingCallSweeper::new(
            store.clone(),
            calls.clone(),
            timeout,
            Duration::from_secs(1),
        );
        (store, calls, sweeper)
    }

    async fn paid_booking(store: &MemoryStore) -> i64 {
        let booking = store
            .create(&NewBooking {
                requester_id: 1,
                counsellor_id: 2,
                fee: dec!(50),
                duration_minutes: 15,
                scheduled_at: None,
            })
            .await
            .unwrap();
        store.credit_booking_payment(booking.id).await.unwrap();
        booking.id
    }

    #[tokio::test]
    async fn test_sweep_expires_stale_pending_calls() {
        let (store, calls, sweeper) = setup(Duration::ZERO).await;
        let ringing = paid_booking(&store).await;
        let answered = paid_booking(&store).await;

        calls.initiate(ringing, 1).await.unwrap();
        calls.initiate(answered, 1).await.unwrap();
        calls
            .accept(answered, Actor::party(2, PartyRole::Counsellor))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        assert_eq!(store.sessions_for(ringing)[0].status, CallStatus::Rejected);
        assert_eq!(store.sessions_for(answered)[0].status, CallStatus::Accepted);
    }

    #[tokio::test]
    async fn test_sweep_leaves_fresh_calls() {
        let (store, calls, sweeper) = setup(Duration::from_secs(300)).await;
        let booking_id = paid_booking(&store).await;
        calls.initiate(booking_id, 1).await.unwrap();

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert_eq!(store.sessions_for(booking_id)[0].status, CallStatus::Pending);
    }
}
