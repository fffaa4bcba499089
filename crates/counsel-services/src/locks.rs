//! Keyed per-booking locks
//!
//! Every writer of a booking (initiate, transitions, settlement, hub joins)
//! holds that booking's lock across persist and publish, so broadcast order
//! matches commit order.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// In-process single-writer lock per booking
#[derive(Default)]
pub struct BookingLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl BookingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a booking
    pub async fn lock(&self, booking_id: i64) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(booking_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop locks nobody holds or waits on
    pub fn prune(&self) {
        let before = self.locks.len();
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
        let pruned = before.saturating_sub(self.locks.len());
        if pruned > 0 {
            debug!(pruned, "Pruned idle booking locks");
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_booking_is_exclusive() {
        let locks = Arc::new(BookingLocks::new());
        let guard = locks.lock(1).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(1).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_bookings_do_not_block() {
        let locks = BookingLocks::new();
        let _a = locks.lock(1).await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock(2))
            .await
            .expect("independent booking lock");
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = BookingLocks::new();
        let held = locks.lock(1).await;
        drop(locks.lock(2).await);

        locks.prune();
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
