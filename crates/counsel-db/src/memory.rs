//! In-memory store
//!
//! Implements every repository trait over a single mutex-guarded state.
//! Each operation validates first and mutates last under one lock
//! acquisition, so a failed operation leaves no partial writes. Backs the
//! test suites and `memory://` deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use counsel_core::{
    models::{
        Booking, BookingStatus, CallSession, CallStatus, EntryKind, LedgerEntry, LedgerTotals,
        NewBooking, NewLedgerEntry, SettlementPlan, SettlementResult, Wallet,
    },
    traits::{BookingRepository, CallSessionRepository, LedgerRepository},
    AppError, AppResult,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Default)]
struct State {
    next_booking_id: i64,
    next_entry_id: i64,
    bookings: HashMap<i64, Booking>,
    /// Insertion order doubles as request order
    sessions: Vec<CallSession>,
    wallets: HashMap<i64, Wallet>,
    entries: Vec<LedgerEntry>,
    settlements: HashMap<i64, SettlementResult>,
}

impl State {
    fn session_index(&self, id: Uuid) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }

    fn latest_session(&self, booking_id: i64) -> Option<&CallSession> {
        self.sessions.iter().rev().find(|s| s.booking_id == booking_id)
    }

    fn booking(&self, booking_id: i64) -> AppResult<&Booking> {
        self.bookings
            .get(&booking_id)
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))
    }

    fn append(&mut self, entry: NewLedgerEntry, now: DateTime<Utc>) {
        self.next_entry_id += 1;
        self.entries.push(LedgerEntry {
            id: self.next_entry_id,
            account_id: entry.account_id,
            amount: entry.amount,
            kind: entry.kind,
            description: entry.description,
            booking_id: entry.booking_id,
            created_at: now,
        });
    }

    fn wallet_mut(&mut self, account_id: i64) -> &mut Wallet {
        self.wallets
            .entry(account_id)
            .or_insert_with(|| Wallet::empty(account_id))
    }
}

/// Mutex-guarded in-memory implementation of the storage traits
pub struct MemoryStore {
    state: Mutex<State>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails with a pool error while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> AppResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Pool("store unavailable".to_string()))
        }
    }

    /// Credit an account with a DEPOSIT entry outside any booking
    pub fn deposit(&self, account_id: i64, amount: Decimal, description: &str) -> AppResult<Wallet> {
        self.check_available()?;
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "deposit amount must be positive: {}",
                amount
            )));
        }

        let now = Utc::now();
        let mut state = self.state.lock();
        let wallet = state.wallet_mut(account_id);
        wallet.balance += amount;
        wallet.updated_at = now;
        let wallet = wallet.clone();
        state.append(
            NewLedgerEntry::new(account_id, amount, EntryKind::Deposit, description),
            now,
        );
        Ok(wallet)
    }

    /// Number of ledger entries across all wallets
    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Every session recorded for a booking, oldest first
    pub fn sessions_for(&self, booking_id: i64) -> Vec<CallSession> {
        self.state
            .lock()
            .sessions
            .iter()
            .filter(|s| s.booking_id == booking_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Booking>> {
        self.check_available()?;
        Ok(self.state.lock().bookings.get(&id).cloned())
    }

    #[instrument(skip(self, booking))]
    async fn create(&self, booking: &NewBooking) -> AppResult<Booking> {
        self.check_available()?;
        let now = Utc::now();
        let mut state = self.state.lock();
        state.next_booking_id += 1;
        let created = Booking {
            id: state.next_booking_id,
            requester_id: booking.requester_id,
            counsellor_id: booking.counsellor_id,
            fee: booking.fee,
            duration_minutes: booking.duration_minutes,
            status: BookingStatus::Pending,
            scheduled_at: booking.scheduled_at,
            created_at: now,
            updated_at: now,
        };
        state.bookings.insert(created.id, created.clone());
        debug!(booking_id = created.id, "Created booking");
        Ok(created)
    }
}

#[async_trait]
impl CallSessionRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CallSession>> {
        self.check_available()?;
        let state = self.state.lock();
        Ok(state.session_index(id).map(|i| state.sessions[i].clone()))
    }

    async fn find_latest_by_booking(&self, booking_id: i64) -> AppResult<Option<CallSession>> {
        self.check_available()?;
        Ok(self.state.lock().latest_session(booking_id).cloned())
    }

    #[instrument(skip(self, booking), fields(booking_id = booking.id))]
    async fn open_session(&self, booking: &Booking) -> AppResult<(CallSession, bool)> {
        self.check_available()?;
        let mut state = self.state.lock();

        if let Some(open) = state
            .sessions
            .iter()
            .find(|s| s.booking_id == booking.id && s.status.is_open())
        {
            return Ok((open.clone(), false));
        }

        // An ended call must be settled before the booking rings again
        if state
            .sessions
            .iter()
            .any(|s| s.booking_id == booking.id && s.status == CallStatus::Ended)
        {
            return Err(AppError::InvalidTransition {
                from: CallStatus::Ended.to_string(),
                event: "initiate".to_string(),
            });
        }

        let current = state.booking(booking.id)?;
        if !current.status.allows_calls() {
            return Err(AppError::InvalidBookingState {
                booking_id: current.id,
                status: current.status.to_string(),
                expected: BookingStatus::WalletCredited.to_string(),
            });
        }

        let session = CallSession::new(current);
        state.sessions.push(session.clone());
        info!(session_id = %session.id, "Created call session");
        Ok((session, true))
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: CallStatus,
        updated: &CallSession,
    ) -> AppResult<Option<CallSession>> {
        self.check_available()?;
        let mut state = self.state.lock();
        let index = state
            .session_index(id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;

        let stored = &mut state.sessions[index];
        if stored.status != expected {
            return Ok(None);
        }

        stored.status = updated.status;
        stored.accepted_at = updated.accepted_at;
        stored.ended_at = updated.ended_at;
        stored.completed_at = updated.completed_at;
        stored.updated_at = updated.updated_at;
        Ok(Some(stored.clone()))
    }

    async fn find_pending_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<CallSession>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .sessions
            .iter()
            .filter(|s| s.status == CallStatus::Pending && s.requested_at < cutoff)
            .cloned()
            .collect())
    }

    async fn find_pending_for_counsellor(&self, counsellor_id: i64) -> AppResult<Option<CallSession>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .sessions
            .iter()
            .find(|s| s.counsellor_id == counsellor_id && s.status == CallStatus::Pending)
            .cloned())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn find_wallet(&self, account_id: i64) -> AppResult<Option<Wallet>> {
        self.check_available()?;
        Ok(self.state.lock().wallets.get(&account_id).cloned())
    }

    async fn list_entries(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<LedgerEntry>, i64)> {
        self.check_available()?;
        let state = self.state.lock();
        let all: Vec<&LedgerEntry> = state
            .entries
            .iter()
            .rev()
            .filter(|e| e.account_id == account_id)
            .collect();
        let total = all.len() as i64;
        let page = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn ledger_totals(&self, account_id: i64) -> AppResult<LedgerTotals> {
        self.check_available()?;
        let state = self.state.lock();
        let totals = state
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .fold(LedgerTotals::default(), |mut acc, e| {
                if e.kind.is_currency() {
                    acc.currency += e.amount;
                } else {
                    acc.minutes += e.amount;
                }
                acc.entries += 1;
                acc
            });
        Ok(totals)
    }

    #[instrument(skip(self))]
    async fn credit_booking_payment(&self, booking_id: i64) -> AppResult<(Booking, Wallet)> {
        self.check_available()?;
        let now = Utc::now();
        let mut state = self.state.lock();
        let booking = state.booking(booking_id)?.clone();

        match booking.status {
            BookingStatus::WalletCredited => {
                let wallet = state
                    .wallets
                    .get(&booking.requester_id)
                    .cloned()
                    .unwrap_or_else(|| Wallet::empty(booking.requester_id));
                Ok((booking, wallet))
            }
            BookingStatus::Pending => {
                let wallet = state.wallet_mut(booking.requester_id);
                wallet.balance += booking.fee;
                wallet.updated_at = now;
                let wallet = wallet.clone();

                state.append(
                    NewLedgerEntry::new(
                        booking.requester_id,
                        booking.fee,
                        EntryKind::Deposit,
                        format!("Payment for booking {}", booking_id),
                    )
                    .for_booking(booking_id),
                    now,
                );

                let stored = state
                    .bookings
                    .get_mut(&booking_id)
                    .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;
                stored.status = BookingStatus::WalletCredited;
                stored.updated_at = now;
                let booking = stored.clone();

                info!(
                    "Credited {} to wallet {} for booking {}",
                    booking.fee, booking.requester_id, booking_id
                );
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
        self.check_available()?;
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "withdrawal amount must be positive: {}",
                amount
            )));
        }

        let now = Utc::now();
        let mut state = self.state.lock();
        let wallet = state
            .wallets
            .get_mut(&account_id)
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

        wallet.balance -= amount;
        wallet.updated_at = now;
        let wallet = wallet.clone();
        state.append(
            NewLedgerEntry::new(account_id, -amount, EntryKind::Withdrawal, description),
            now,
        );
        Ok(wallet)
    }

    #[instrument(skip(self, plan), fields(booking_id = plan.booking_id))]
    async fn apply_settlement(&self, plan: &SettlementPlan) -> AppResult<(SettlementResult, bool)> {
        self.check_available()?;
        let mut state = self.state.lock();

        if let Some(existing) = state.settlements.get(&plan.booking_id) {
            debug!("Settlement already recorded");
            return Ok((existing.clone(), false));
        }

        let booking = state.booking(plan.booking_id)?;
        if booking.status != BookingStatus::WalletCredited {
            return Err(AppError::InvalidBookingState {
                booking_id: booking.id,
                status: booking.status.to_string(),
                expected: BookingStatus::WalletCredited.to_string(),
            });
        }

        match state.latest_session(plan.booking_id) {
            Some(s) if s.id == plan.session.id && s.status == CallStatus::Ended => {}
            Some(s) => {
                return Err(AppError::InvalidTransition {
                    from: s.status.to_string(),
                    event: "settle".to_string(),
                })
            }
            None => return Err(AppError::SessionNotFound(plan.session.id.to_string())),
        }

        let available = state
            .wallets
            .get(&plan.requester_id)
            .map(|w| w.balance)
            .unwrap_or(Decimal::ZERO);
        if available < plan.fee {
            warn!(
                "Insufficient balance for settlement: required {}, available {}",
                plan.fee, available
            );
            return Err(AppError::InsufficientFunds {
                required: plan.fee.to_string(),
                available: available.to_string(),
            });
        }

        // All checks passed; mutate.
        let now = plan.settled_at;

        let requester = state.wallet_mut(plan.requester_id);
        requester.balance -= plan.fee;
        requester.extra_minutes += plan.extra_minutes;
        requester.updated_at = now;
        let requester_balance = requester.balance;

        let counsellor = state.wallet_mut(plan.counsellor_id);
        counsellor.balance += plan.fee;
        counsellor.updated_at = now;
        let counsellor_balance = counsellor.balance;

        for entry in plan.entries() {
            state.append(entry, now);
        }

        if let Some(b) = state.bookings.get_mut(&plan.booking_id) {
            b.status = BookingStatus::Completed;
            b.updated_at = now;
        }

        if let Some(i) = state.session_index(plan.session.id) {
            state.sessions[i] = plan.completed.clone();
        }

        let result = SettlementResult {
            booking_id: plan.booking_id,
            session_id: plan.session.id,
            fee: plan.fee,
            actual_duration_minutes: plan.actual_duration_minutes,
            extra_minutes_credited: plan.extra_minutes,
            requester_balance,
            counsellor_balance,
            settled_at: now,
        };
        state.settlements.insert(plan.booking_id, result.clone());

        info!(
            "Settled booking {}: {} transferred, {} extra minutes",
            plan.booking_id, plan.fee, plan.extra_minutes
        );
        Ok((result, true))
    }

    async fn find_settlement(&self, booking_id: i64) -> AppResult<Option<SettlementResult>> {
        self.check_available()?;
        Ok(self.state.lock().settlements.get(&booking_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counsel_core::models::{Actor, CallEvent, PartyRole};
    use rust_decimal_macros::dec;

    async fn credited_booking(store: &MemoryStore) -> Booking {
        let booking = store
            .create(&NewBooking {
                requester_id: 1,
                counsellor_id: 2,
                fee: dec!(500.00),
                duration_minutes: 20,
                scheduled_at: None,
            })
            .await
            .unwrap();
        store.credit_booking_payment(booking.id).await.unwrap().0
    }

    #[tokio::test]
    async fn test_payment_credit_is_idempotent() {
        let store = MemoryStore::new();
        let booking = credited_booking(&store).await;
        assert_eq!(booking.status, BookingStatus::WalletCredited);

        let (_, wallet) = store.credit_booking_payment(booking.id).await.unwrap();
        assert_eq!(wallet.balance, dec!(500.00));
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_open_session_returns_existing() {
        let store = MemoryStore::new();
        let booking = credited_booking(&store).await;

        let (first, created) = store.open_session(&booking).await.unwrap();
        let (second, created_again) = store.open_session(&booking).await.unwrap();
        assert!(created);
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert_eq!(store.sessions_for(booking.id).len(), 1);
    }

    #[tokio::test]
    async fn test_open_session_requires_credited_booking() {
        let store = MemoryStore::new();
        let booking = store
            .create(&NewBooking {
                requester_id: 1,
                counsellor_id: 2,
                fee: dec!(10.00),
                duration_minutes: 5,
                scheduled_at: None,
            })
            .await
            .unwrap();

        let err = store.open_session(&booking).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidBookingState { .. }));
    }

    #[tokio::test]
    async fn test_open_session_refused_while_ended_call_unsettled() {
        let store = MemoryStore::new();
        let booking = credited_booking(&store).await;
        let (session, _) = store.open_session(&booking).await.unwrap();

        let ended = session
            .apply(CallEvent::End, &Actor::party(1, PartyRole::Requester), Utc::now())
            .unwrap();
        store
            .compare_and_set_status(session.id, CallStatus::Pending, &ended)
            .await
            .unwrap();

        let err = store.open_session(&booking).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(store.sessions_for(booking.id).len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_set_loses_to_first_writer() {
        let store = MemoryStore::new();
        let booking = credited_booking(&store).await;
        let (session, _) = store.open_session(&booking).await.unwrap();
        let counsellor = Actor::party(2, PartyRole::Counsellor);

        let accepted = session.apply(CallEvent::Accept, &counsellor, Utc::now()).unwrap();
        let rejected = session.apply(CallEvent::Reject, &counsellor, Utc::now()).unwrap();

        let first = store
            .compare_and_set_status(session.id, CallStatus::Pending, &accepted)
            .await
            .unwrap();
        let second = store
            .compare_and_set_status(session.id, CallStatus::Pending, &rejected)
            .await
            .unwrap();
        assert_eq!(first.map(|s| s.status), Some(CallStatus::Accepted));
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_fast() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = BookingRepository::find_by_id(&store, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Pool(_)));
    }

    #[tokio::test]
    async fn test_withdraw_cannot_overdraw() {
        let store = MemoryStore::new();
        store.deposit(9, dec!(50.00), "top-up").unwrap();

        let err = store.withdraw(9, dec!(80.00), "payout").await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));

        let wallet = store.withdraw(9, dec!(20.00), "payout").await.unwrap();
        assert_eq!(wallet.balance, dec!(30.00));
        let totals = store.ledger_totals(9).await.unwrap();
        assert_eq!(totals.currency, dec!(30.00));
        assert_eq!(totals.entries, 2);
    }
}
