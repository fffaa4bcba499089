//! Business logic services for Counsel Broker
//!
//! This crate coordinates live counselling calls for paid bookings and
//! settles them against the wallet ledger.
//!
//! # Services
//!
//! - `CallSessionService` - Call lifecycle state machine with authorization
//! - `NotificationHub` - Per-booking fan-out to live connections
//! - `SettlementEngine` - Idempotent fee transfer and unused-minute credit
//! - `LedgerService` - Payments, withdrawals and wallet views
//! - `SessionGateway` - Connection authentication and role binding
//! - `PendingCallSweeper` - Optional expiry of unanswered calls
//!
//! All writers of a booking serialize on `BookingLocks`, held across persist
//! and publish.

pub mod call_session;
pub mod gateway;
pub mod hub;
pub mod ledger;
pub mod locks;
pub mod settlement;
pub mod sweeper;

pub use call_session::CallSessionService;
pub use gateway::SessionGateway;
pub use hub::{HubMessage, NotificationHub, Outbound, Scope};
pub use ledger::{LedgerPage, LedgerService};
pub use locks::BookingLocks;
pub use settlement::SettlementEngine;
pub use sweeper::PendingCallSweeper;

use counsel_core::config::CallsConfig;
use counsel_core::traits::{
    BookingRepository, CallSessionRepository, CredentialVerifier, LedgerRepository,
};
use std::sync::Arc;
use std::time::Duration;

/// Storage handles the services are built from
#[derive(Clone)]
pub struct Stores {
    pub bookings: Arc<dyn BookingRepository>,
    pub sessions: Arc<dyn CallSessionRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
}

/// Every service, wired to shared locks and one hub
#[derive(Clone)]
pub struct Services {
    pub bookings: Arc<dyn BookingRepository>,
    pub hub: Arc<NotificationHub>,
    pub calls: Arc<CallSessionService>,
    pub settlement: Arc<SettlementEngine>,
    pub ledger: Arc<LedgerService>,
    pub gateway: Arc<SessionGateway>,
    sessions: Arc<dyn CallSessionRepository>,
    config: CallsConfig,
}

impl Services {
    pub fn new(stores: Stores, verifier: Arc<dyn CredentialVerifier>, config: CallsConfig) -> Self {
        let locks = Arc::new(BookingLocks::new());
        let hub = Arc::new(NotificationHub::new(
            stores.sessions.clone(),
            locks.clone(),
            config.outbound_queue_capacity,
        ));
        let calls = Arc::new(CallSessionService::new(
            stores.bookings.clone(),
            stores.sessions.clone(),
            hub.clone(),
            locks.clone(),
        ));
        let settlement = Arc::new(SettlementEngine::new(
            stores.bookings.clone(),
            stores.sessions.clone(),
            stores.ledger.clone(),
            hub.clone(),
            locks.clone(),
        ));
        let ledger = Arc::new(LedgerService::new(stores.ledger.clone(), locks));
        let gateway = Arc::new(SessionGateway::new(
            verifier,
            stores.bookings.clone(),
            hub.clone(),
        ));

        Self {
            bookings: stores.bookings,
            hub,
            calls,
            settlement,
            ledger,
            gateway,
            sessions: stores.sessions,
            config,
        }
    }

    pub fn calls_config(&self) -> &CallsConfig {
        &self.config
    }

    /// Sweeper for unanswered calls, when a pending timeout is configured
    pub fn pending_sweeper(&self) -> Option<PendingCallSweeper> {
        let timeout = self.config.pending_timeout_secs?;
        Some(PendingCallSweeper::new(
            self.sessions.clone(),
            self.calls.clone(),
            Duration::from_secs(timeout),
            Duration::from_secs(self.config.sweep_interval_secs.max(1)),
        ))
    }
}
