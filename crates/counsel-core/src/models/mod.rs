//! Domain models for Counsel Broker
//!
//! This module contains the core domain models used throughout the application.

pub mod binding;
pub mod booking;
pub mod call_session;
pub mod settlement;
pub mod wallet;

pub use binding::{AccountRole, BindRejection, Binding, Channel, Identity, PartyRole};
pub use booking::{Booking, BookingStatus, NewBooking};
pub use call_session::{Actor, CallEvent, CallSession, CallStatus};
pub use settlement::{unused_minutes, SettlementPlan, SettlementResult};
pub use wallet::{AuditReport, EntryKind, LedgerEntry, LedgerTotals, NewLedgerEntry, Wallet};
