//! Call session model and lifecycle state machine
//!
//! A call session tracks one call attempt against a booking:
//!
//! ```text
//!            accept            end              settle
//! PENDING ──────────▶ ACCEPTED ─────▶ ENDED ──────────▶ COMPLETED
//!    │  │                               ▲
//!    │  └────────────── end ────────────┘
//!    └── reject / expire ──▶ REJECTED
//! ```
//!
//! The transition table is pure; persistence and publishing live in the
//! services crate.

use super::binding::PartyRole;
use super::booking::Booking;
use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Call session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Ended,
    Completed,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Pending => write!(f, "PENDING"),
            CallStatus::Accepted => write!(f, "ACCEPTED"),
            CallStatus::Rejected => write!(f, "REJECTED"),
            CallStatus::Ended => write!(f, "ENDED"),
            CallStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl CallStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(CallStatus::Pending),
            "ACCEPTED" => Some(CallStatus::Accepted),
            "REJECTED" => Some(CallStatus::Rejected),
            "ENDED" => Some(CallStatus::Ended),
            "COMPLETED" => Some(CallStatus::Completed),
            _ => None,
        }
    }

    /// PENDING and ACCEPTED sessions block a new initiate on the booking
    pub fn is_open(&self) -> bool {
        matches!(self, CallStatus::Pending | CallStatus::Accepted)
    }

    /// No further call activity happens from a terminal status.
    /// ENDED still awaits settlement but can never become open again.
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// The transition table
    pub fn next(self, event: CallEvent) -> Option<CallStatus> {
        use CallEvent::*;
        use CallStatus::*;
        match (self, event) {
            (Pending, Accept) => Some(Accepted),
            (Pending, Reject) => Some(Rejected),
            (Pending, Expire) => Some(Rejected),
            (Pending, End) | (Accepted, End) => Some(Ended),
            (Ended, Settle) => Some(Completed),
            _ => None,
        }
    }
}

/// Lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallEvent {
    Accept,
    Reject,
    End,
    /// Driven only by the settlement engine
    Settle,
    /// Driven only by the pending-call sweeper
    Expire,
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallEvent::Accept => write!(f, "accept"),
            CallEvent::Reject => write!(f, "reject"),
            CallEvent::End => write!(f, "end"),
            CallEvent::Settle => write!(f, "settle"),
            CallEvent::Expire => write!(f, "expire"),
        }
    }
}

impl CallEvent {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "accept" => Some(CallEvent::Accept),
            "reject" => Some(CallEvent::Reject),
            "end" => Some(CallEvent::End),
            "settle" => Some(CallEvent::Settle),
            "expire" => Some(CallEvent::Expire),
            _ => None,
        }
    }

    /// Events only the system may drive
    pub fn is_system(&self) -> bool {
        matches!(self, CallEvent::Settle | CallEvent::Expire)
    }
}

/// Who is driving a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// A bound party of the booking
    Party { account_id: i64, role: PartyRole },
    /// Settlement engine or sweeper
    System,
}

impl Actor {
    pub fn party(account_id: i64, role: PartyRole) -> Self {
        Actor::Party { account_id, role }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Party { account_id, role } => write!(f, "{}:{}", role, account_id),
            Actor::System => write!(f, "system"),
        }
    }
}

/// Call session entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub id: Uuid,
    pub booking_id: i64,
    pub requester_id: i64,
    pub counsellor_id: i64,
    pub status: CallStatus,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CallSession {
    /// Create a fresh PENDING session for a booking
    pub fn new(booking: &Booking) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            requester_id: booking.requester_id,
            counsellor_id: booking.counsellor_id,
            status: CallStatus::Pending,
            requested_at: now,
            accepted_at: None,
            ended_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Resolve the role an account plays in this session
    pub fn party_role(&self, account_id: i64) -> Option<PartyRole> {
        if account_id == self.requester_id {
            Some(PartyRole::Requester)
        } else if account_id == self.counsellor_id {
            Some(PartyRole::Counsellor)
        } else {
            None
        }
    }

    /// Check that `actor` may drive `event`, independent of the current status
    pub fn authorize(&self, event: CallEvent, actor: &Actor) -> AppResult<()> {
        let (account_id, role) = match *actor {
            Actor::System if event.is_system() => return Ok(()),
            Actor::System => {
                return Err(AppError::NotAuthorized(format!(
                    "'{}' must be driven by a party",
                    event
                )))
            }
            Actor::Party { account_id, role } => (account_id, role),
        };

        if self.party_role(account_id) != Some(role) {
            return Err(AppError::NotAuthorized(format!(
                "account {} is not the {} of booking {}",
                account_id, role, self.booking_id
            )));
        }

        let allowed = match event {
            CallEvent::Accept | CallEvent::Reject => role == PartyRole::Counsellor,
            CallEvent::End => true,
            CallEvent::Settle | CallEvent::Expire => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(AppError::NotAuthorized(format!(
                "the {} may not {} this call",
                role, event
            )))
        }
    }

    /// Apply an event, returning the updated snapshot.
    ///
    /// Authorization is checked before transition validity.
    pub fn apply(&self, event: CallEvent, actor: &Actor, now: DateTime<Utc>) -> AppResult<CallSession> {
        self.authorize(event, actor)?;

        let next = self
            .status
            .next(event)
            .ok_or_else(|| AppError::InvalidTransition {
                from: self.status.to_string(),
                event: event.to_string(),
            })?;

        let mut updated = self.clone();
        updated.status = next;
        updated.updated_at = now;
        match next {
            CallStatus::Accepted => updated.accepted_at = Some(now),
            CallStatus::Rejected | CallStatus::Ended => updated.ended_at = Some(now),
            CallStatus::Completed => updated.completed_at = Some(now),
            CallStatus::Pending => {}
        }
        Ok(updated)
    }
}
