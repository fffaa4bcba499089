//! Notification fan-out hub
//!
//! Live connections are grouped by booking. Each group has its own lock;
//! publishing to a booking holds that group's lock, so every connection sees
//! that booking's messages in publish order. Each connection owns a bounded
//! outbound queue. A full or closed queue drops the message for that
//! connection only and never blocks the publisher. Nothing is persisted.

use crate::locks::BookingLocks;
use counsel_core::models::{Binding, CallSession, CallStatus, PartyRole, SettlementResult};
use counsel_core::traits::CallSessionRepository;
use counsel_core::AppResult;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Messages delivered to live connections
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubMessage {
    /// First message on every new connection
    ConnectionEstablished {
        connection_id: Uuid,
        booking_id: i64,
        role: PartyRole,
    },
    /// Catch-up for a counsellor joining while a call is ringing
    PendingCall(CallSession),
    CallRequested(CallSession),
    CallAccepted(CallSession),
    CallRejected(CallSession),
    CallEnded(CallSession),
    CallCompleted {
        session: CallSession,
        settlement: SettlementResult,
    },
    /// Opaque peer-to-peer payload relayed verbatim
    Signal {
        from: PartyRole,
        payload: serde_json::Value,
    },
    /// Failure of the receiving connection's own request
    Error { code: String, message: String },
    Pong,
}

impl HubMessage {
    /// Message announcing a session's new status.
    ///
    /// COMPLETED carries the settlement and is built by the settlement engine.
    pub fn for_transition(session: &CallSession) -> Option<Self> {
        let session = session.clone();
        match session.status {
            CallStatus::Pending => Some(HubMessage::CallRequested(session)),
            CallStatus::Accepted => Some(HubMessage::CallAccepted(session)),
            CallStatus::Rejected => Some(HubMessage::CallRejected(session)),
            CallStatus::Ended => Some(HubMessage::CallEnded(session)),
            CallStatus::Completed => None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        HubMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wire name of the message, as found in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            HubMessage::ConnectionEstablished { .. } => "connection_established",
            HubMessage::PendingCall(_) => "pending_call",
            HubMessage::CallRequested(_) => "call_requested",
            HubMessage::CallAccepted(_) => "call_accepted",
            HubMessage::CallRejected(_) => "call_rejected",
            HubMessage::CallEnded(_) => "call_ended",
            HubMessage::CallCompleted { .. } => "call_completed",
            HubMessage::Signal { .. } => "signal",
            HubMessage::Error { .. } => "error",
            HubMessage::Pong => "pong",
        }
    }
}

/// Which members of a booking's group receive a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    RequesterOnly,
    CounsellorOnly,
    ExcludeConnection(Uuid),
}

impl Scope {
    fn includes(&self, member: &Member) -> bool {
        match *self {
            Scope::All => true,
            Scope::RequesterOnly => member.role == PartyRole::Requester,
            Scope::CounsellorOnly => member.role == PartyRole::Counsellor,
            Scope::ExcludeConnection(id) => member.connection_id != id,
        }
    }
}

/// Receiving end of a connection's outbound queue
pub type Outbound = mpsc::Receiver<HubMessage>;

struct Member {
    connection_id: Uuid,
    role: PartyRole,
    tx: mpsc::Sender<HubMessage>,
}

#[derive(Default)]
struct GroupState {
    members: Vec<Member>,
    /// Set when the last member leaves; a closed group is never reused
    closed: bool,
}

#[derive(Default)]
struct Group {
    state: Mutex<GroupState>,
}

/// In-process registry of live connections keyed by booking
pub struct NotificationHub {
    groups: DashMap<i64, Arc<Group>>,
    sessions: Arc<dyn CallSessionRepository>,
    locks: Arc<BookingLocks>,
    queue_capacity: usize,
}

/// Room for `connection_established` plus the pending-call catch-up
const MIN_QUEUE_CAPACITY: usize = 2;

impl NotificationHub {
    pub fn new(
        sessions: Arc<dyn CallSessionRepository>,
        locks: Arc<BookingLocks>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            groups: DashMap::new(),
            sessions,
            locks,
            queue_capacity: queue_capacity.max(MIN_QUEUE_CAPACITY),
        }
    }

    /// Register a bound connection and return its outbound queue.
    ///
    /// The queue starts with `connection_established`, followed by one
    /// `pending_call` when a counsellor joins while a call is ringing.
    /// Joining holds the booking lock, so the catch-up and any concurrent
    /// `call_requested` are never both delivered.
    #[instrument(skip(self, binding), fields(booking_id = binding.booking_id, connection_id = %binding.connection_id))]
    pub async fn join(&self, binding: &Binding) -> AppResult<Outbound> {
        let _booking = self.locks.lock(binding.booking_id).await;

        let catch_up = if binding.role == PartyRole::Counsellor {
            self.sessions
                .find_latest_by_booking(binding.booking_id)
                .await?
                .filter(|s| s.status == CallStatus::Pending)
        } else {
            None
        };

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let _ = tx.try_send(HubMessage::ConnectionEstablished {
            connection_id: binding.connection_id,
            booking_id: binding.booking_id,
            role: binding.role,
        });
        if let Some(session) = catch_up {
            debug!(session_id = %session.id, "Replaying pending call");
            let _ = tx.try_send(HubMessage::PendingCall(session));
        }

        let member = Member {
            connection_id: binding.connection_id,
            role: binding.role,
            tx,
        };

        loop {
            let group = self
                .groups
                .entry(binding.booking_id)
                .or_insert_with(|| Arc::new(Group::default()))
                .clone();

            let mut state = group.state.lock().await;
            if state.closed {
                // Lost a race with the last leaver; it already unmapped this group
                continue;
            }
            state.members.push(member);
            debug!(members = state.members.len(), "Connection joined");
            return Ok(rx);
        }
    }

    /// Deregister a connection; an emptied group is removed
    #[instrument(skip(self))]
    pub async fn leave(&self, booking_id: i64, connection_id: Uuid) {
        let group = match self.groups.get(&booking_id) {
            Some(g) => g.clone(),
            None => return,
        };

        let mut state = group.state.lock().await;
        state.members.retain(|m| m.connection_id != connection_id);

        if state.members.is_empty() && !state.closed {
            state.closed = true;
            self.groups
                .remove_if(&booking_id, |_, g| Arc::ptr_eq(g, &group));
            debug!("Removed empty group");
        }
    }

    /// Deliver a message to the booking's connections in scope.
    ///
    /// Returns how many queues accepted it.
    pub async fn publish(&self, booking_id: i64, message: HubMessage, scope: Scope) -> usize {
        let group = match self.groups.get(&booking_id) {
            Some(g) => g.clone(),
            None => {
                debug!(booking_id, kind = message.kind(), "No live connections");
                return 0;
            }
        };

        let state = group.state.lock().await;
        let mut delivered = 0;
        for member in state.members.iter().filter(|m| scope.includes(m)) {
            match member.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        booking_id,
                        connection_id = %member.connection_id,
                        kind = message.kind(),
                        "Outbound queue full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        booking_id,
                        connection_id = %member.connection_id,
                        "Outbound queue closed"
                    );
                }
            }
        }

        debug!(booking_id, kind = message.kind(), delivered, "Published");
        delivered
    }

    /// Live connections for a booking
    pub async fn connection_count(&self, booking_id: i64) -> usize {
        let group = match self.groups.get(&booking_id) {
            Some(g) => g.clone(),
            None => return 0,
        };
        let state = group.state.lock().await;
        state.members.len()
    }

    /// Bookings with at least one live connection
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
