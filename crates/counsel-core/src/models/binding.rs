//! Identity and connection binding models
//!
//! A binding is the authenticated `(booking, role, account)` triple a live
//! connection carries for its whole lifetime.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role of a party within a single booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyRole {
    /// The party that purchased the session and places the call
    Requester,
    /// The party that answers the call
    Counsellor,
}

impl fmt::Display for PartyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartyRole::Requester => write!(f, "requester"),
            PartyRole::Counsellor => write!(f, "counsellor"),
        }
    }
}

impl PartyRole {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "requester" | "user" => Some(PartyRole::Requester),
            "counsellor" | "counselor" => Some(PartyRole::Counsellor),
            _ => None,
        }
    }
}

/// Account-level role carried in the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    #[default]
    User,
    Counsellor,
    Admin,
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRole::User => write!(f, "user"),
            AccountRole::Counsellor => write!(f, "counsellor"),
            AccountRole::Admin => write!(f, "admin"),
        }
    }
}

impl AccountRole {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(AccountRole::User),
            "counsellor" | "counselor" => Some(AccountRole::Counsellor),
            "admin" => Some(AccountRole::Admin),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, AccountRole::Admin)
    }
}

/// Verified identity produced by the credential verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account_id: i64,
    pub role: AccountRole,
}

/// Which connect endpoint a connection arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Either party of the booking may bind
    Booking,
    /// Only the booking's counsellor may bind
    Counsellor,
}

/// Authenticated connection binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub connection_id: Uuid,
    pub booking_id: i64,
    pub role: PartyRole,
    pub account_id: i64,
}

impl Binding {
    pub fn new(booking_id: i64, role: PartyRole, account_id: i64) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            booking_id,
            role,
            account_id,
        }
    }
}

/// Reasons a connection is refused at bind time.
///
/// Each reason maps to a stable WebSocket close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindRejection {
    MissingCredential,
    InvalidCredential,
    NotAParty,
    UnknownBooking,
    RoleMismatch,
    StoreUnavailable,
}

impl BindRejection {
    /// WebSocket close code sent to the peer
    pub fn close_code(&self) -> u16 {
        match self {
            BindRejection::MissingCredential => 4001,
            BindRejection::InvalidCredential => 4002,
            BindRejection::NotAParty => 4003,
            BindRejection::UnknownBooking => 4004,
            BindRejection::RoleMismatch => 4005,
            BindRejection::StoreUnavailable => 4010,
        }
    }

    /// Short reason text sent with the close frame
    pub fn reason(&self) -> &'static str {
        match self {
            BindRejection::MissingCredential => "missing credential",
            BindRejection::InvalidCredential => "invalid or expired credential",
            BindRejection::NotAParty => "not a party to this booking",
            BindRejection::UnknownBooking => "unknown booking",
            BindRejection::RoleMismatch => "counsellor channel requires the booking's counsellor",
            BindRejection::StoreUnavailable => "booking store unavailable",
        }
    }
}

impl fmt::Display for BindRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.close_code())
    }
}

impl std::error::Error for BindRejection {}
