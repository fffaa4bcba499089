//! Call DTOs
//!
//! Request and response types for call signaling and settlement endpoints.

use chrono::{DateTime, Utc};
use counsel_core::models::{CallSession, CallStatus, SettlementResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Call session response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSessionResponse {
    pub id: Uuid,
    pub booking_id: i64,
    pub requester_id: i64,
    pub counsellor_id: i64,
    pub status: CallStatus,
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<CallSession> for CallSessionResponse {
    fn from(session: CallSession) -> Self {
        Self {
            id: session.id,
            booking_id: session.booking_id,
            requester_id: session.requester_id,
            counsellor_id: session.counsellor_id,
            status: session.status,
            requested_at: session.requested_at,
            accepted_at: session.accepted_at,
            ended_at: session.ended_at,
            completed_at: session.completed_at,
        }
    }
}

/// End call request
///
/// When the elapsed duration is supplied the booking is settled as well.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndCallRequest {
    pub actual_duration_minutes: Option<Decimal>,
}

/// End call response
#[derive(Debug, Clone, Serialize)]
pub struct EndCallResponse {
    pub session: CallSessionResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementResult>,
}

/// Settlement request
#[derive(Debug, Clone, Deserialize)]
pub struct SettleRequest {
    /// Minutes actually spent on the call; fractions allowed
    pub actual_duration_minutes: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_end_call_request_duration_is_optional() {
        let req: EndCallRequest = serde_json::from_str("{}").unwrap();
        assert!(req.actual_duration_minutes.is_none());

        let req: EndCallRequest =
            serde_json::from_str(r#"{"actual_duration_minutes": 12.5}"#).unwrap();
        assert_eq!(req.actual_duration_minutes, Some(dec!(12.5)));
    }

    #[test]
    fn test_settle_request_accepts_string_decimal() {
        let req: SettleRequest =
            serde_json::from_str(r#"{"actual_duration_minutes": "12"}"#).unwrap();
        assert_eq!(req.actual_duration_minutes, dec!(12));
    }
}
