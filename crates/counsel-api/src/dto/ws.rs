//! WebSocket client messages
//!
//! Server messages are `counsel_services::HubMessage`.

use counsel_services::Scope;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

/// Message sent by a connected party
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Initiate,
    Accept,
    Reject,
    End {
        #[serde(default)]
        actual_duration_minutes: Option<Decimal>,
    },
    Signal {
        #[serde(default)]
        scope: SignalScope,
        payload: serde_json::Value,
    },
}

/// Audience of a relayed signal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalScope {
    /// Every connection on the booking except the sender
    #[default]
    Others,
    All,
    Requester,
    Counsellor,
}

impl SignalScope {
    /// Hub scope for a signal sent from `sender`
    pub fn for_sender(self, sender: Uuid) -> Scope {
        match self {
            SignalScope::Others => Scope::ExcludeConnection(sender),
            SignalScope::All => Scope::All,
            SignalScope::Requester => Scope::RequesterOnly,
            SignalScope::Counsellor => Scope::CounsellorOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_client_messages() {
        let msg: ClientMessage = serde_json::from_value(json!({"type": "ping"})).unwrap();
        assert_eq!(msg, ClientMessage::Ping);

        let msg: ClientMessage = serde_json::from_value(json!({"type": "end"})).unwrap();
        assert_eq!(
            msg,
            ClientMessage::End {
                actual_duration_minutes: None
            }
        );

        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "end", "actual_duration_minutes": "12"}))
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::End {
                actual_duration_minutes: Some(dec!(12))
            }
        );
    }

    #[test]
    fn test_signal_defaults_to_others() {
        let sender = Uuid::new_v4();
        let msg: ClientMessage = serde_json::from_value(
            json!({"type": "signal", "payload": {"sdp": "offer", "n": [1, 2]}}),
        )
        .unwrap();

        match msg {
            ClientMessage::Signal { scope, payload } => {
                assert_eq!(scope.for_sender(sender), Scope::ExcludeConnection(sender));
                assert_eq!(payload["n"][1], 2);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_message_is_rejected() {
        assert!(serde_json::from_value::<ClientMessage>(json!({"type": "settle"})).is_err());
        assert!(serde_json::from_value::<ClientMessage>(json!({"payload": 1})).is_err());
    }
}
