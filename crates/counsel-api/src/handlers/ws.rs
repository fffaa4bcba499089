//! WebSocket handlers for live call signaling
//!
//! Each connection is bound to one booking and one party role before any
//! message flows. A rejected bind completes the upgrade and then closes
//! with the rejection's close code. Bound connections drain their hub queue
//! and their inbound stream in one task, with keepalive pings.

use crate::dto::ClientMessage;
use crate::handlers::call::end_call;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Message, Session};
use counsel_auth::extract_token_from_request;
use counsel_core::models::{Actor, BindRejection, Binding, Channel, PartyRole};
use counsel_core::AppError;
use counsel_services::{HubMessage, Outbound, Services};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// GET /ws/bookings/{booking_id}
pub async fn booking_channel(
    req: HttpRequest,
    body: web::Payload,
    path: web::Path<i64>,
    services: web::Data<Services>,
) -> Result<HttpResponse, actix_web::Error> {
    connect(req, body, path.into_inner(), Channel::Booking, services).await
}

/// GET /ws/counsellor/{booking_id}
pub async fn counsellor_channel(
    req: HttpRequest,
    body: web::Payload,
    path: web::Path<i64>,
    services: web::Data<Services>,
) -> Result<HttpResponse, actix_web::Error> {
    connect(req, body, path.into_inner(), Channel::Counsellor, services).await
}

async fn connect(
    req: HttpRequest,
    body: web::Payload,
    booking_id: i64,
    channel: Channel,
    services: web::Data<Services>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, msg_stream) = actix_ws::handle(&req, body)?;

    let client_ip = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();

    let token = extract_token_from_request(&req);
    let services = services.get_ref().clone();

    actix_web::rt::spawn(async move {
        match bind_connection(&services, token.as_deref(), booking_id, channel).await {
            Ok((binding, outbound)) => {
                info!(
                    client = %client_ip,
                    booking_id,
                    connection_id = %binding.connection_id,
                    role = %binding.role,
                    "WebSocket connection bound"
                );
                ws_session(session, msg_stream, outbound, binding, services).await;
            }
            Err(rejection) => {
                warn!(
                    client = %client_ip,
                    booking_id,
                    code = rejection.close_code(),
                    "WebSocket bind rejected: {}",
                    rejection.reason()
                );
                let _ = session.close(Some(close_reason(rejection))).await;
            }
        }
    });

    Ok(response)
}

/// Bind a connection to its booking and register it with the hub
async fn bind_connection(
    services: &Services,
    token: Option<&str>,
    booking_id: i64,
    channel: Channel,
) -> Result<(Binding, Outbound), BindRejection> {
    let binding = services.gateway.bind(token, booking_id, channel).await?;
    let outbound = services.gateway.connect(&binding).await?;
    Ok((binding, outbound))
}

fn close_reason(rejection: BindRejection) -> CloseReason {
    CloseReason {
        code: CloseCode::Other(rejection.close_code()),
        description: Some(rejection.reason().to_string()),
    }
}

async fn send(session: &mut Session, message: &HubMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => session.text(json).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize {}: {}", message.kind(), e);
            true
        }
    }
}

/// Apply one inbound client message.
///
/// Successful operations reach clients through the hub broadcast, so the
/// result is only the direct reply owed to the sender: a pong or an error.
async fn dispatch(
    services: &Services,
    binding: &Binding,
    message: ClientMessage,
) -> Option<HubMessage> {
    let actor = Actor::party(binding.account_id, binding.role);
    let booking_id = binding.booking_id;

    let result: Result<(), AppError> = match message {
        ClientMessage::Ping => return Some(HubMessage::Pong),
        ClientMessage::Initiate => {
            if binding.role == PartyRole::Requester {
                services
                    .calls
                    .initiate(booking_id, binding.account_id)
                    .await
                    .map(|_| ())
            } else {
                Err(AppError::NotAuthorized(
                    "only the requester can start a call".to_string(),
                ))
            }
        }
        ClientMessage::Accept => services.calls.accept(booking_id, actor).await.map(|_| ()),
        ClientMessage::Reject => services.calls.reject(booking_id, actor).await.map(|_| ()),
        ClientMessage::End {
            actual_duration_minutes,
        } => end_call(services, booking_id, actor, actual_duration_minutes)
            .await
            .map(|_| ()),
        ClientMessage::Signal { scope, payload } => {
            let delivered = services
                .hub
                .publish(
                    booking_id,
                    HubMessage::Signal {
                        from: binding.role,
                        payload,
                    },
                    scope.for_sender(binding.connection_id),
                )
                .await;
            debug!(booking_id, delivered, "Signal relayed");
            Ok(())
        }
    };

    match result {
        Ok(()) => None,
        Err(e) => {
            debug!(booking_id, "Client request failed: {}", e);
            Some(HubMessage::error(e.error_code(), e.to_string()))
        }
    }
}

/// Drive a bound connection until either side closes
async fn ws_session(
    mut session: Session,
    mut msg_stream: actix_ws::MessageStream,
    mut outbound: Outbound,
    binding: Binding,
    services: Services,
) {
    let ping_secs = services.calls_config().ping_interval_secs.max(1);
    let mut ping_interval = interval(Duration::from_secs(ping_secs));
    // The first tick completes immediately
    ping_interval.tick().await;

    loop {
        tokio::select! {
            inbound = msg_stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let alive = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => match dispatch(&services, &binding, message).await {
                                Some(reply) => send(&mut session, &reply).await,
                                None => true,
                            },
                            Err(e) => {
                                debug!(connection_id = %binding.connection_id, "Unparseable message: {}", e);
                                send(&mut session, &HubMessage::error("invalid_message", e.to_string())).await
                            }
                        };
                        if !alive {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(connection_id = %binding.connection_id, "Ignoring binary message");
                    }
                    Some(Ok(Message::Ping(msg))) => {
                        if session.pong(&msg).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(reason))) => {
                        info!(connection_id = %binding.connection_id, "Client closed connection: {:?}", reason);
                        break;
                    }
                    Some(Ok(Message::Pong(_) | Message::Continuation(_) | Message::Nop)) => {}
                    Some(Err(e)) => {
                        error!(connection_id = %binding.connection_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            queued = outbound.recv() => {
                match queued {
                    Some(message) => {
                        if !send(&mut session, &message).await {
                            warn!(connection_id = %binding.connection_id, "Failed to send, closing connection");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if session.ping(b"").await.is_err() {
                    warn!(connection_id = %binding.connection_id, "Failed to send ping, closing connection");
                    break;
                }
            }
        }
    }

    services.gateway.disconnect(&binding).await;
    info!(
        booking_id = binding.booking_id,
        connection_id = %binding.connection_id,
        "WebSocket connection closed"
    );
    let _ = session.close(None).await;
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/ws")
            .route("/bookings/{booking_id}", web::get().to(booking_channel))
            .route("/counsellor/{booking_id}", web::get().to(counsellor_channel)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::SignalScope;
    use counsel_auth::JwtService;
    use counsel_core::config::CallsConfig;
    use counsel_core::models::{AccountRole, NewBooking};
    use counsel_db::MemoryStore;
    use counsel_services::Stores;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    const REQUESTER: i64 = 1;
    const COUNSELLOR: i64 = 2;

    struct Fixture {
        jwt: Arc<JwtService>,
        services: Services,
        booking_id: i64,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let jwt = Arc::new(JwtService::new("ws-test-secret-key-long-enough!!", 3600));
            let services = Services::new(
                Stores {
                    bookings: store.clone(),
                    sessions: store.clone(),
                    ledger: store,
                },
                jwt.clone(),
                CallsConfig::default(),
            );
            let booking = services
                .bookings
                .create(&NewBooking {
                    requester_id: REQUESTER,
                    counsellor_id: COUNSELLOR,
                    fee: dec!(100.00),
                    duration_minutes: 30,
                    scheduled_at: None,
                })
                .await
                .unwrap();
            services.ledger.record_payment(booking.id).await.unwrap();

            Self {
                jwt,
                services,
                booking_id: booking.id,
            }
        }

        fn token(&self, account_id: i64, role: AccountRole) -> String {
            self.jwt.create_token_for_account(account_id, role).unwrap()
        }

        async fn bind(&self, account_id: i64, role: AccountRole, channel: Channel) -> (Binding, Outbound) {
            let token = self.token(account_id, role);
            let (binding, mut outbound) =
                bind_connection(&self.services, Some(&token), self.booking_id, channel)
                    .await
                    .unwrap();
            assert_eq!(
                outbound.recv().await.unwrap().kind(),
                "connection_established"
            );
            (binding, outbound)
        }

        async fn close_code(&self, token: Option<&str>, booking_id: i64, channel: Channel) -> CloseCode {
            match bind_connection(&self.services, token, booking_id, channel).await {
                Ok(_) => panic!("bind unexpectedly accepted"),
                Err(rejection) => close_reason(rejection).code,
            }
        }
    }

    #[test]
    fn test_close_reason_carries_code() {
        let reason = close_reason(BindRejection::RoleMismatch);
        assert_eq!(reason.code, CloseCode::Other(4005));
        assert_eq!(
            reason.description.as_deref(),
            Some(BindRejection::RoleMismatch.reason())
        );
    }

    #[actix_web::test]
    async fn test_rejected_binds_close_with_their_code() {
        let f = Fixture::new().await;
        let id = f.booking_id;
        let requester = f.token(REQUESTER, AccountRole::User);
        let stranger = f.token(99, AccountRole::User);

        assert_eq!(f.close_code(None, id, Channel::Booking).await, CloseCode::Other(4001));
        assert_eq!(
            f.close_code(Some("not-a-jwt"), id, Channel::Booking).await,
            CloseCode::Other(4002)
        );
        assert_eq!(
            f.close_code(Some(&stranger), id, Channel::Booking).await,
            CloseCode::Other(4003)
        );
        assert_eq!(
            f.close_code(Some(&requester), id + 100, Channel::Booking).await,
            CloseCode::Other(4004)
        );
        assert_eq!(
            f.close_code(Some(&requester), id, Channel::Counsellor).await,
            CloseCode::Other(4005)
        );
        assert_eq!(f.services.hub.connection_count(id).await, 0);
    }

    #[actix_web::test]
    async fn test_signal_reaches_peers_but_not_sender() {
        let f = Fixture::new().await;
        let (sender, mut sender_rx) = f.bind(REQUESTER, AccountRole::User, Channel::Booking).await;
        let (_, mut second_tab) = f.bind(REQUESTER, AccountRole::User, Channel::Booking).await;
        let (_, mut counsellor_rx) = f
            .bind(COUNSELLOR, AccountRole::Counsellor, Channel::Counsellor)
            .await;

        let payload = json!({"sdp": "offer"});
        let reply = dispatch(
            &f.services,
            &sender,
            ClientMessage::Signal {
                scope: SignalScope::default(),
                payload: payload.clone(),
            },
        )
        .await;
        assert!(reply.is_none());

        let expected = HubMessage::Signal {
            from: PartyRole::Requester,
            payload,
        };
        assert_eq!(counsellor_rx.recv().await.unwrap(), expected);
        assert_eq!(second_tab.recv().await.unwrap(), expected);
        assert!(sender_rx.try_recv().is_err());
    }

    #[actix_web::test]
    async fn test_failed_request_answers_sender_only() {
        let f = Fixture::new().await;
        let (_, mut requester_rx) = f.bind(REQUESTER, AccountRole::User, Channel::Booking).await;
        let (counsellor, mut counsellor_rx) = f
            .bind(COUNSELLOR, AccountRole::Counsellor, Channel::Counsellor)
            .await;

        let reply = dispatch(&f.services, &counsellor, ClientMessage::Initiate).await;
        match reply {
            Some(HubMessage::Error { code, .. }) => assert_eq!(code, "not_authorized"),
            other => panic!("unexpected reply: {other:?}"),
        }

        let reply = dispatch(&f.services, &counsellor, ClientMessage::Accept).await;
        match reply {
            Some(HubMessage::Error { code, .. }) => assert_eq!(code, "session_not_found"),
            other => panic!("unexpected reply: {other:?}"),
        }

        assert!(requester_rx.try_recv().is_err());
        assert!(counsellor_rx.try_recv().is_err());
    }

    #[actix_web::test]
    async fn test_successful_request_is_broadcast_not_answered() {
        let f = Fixture::new().await;
        let (requester, mut requester_rx) =
            f.bind(REQUESTER, AccountRole::User, Channel::Booking).await;
        let (_, mut counsellor_rx) = f
            .bind(COUNSELLOR, AccountRole::Counsellor, Channel::Counsellor)
            .await;

        assert_eq!(
            dispatch(&f.services, &requester, ClientMessage::Ping).await,
            Some(HubMessage::Pong)
        );
        assert!(dispatch(&f.services, &requester, ClientMessage::Initiate)
            .await
            .is_none());

        assert_eq!(requester_rx.recv().await.unwrap().kind(), "call_requested");
        assert_eq!(counsellor_rx.recv().await.unwrap().kind(), "call_requested");
    }

    #[test]
    fn test_signal_scope_mapping() {
        let sender = uuid::Uuid::new_v4();
        assert_eq!(
            SignalScope::Counsellor.for_sender(sender),
            counsel_services::Scope::CounsellorOnly
        );
    }
}
