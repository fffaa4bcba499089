//! Call handlers
//!
//! HTTP fallbacks for the call signaling operations also available over
//! the WebSocket channel.

use crate::dto::{ApiResponse, CallSessionResponse, EndCallRequest, EndCallResponse};
use actix_web::{web, HttpResponse};
use counsel_auth::AuthenticatedUser;
use counsel_core::models::Actor;
use counsel_core::AppError;
use counsel_services::Services;
use rust_decimal::Decimal;
use tracing::{debug, instrument};

/// End the booking's call and, when a duration is known, settle it.
///
/// A call the other party already ended still settles.
pub(crate) async fn end_call(
    services: &Services,
    booking_id: i64,
    actor: Actor,
    actual_duration_minutes: Option<Decimal>,
) -> Result<EndCallResponse, AppError> {
    let ended = services.calls.end(booking_id, actor).await;

    let Some(actual) = actual_duration_minutes else {
        return Ok(EndCallResponse {
            session: ended?.into(),
            settlement: None,
        });
    };

    match ended {
        Ok(_) | Err(AppError::InvalidTransition { .. }) => {}
        Err(e) => return Err(e),
    }

    let settlement = services.settlement.settle(booking_id, actual).await?;
    let session = services.calls.latest(booking_id).await?;

    Ok(EndCallResponse {
        session: session.into(),
        settlement: Some(settlement),
    })
}

/// Current call for a booking
///
/// GET /api/v1/calls/{booking_id}
#[instrument(skip(services, user))]
pub async fn get_call(
    services: web::Data<Services>,
    path: web::Path<i64>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    let session = services
        .calls
        .current(booking_id, user.account_id)
        .await?
        .ok_or_else(|| AppError::SessionNotFound(format!("no call for booking {}", booking_id)))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(CallSessionResponse::from(session))))
}

/// Oldest call ringing for the caller
///
/// GET /api/v1/calls/pending
#[instrument(skip(services, user))]
pub async fn get_pending_call(
    services: web::Data<Services>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let pending = services
        .calls
        .pending_for_counsellor(user.account_id)
        .await?
        .map(CallSessionResponse::from);

    Ok(HttpResponse::Ok().json(ApiResponse::success(pending)))
}

/// Ring the counsellor
///
/// POST /api/v1/calls/{booking_id}/initiate
#[instrument(skip(services, user))]
pub async fn initiate_call(
    services: web::Data<Services>,
    path: web::Path<i64>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    let session = services.calls.initiate(booking_id, user.account_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(CallSessionResponse::from(session))))
}

/// POST /api/v1/calls/{booking_id}/accept
#[instrument(skip(services, user))]
pub async fn accept_call(
    services: web::Data<Services>,
    path: web::Path<i64>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    let actor = services.calls.actor_for(booking_id, user.account_id).await?;
    let session = services.calls.accept(booking_id, actor).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(CallSessionResponse::from(session))))
}

/// POST /api/v1/calls/{booking_id}/reject
#[instrument(skip(services, user))]
pub async fn reject_call(
    services: web::Data<Services>,
    path: web::Path<i64>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    let actor = services.calls.actor_for(booking_id, user.account_id).await?;
    let session = services.calls.reject(booking_id, actor).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(CallSessionResponse::from(session))))
}

/// POST /api/v1/calls/{booking_id}/end
#[instrument(skip(services, user, body))]
pub async fn end_call_handler(
    services: web::Data<Services>,
    path: web::Path<i64>,
    user: AuthenticatedUser,
    body: Option<web::Json<EndCallRequest>>,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    debug!(
        actual_duration_minutes = ?request.actual_duration_minutes,
        "Ending call"
    );

    let actor = services.calls.actor_for(booking_id, user.account_id).await?;
    let response = end_call(&services, booking_id, actor, request.actual_duration_minutes).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/calls")
            .route("/pending", web::get().to(get_pending_call))
            .route("/{booking_id}", web::get().to(get_call))
            .route("/{booking_id}/initiate", web::post().to(initiate_call))
            .route("/{booking_id}/accept", web::post().to(accept_call))
            .route("/{booking_id}/reject", web::post().to(reject_call))
            .route("/{booking_id}/end", web::post().to(end_call_handler)),
    );
}
