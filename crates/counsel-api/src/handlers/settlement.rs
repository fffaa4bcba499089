//! Settlement handlers

use crate::dto::{ApiResponse, SettleRequest};
use actix_web::{web, HttpResponse};
use counsel_auth::AuthenticatedUser;
use counsel_core::AppError;
use counsel_services::Services;
use tracing::{info, instrument};

/// Settle a booking whose call has ended
///
/// POST /api/v1/settlements/{booking_id}
#[instrument(skip(services, user, req))]
pub async fn settle_booking(
    services: web::Data<Services>,
    path: web::Path<i64>,
    user: AuthenticatedUser,
    req: web::Json<SettleRequest>,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    let result = services
        .settlement
        .settle_by(user.identity(), booking_id, req.actual_duration_minutes)
        .await?;

    info!(
        booking_id,
        account_id = user.account_id,
        extra_minutes = result.extra_minutes_credited,
        "Settlement requested"
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

/// Recorded settlement for a booking
///
/// GET /api/v1/settlements/{booking_id}
#[instrument(skip(services, user))]
pub async fn get_settlement(
    services: web::Data<Services>,
    path: web::Path<i64>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    if !user.is_admin() {
        services.calls.actor_for(booking_id, user.account_id).await?;
    }

    let result = services
        .settlement
        .find(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {} is not settled", booking_id)))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/settlements")
            .route("/{booking_id}", web::post().to(settle_booking))
            .route("/{booking_id}", web::get().to(get_settlement)),
    );
}
