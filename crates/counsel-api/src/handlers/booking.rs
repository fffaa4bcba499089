//! Booking handlers
//!
//! Bookings are created and paid by the scheduling and payment services,
//! which call these endpoints with an admin credential.

use crate::dto::{ApiResponse, BookingResponse, CreateBookingRequest, PaymentResponse};
use actix_web::{web, HttpResponse};
use counsel_auth::{AdminUser, AuthenticatedUser};
use counsel_core::AppError;
use counsel_services::Services;
use tracing::{info, instrument, warn};

/// Register a booking
///
/// POST /api/v1/bookings
#[instrument(skip(services, _admin, req))]
pub async fn create_booking(
    services: web::Data<Services>,
    _admin: AdminUser,
    req: web::Json<CreateBookingRequest>,
) -> Result<HttpResponse, AppError> {
    let new_booking = req.to_new_booking().map_err(|e| {
        warn!("Booking validation failed: {}", e);
        e
    })?;

    let booking = services.bookings.create(&new_booking).await?;
    info!(booking_id = booking.id, "Booking registered");

    Ok(HttpResponse::Created().json(ApiResponse::success(BookingResponse::from(booking))))
}

/// GET /api/v1/bookings/{id}
#[instrument(skip(services, user))]
pub async fn get_booking(
    services: web::Data<Services>,
    path: web::Path<i64>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let booking_id = path.into_inner();
    let booking = services
        .bookings
        .find_by_id(booking_id)
        .await?
        .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;

    if !user.is_admin() && !booking.is_party(user.account_id) {
        return Err(AppError::NotAuthorized(format!(
            "account {} is not a party to booking {}",
            user.account_id, booking_id
        )));
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(BookingResponse::from(booking))))
}

/// Confirm payment and credit the requester's wallet
///
/// POST /api/v1/bookings/{id}/payment
#[instrument(skip(services, _admin))]
pub async fn record_payment(
    services: web::Data<Services>,
    path: web::Path<i64>,
    _admin: AdminUser,
) -> Result<HttpResponse, AppError> {
    let (booking, wallet) = services.ledger.record_payment(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        PaymentResponse {
            booking: booking.into(),
            wallet,
        },
        "Payment verified and wallet credited",
    )))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/bookings")
            .route("", web::post().to(create_booking))
            .route("/{id}", web::get().to(get_booking))
            .route("/{id}/payment", web::post().to(record_payment)),
    );
}
