//! Booking DTOs

use chrono::{DateTime, Utc};
use counsel_core::models::{Booking, BookingStatus, NewBooking, Wallet};
use counsel_core::AppError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Booking registration request, issued by the scheduling service
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(range(min = 1))]
    pub requester_id: i64,

    #[validate(range(min = 1))]
    pub counsellor_id: i64,

    pub fee: Decimal,

    /// Agreed call length in minutes
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i32,

    pub scheduled_at: Option<DateTime<Utc>>,
}

impl CreateBookingRequest {
    /// Checks the validator derive cannot express
    pub fn to_new_booking(&self) -> Result<NewBooking, AppError> {
        self.validate()?;

        if self.requester_id == self.counsellor_id {
            return Err(AppError::Validation(
                "requester and counsellor must be different accounts".to_string(),
            ));
        }
        if self.fee <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "fee must be positive: {}",
                self.fee
            )));
        }

        Ok(NewBooking {
            requester_id: self.requester_id,
            counsellor_id: self.counsellor_id,
            fee: self.fee,
            duration_minutes: self.duration_minutes,
            scheduled_at: self.scheduled_at,
        })
    }
}

/// Booking response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingResponse {
    pub id: i64,
    pub requester_id: i64,
    pub counsellor_id: i64,
    pub fee: Decimal,
    pub duration_minutes: i32,
    pub status: BookingStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            id: booking.id,
            requester_id: booking.requester_id,
            counsellor_id: booking.counsellor_id,
            fee: booking.fee,
            duration_minutes: booking.duration_minutes,
            status: booking.status,
            scheduled_at: booking.scheduled_at,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

/// Payment confirmation response
#[derive(Debug, Clone, Serialize)]
pub struct PaymentResponse {
    pub booking: BookingResponse,
    pub wallet: Wallet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CreateBookingRequest {
        CreateBookingRequest {
            requester_id: 1,
            counsellor_id: 2,
            fee: dec!(500.00),
            duration_minutes: 20,
            scheduled_at: None,
        }
    }

    #[test]
    fn test_valid_booking_request() {
        let booking = request().to_new_booking().unwrap();
        assert_eq!(booking.fee, dec!(500.00));
        assert_eq!(booking.duration_minutes, 20);
    }

    #[test]
    fn test_invalid_booking_requests() {
        let mut same_party = request();
        same_party.counsellor_id = 1;
        assert!(same_party.to_new_booking().is_err());

        let mut free = request();
        free.fee = Decimal::ZERO;
        assert!(free.to_new_booking().is_err());

        let mut zero_minutes = request();
        zero_minutes.duration_minutes = 0;
        assert!(matches!(
            zero_minutes.to_new_booking(),
            Err(AppError::Validation(_))
        ));
    }
}
