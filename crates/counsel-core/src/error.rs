//! Unified error handling for Counsel Broker
//!
//! This module provides a comprehensive error type that covers all possible
//! failure scenarios in the core, with automatic HTTP response mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Authentication Errors ====================
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: insufficient permissions")]
    Forbidden,

    // ==================== Call Session Errors ====================
    #[error("Invalid transition: cannot apply '{event}' to a call in state {from}")]
    InvalidTransition { from: String, event: String },

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Call session not found: {0}")]
    SessionNotFound(String),

    // ==================== Booking Errors ====================
    #[error("Booking not found: {0}")]
    BookingNotFound(String),

    #[error("Booking {booking_id} is {status}, expected {expected}")]
    InvalidBookingState {
        booking_id: i64,
        status: String,
        expected: String,
    },

    // ==================== Ledger Errors ====================
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::InvalidToken(_) | AppError::TokenExpired | AppError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }

            // 402 Payment Required
            AppError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,

            // 403 Forbidden
            AppError::Forbidden | AppError::NotAuthorized(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::BookingNotFound(_)
            | AppError::SessionNotFound(_)
            | AppError::WalletNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::InvalidTransition { .. } | AppError::InvalidBookingState { .. } => {
                StatusCode::CONFLICT
            }

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::TokenExpired => "token_expired",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::NotAuthorized(_) => "not_authorized",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::BookingNotFound(_) => "booking_not_found",
            AppError::InvalidBookingState { .. } => "invalid_booking_state",
            AppError::InsufficientFunds { .. } => "insufficient_funds",
            AppError::WalletNotFound(_) => "wallet_not_found",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the caller may poll the current state and retry with another event
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::InvalidTransition { .. }
                | AppError::InsufficientFunds { .. }
                | AppError::InvalidBookingState { .. }
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => AppError::Pool(err.to_string()),
            other => AppError::Database(other.to_string()),
        }
    }
}
