//! API layer for Counsel Broker
//!
//! HTTP handlers for calls, settlements, bookings and wallets, plus the
//! WebSocket endpoints that carry live call signaling.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;

// Re-export DTOs (common types)
pub use dto::{ApiResponse, PaginationParams};

// Re-export handler configuration functions
pub use handlers::{
    configure_bookings, configure_calls, configure_health, configure_settlements,
    configure_wallets, configure_ws,
};

/// Mount every REST route; callers wrap this in the versioned scope
pub fn configure_api(cfg: &mut actix_web::web::ServiceConfig) {
    configure_health(cfg);
    configure_calls(cfg);
    configure_settlements(cfg);
    configure_bookings(cfg);
    configure_wallets(cfg);
}
