//! HTTP and WebSocket request handlers

pub mod booking;
pub mod call;
pub mod health;
pub mod settlement;
pub mod wallet;
pub mod ws;

pub use booking::configure as configure_bookings;
pub use call::configure as configure_calls;
pub use health::configure as configure_health;
pub use settlement::configure as configure_settlements;
pub use wallet::configure as configure_wallets;
pub use ws::configure as configure_ws;
