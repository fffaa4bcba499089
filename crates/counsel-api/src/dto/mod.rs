//! Data Transfer Objects (DTOs) for API requests and responses

pub mod booking;
pub mod call;
pub mod common;
pub mod wallet;
pub mod ws;

pub use booking::*;
pub use call::*;
pub use common::*;
pub use wallet::*;
pub use ws::*;
