//! Counsel Broker Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the call-session coordination and settlement core. It includes:
//!
//! - Domain models (Booking, CallSession, Wallet, LedgerEntry, Binding)
//! - The call-session state machine (pure transition table)
//! - Settlement arithmetic (fee transfer and unused-minute credit)
//! - Repository traits implemented by `counsel-db`
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
