//! Counsel Broker Database Layer
//!
//! This crate provides storage for bookings, call sessions and the wallet
//! ledger. It includes:
//!
//! - Connection pool management and embedded migrations with sqlx
//! - PostgreSQL repository implementations of the `counsel-core` traits
//! - Transactional settlement with ordered wallet locks
//! - An in-memory store implementing the same traits

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::MemoryStore;
pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use counsel_core::{AppError, AppResult};
pub use sqlx::{PgPool, Postgres, Transaction};
