//! Authentication and authorization for Counsel Broker
//!
//! This crate verifies the bearer credentials issued by the account service
//! and provides Actix-web extractors for role-based access control.
//!
//! # Features
//!
//! - JWT token creation and validation
//! - `CredentialVerifier` implementation used by the session gateway
//! - Request extractors for authenticated accounts and admins
//!
//! # Examples
//!
//! ```no_run
//! use counsel_auth::{Claims, JwtService};
//! use counsel_core::models::AccountRole;
//!
//! let jwt_service = JwtService::new("your-secret-key", 3600);
//! let claims = Claims::new(42, AccountRole::User);
//! let token = jwt_service.create_token(&claims)?;
//! # Ok::<(), counsel_core::error::AppError>(())
//! ```

pub mod claims;
pub mod jwt;
pub mod middleware;

pub use claims::Claims;
pub use jwt::JwtService;
pub use middleware::{extract_token_from_request, AdminUser, AuthenticatedUser};
