//! JWT Claims structure
//!
//! Defines the claims carried by the bearer credentials this service accepts.

use chrono::{Duration, Utc};
use counsel_core::error::AppError;
use counsel_core::models::{AccountRole, Identity};
use serde::{Deserialize, Serialize};

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject (account id, decimal string)
    pub sub: String,

    /// Account role
    pub role: AccountRole,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Create new claims for an account
    ///
    /// # Examples
    ///
    /// ```
    /// use counsel_auth::Claims;
    /// use counsel_core::models::AccountRole;
    ///
    /// let claims = Claims::new(42, AccountRole::Counsellor);
    /// assert_eq!(claims.sub, "42");
    /// ```
    pub fn new(account_id: i64, role: AccountRole) -> Self {
        let now = Utc::now();

        Self {
            sub: account_id.to_string(),
            role,
            iat: now.timestamp(),
            exp: 0, // Will be set by JwtService
        }
    }

    /// Create new claims with custom expiration duration
    pub fn with_expiration(account_id: i64, role: AccountRole, expires_in_secs: i64) -> Self {
        let now = Utc::now();
        let exp = now + Duration::seconds(expires_in_secs);

        Self {
            sub: account_id.to_string(),
            role,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        }
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        let now = Utc::now().timestamp();
        self.exp <= now
    }

    /// Account id carried in the subject
    pub fn account_id(&self) -> Result<i64, AppError> {
        self.sub
            .parse::<i64>()
            .map_err(|_| AppError::InvalidToken(format!("subject is not an account id: {}", self.sub)))
    }

    /// Check if the account has admin privileges
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Convert to the identity handed to downstream components
    pub fn identity(&self) -> Result<Identity, AppError> {
        Ok(Identity {
            account_id: self.account_id()?,
            role: self.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_creation() {
        let claims = Claims::new(7, AccountRole::User);
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.role, AccountRole::User);
        assert!(claims.iat > 0);
    }

    #[test]
    fn test_claims_with_expiration() {
        let claims = Claims::with_expiration(1, AccountRole::Admin, 3600);
        assert!(!claims.is_expired());
        assert!(claims.is_admin());

        let now = Utc::now().timestamp();
        assert!(claims.exp > now);
        assert!(claims.exp <= now + 3600);
    }

    #[test]
    fn test_expired_claims() {
        let mut claims = Claims::new(1, AccountRole::User);
        claims.exp = (Utc::now() - Duration::hours(1)).timestamp();
        assert!(claims.is_expired());
    }

    #[test]
    fn test_identity_requires_numeric_subject() {
        let claims = Claims::new(12, AccountRole::Counsellor);
        let identity = claims.identity().unwrap();
        assert_eq!(identity.account_id, 12);
        assert_eq!(identity.role, AccountRole::Counsellor);

        let mut bad = claims;
        bad.sub = "alice".to_string();
        assert!(matches!(bad.identity(), Err(AppError::InvalidToken(_))));
    }
}
