//! Actix-web authentication extractors
//!
//! Provides extractors for authenticated accounts with role-based access control.

use crate::jwt::JwtService;
use crate::Claims;
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use counsel_core::error::AppError;
use counsel_core::models::{AccountRole, Identity};
use futures::future::{ready, Ready};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Extract the bearer token from a request
///
/// Checks for token in the following order:
/// 1. Authorization header (Bearer token)
/// 2. `token` query parameter (browsers cannot set headers on WebSocket upgrades)
/// 3. Cookie named "token"
pub fn extract_token_from_request(req: &HttpRequest) -> Option<String> {
    if let Some(auth_header) = req.headers().get("Authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    if let Ok(query) = web::Query::<TokenQuery>::from_query(req.query_string()) {
        if let Some(token) = query.into_inner().token.filter(|t| !t.is_empty()) {
            return Some(token);
        }
    }

    if let Some(cookie) = req.cookie("token") {
        return Some(cookie.value().to_string());
    }

    None
}

/// Authenticated account extractor
///
/// Extracts and validates the JWT from the request.
///
/// # Examples
///
/// ```no_run
/// use actix_web::HttpResponse;
/// use counsel_auth::middleware::AuthenticatedUser;
///
/// async fn protected_handler(user: AuthenticatedUser) -> HttpResponse {
///     HttpResponse::Ok().json(serde_json::json!({
///         "account_id": user.account_id,
///         "role": user.role
///     }))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Account id of the authenticated caller
    pub account_id: i64,

    /// Role of the authenticated caller
    pub role: AccountRole,

    /// Full claims from the JWT token
    pub claims: Claims,
}

impl AuthenticatedUser {
    /// Check if the caller has admin privileges
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn identity(&self) -> Identity {
        Identity {
            account_id: self.account_id,
            role: self.role,
        }
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let jwt_service = match req.app_data::<web::Data<Arc<JwtService>>>() {
            Some(service) => service.get_ref().clone(),
            None => {
                warn!("JwtService not found in app data");
                return ready(Err(AppError::Unauthorized(
                    "Authentication service not configured".to_string(),
                )
                .into()));
            }
        };

        let token = match extract_token_from_request(req) {
            Some(t) => t,
            None => {
                debug!("No authentication token found in request");
                return ready(Err(AppError::Unauthorized(
                    "No authentication token provided".to_string(),
                )
                .into()));
            }
        };

        let authenticated = jwt_service.validate_token(&token).and_then(|claims| {
            let account_id = claims.account_id()?;
            Ok(AuthenticatedUser {
                account_id,
                role: claims.role,
                claims,
            })
        });

        match authenticated {
            Ok(user) => {
                debug!(
                    account_id = user.account_id,
                    role = %user.role,
                    "Caller authenticated"
                );
                ready(Ok(user))
            }
            Err(e) => {
                warn!(error = %e, "Token validation failed");
                ready(Err(e.into()))
            }
        }
    }
}

/// Admin extractor
///
/// Requires the caller to have the admin role; otherwise responds 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

impl std::ops::Deref for AdminUser {
    type Target = AuthenticatedUser;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequest for AdminUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let auth_user = match AuthenticatedUser::from_request(req, payload).into_inner() {
            Ok(user) => user,
            Err(e) => return ready(Err(e)),
        };

        if !auth_user.is_admin() {
            warn!(
                account_id = auth_user.account_id,
                role = %auth_user.role,
                "Account attempted admin access without privileges"
            );
            return ready(Err(AppError::Forbidden.into()));
        }

        ready(Ok(AdminUser(auth_user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    fn create_test_jwt_service() -> Arc<JwtService> {
        Arc::new(JwtService::new("test-secret-key-12345", 3600))
    }

    #[actix_web::test]
    async fn test_extract_token_from_authorization_header() {
        let jwt_service = create_test_jwt_service();
        let token = jwt_service
            .create_token_for_account(5, AccountRole::User)
            .unwrap();

        let app = test::init_service(App::new().app_data(web::Data::new(jwt_service)).route(
            "/test",
            web::get().to(|user: AuthenticatedUser| async move {
                assert_eq!(user.account_id, 5);
                "OK"
            }),
        ))
        .await;

        let req = test::TestRequest::get()
            .uri("/test")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_extract_token_from_query() {
        let jwt_service = create_test_jwt_service();
        let token = jwt_service
            .create_token_for_account(6, AccountRole::Counsellor)
            .unwrap();

        let app = test::init_service(App::new().app_data(web::Data::new(jwt_service)).route(
            "/test",
            web::get().to(|user: AuthenticatedUser| async move {
                assert_eq!(user.role, AccountRole::Counsellor);
                "OK"
            }),
        ))
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/test?token={}", token))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_missing_token() {
        let jwt_service = create_test_jwt_service();

        let app = test::init_service(App::new().app_data(web::Data::new(jwt_service)).route(
            "/test",
            web::get().to(|_user: AuthenticatedUser| async { "OK" }),
        ))
        .await;

        let req = test::TestRequest::get().uri("/test").to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn test_invalid_token() {
        let jwt_service = create_test_jwt_service();

        let app = test::init_service(App::new().app_data(web::Data::new(jwt_service)).route(
            "/test",
            web::get().to(|_user: AuthenticatedUser| async { "OK" }),
        ))
        .await;

        let req = test::TestRequest::get()
            .uri("/test")
            .insert_header(("Authorization", "Bearer invalid.token.here"))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn test_admin_user_with_admin_role() {
        let jwt_service = create_test_jwt_service();
        let token = jwt_service
            .create_token_for_account(1, AccountRole::Admin)
            .unwrap();

        let app = test::init_service(App::new().app_data(web::Data::new(jwt_service)).route(
            "/admin",
            web::get().to(|admin: AdminUser| async move {
                assert_eq!(admin.account_id, 1);
                "OK"
            }),
        ))
        .await;

        let req = test::TestRequest::get()
            .uri("/admin")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_admin_user_with_user_role() {
        let jwt_service = create_test_jwt_service();
        let token = jwt_service
            .create_token_for_account(2, AccountRole::User)
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(jwt_service))
                .route("/admin", web::get().to(|_admin: AdminUser| async { "OK" })),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/admin")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);
    }
}
