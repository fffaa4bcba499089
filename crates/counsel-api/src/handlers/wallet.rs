//! Wallet handlers

use crate::dto::{ApiResponse, PaginationMeta, PaginationParams, WalletResponse, WithdrawRequest};
use actix_web::{web, HttpResponse};
use counsel_auth::{AdminUser, AuthenticatedUser};
use counsel_core::models::Wallet;
use counsel_core::AppError;
use counsel_services::Services;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Caller's wallet with a page of its ledger
///
/// GET /api/v1/wallet
#[instrument(skip(services, user))]
pub async fn get_own_wallet(
    services: web::Data<Services>,
    query: web::Query<PaginationParams>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    query.validate().map_err(|e| {
        warn!("Pagination validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    // Accounts that never transacted have an implicit empty wallet
    let wallet = match services.ledger.wallet(user.account_id).await {
        Ok(wallet) => wallet,
        Err(AppError::WalletNotFound(_)) => Wallet::empty(user.account_id),
        Err(e) => return Err(e),
    };
    let page = services
        .ledger
        .history(user.account_id, query.page, query.per_page)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(WalletResponse {
        wallet,
        pagination: PaginationMeta::new(page.total, page.page, page.per_page),
        entries: page.entries,
    })))
}

/// Recompute a wallet from its ledger
///
/// GET /api/v1/wallets/{account_id}/audit
#[instrument(skip(services, _admin))]
pub async fn audit_wallet(
    services: web::Data<Services>,
    path: web::Path<i64>,
    _admin: AdminUser,
) -> Result<HttpResponse, AppError> {
    let report = services.ledger.audit(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// POST /api/v1/wallets/{account_id}/withdraw
#[instrument(skip(services, admin, req))]
pub async fn withdraw(
    services: web::Data<Services>,
    path: web::Path<i64>,
    admin: AdminUser,
    req: web::Json<WithdrawRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate()?;
    let account_id = path.into_inner();

    let wallet = services
        .ledger
        .withdraw(account_id, req.amount, &req.description)
        .await?;

    info!(
        account_id,
        amount = %req.amount,
        by = admin.account_id,
        "Withdrawal recorded"
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(wallet)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/wallet", web::get().to(get_own_wallet)).service(
        web::scope("/wallets")
            .route("/{account_id}/audit", web::get().to(audit_wallet))
            .route("/{account_id}/withdraw", web::post().to(withdraw)),
    );
}
