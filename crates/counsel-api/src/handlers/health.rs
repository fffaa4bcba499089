//! Health check

use actix_web::{web, HttpResponse};
use counsel_services::Services;

/// GET /api/v1/health
pub async fn health_check(services: web::Data<Services>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "counsel-broker",
        "version": env!("CARGO_PKG_VERSION"),
        "live_bookings": services.hub.group_count(),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check));
}
