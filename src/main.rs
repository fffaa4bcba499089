//! Counsel Broker server
//!
//! Coordinates live counselling calls for paid bookings: call signaling over
//! WebSocket, per-booking fan-out and wallet settlement when a call ends.

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpResponse, HttpServer};
use counsel_api::{configure_api, configure_ws};
use counsel_auth::JwtService;
use counsel_core::AppConfig;
use counsel_db::{
    create_pool, run_migrations, MemoryStore, PgBookingRepository, PgCallSessionRepository,
    PgLedgerRepository,
};
use counsel_services::{Services, Stores};
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "counsel_broker={0},counsel_api={0},counsel_services={0},counsel_db={0},counsel_auth={0},actix_web=info,sqlx=warn",
            log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Select the store backing the repositories
async fn build_stores(config: &AppConfig) -> std::io::Result<Stores> {
    if config.database.is_memory() {
        warn!("Using the in-memory store; state is lost on restart");
        let store = Arc::new(MemoryStore::new());
        return Ok(Stores {
            bookings: store.clone(),
            sessions: store.clone(),
            ledger: store,
        });
    }

    info!("Connecting to database...");
    let pool = create_pool(&config.database).await.map_err(|e| {
        error!("Failed to create database pool: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    if config.database.run_migrations {
        run_migrations(&pool).await.map_err(|e| {
            error!("Failed to run migrations: {}", e);
            std::io::Error::other(e.to_string())
        })?;
    }

    info!(
        "Database connection established with {} max connections",
        config.database.max_connections
    );

    Ok(Stores {
        bookings: Arc::new(PgBookingRepository::new(pool.clone())),
        sessions: Arc::new(PgCallSessionRepository::new(pool.clone())),
        ledger: Arc::new(PgLedgerRepository::new(pool)),
    })
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Counsel Broker v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().map_err(|e| {
        error!("Invalid configuration: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    let jwt_service = Arc::new(JwtService::new(
        &config.auth.jwt_secret,
        config.auth.jwt_expiration_secs,
    ));
    info!(
        "JWT service configured with {} second token expiration",
        config.auth.jwt_expiration_secs
    );

    let stores = build_stores(&config).await?;
    let services = Services::new(stores, jwt_service.clone(), config.calls.clone());

    let _sweeper = match services.pending_sweeper() {
        Some(sweeper) => Some(sweeper.spawn()),
        None => {
            info!("Pending call expiry disabled");
            None
        }
    };

    let bind_addr = config.server_addr();
    let workers = config.server.workers.max(1);
    let cors_origins = config.cors.origins();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    HttpServer::new(move || {
        let origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                origin
                    .to_str()
                    .map(|o| origins.iter().any(|allowed| allowed == o))
                    .unwrap_or(false)
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                header::AUTHORIZATION,
                header::ACCEPT,
                header::CONTENT_TYPE,
                header::COOKIE,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(services.clone()))
            .app_data(web::Data::new(jwt_service.clone()))
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                let error_message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_body",
                        "message": error_message,
                        "status": 400
                    })),
                )
                .into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                let error_message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_query",
                        "message": error_message,
                        "status": 400
                    })),
                )
                .into()
            }))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(web::scope("/api/v1").configure(configure_api))
            .configure(configure_ws)
            .route(
                "/",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .append_header(("Location", "/api/v1/health"))
                        .finish()
                }),
            )
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run()
    .await
}
