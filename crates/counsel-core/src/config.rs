//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// URL scheme that selects the in-memory store instead of PostgreSQL
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub calls: CallsConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL, or `memory://` for the in-memory store
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Apply embedded migrations at startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_run_migrations() -> bool {
    true
}

impl DatabaseConfig {
    /// Whether the configured URL selects the in-memory store
    pub fn is_memory(&self) -> bool {
        self.url.starts_with(MEMORY_DATABASE_URL)
    }
}

/// Authentication configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT signing secret shared with the credential issuer
    pub jwt_secret: String,

    /// JWT token expiration in seconds (for tokens minted by this service)
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: i64,
}

fn default_jwt_expiration() -> i64 {
    1800 // 30 minutes
}

/// Call signaling and hub configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CallsConfig {
    /// Bounded outbound queue per live connection
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Keepalive ping interval for WebSocket connections
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Age after which an unanswered PENDING call is expired.
    /// `None` disables the sweeper entirely.
    #[serde(default)]
    pub pending_timeout_secs: Option<u64>,

    /// How often the sweeper looks for stale PENDING calls
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_ping_interval() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    15
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_queue_capacity(),
            ping_interval_secs: default_ping_interval(),
            pending_timeout_secs: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// CORS configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    /// Comma-separated list of allowed origins
    #[serde(default = "default_origins")]
    pub allowed_origins: String,
}

fn default_origins() -> String {
    "http://localhost:3000,http://127.0.0.1:3000".to_string()
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_origins(),
        }
    }
}

impl CorsConfig {
    /// Allowed origins as trimmed entries
    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.run_migrations", true)?
            .set_default("auth.jwt_expiration_secs", 1800)?
            .set_default("calls.outbound_queue_capacity", 64)?
            .set_default("calls.ping_interval_secs", 30)?
            .set_default("calls.sweep_interval_secs", 15)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with COUNSEL_ prefix
            .add_source(
                Environment::with_prefix("COUNSEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("COUNSEL").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
