//! Environment configuration.
//!
//! Everything is read once at startup from process env (after `.env` is
//! loaded by `dotenvy`). Missing or unparsable values fall back to defaults
//! suitable for local development.

use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::logging::config::LoggingConfig;

/// Signing secret used when `SESSION_SECRET` is not set.
pub const DEFAULT_SESSION_SECRET: &str = "default-session-secret-change-in-production";

static ENVIRONMENT: OnceCell<Environment> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match std::env::var("ENVIRONMENT").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

/// Record the process-wide environment mode. First call wins.
pub fn set_environment(env: Environment) {
    let _ = ENVIRONMENT.set(env);
}

/// The process-wide environment mode (development until set).
pub fn environment() -> Environment {
    ENVIRONMENT.get().copied().unwrap_or(Environment::Development)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub cookie_name: String,
    pub ttl: Duration,
    pub remember_ttl: Duration,
    pub secure: bool,
}

impl SessionConfig {
    pub fn from_env(environment: Environment) -> Self {
        Self {
            secret: env_string("SESSION_SECRET", DEFAULT_SESSION_SECRET),
            cookie_name: env_string("SESSION_COOKIE", "realty.sid"),
            ttl: Duration::from_secs(env_or("SESSION_TTL_HOURS", 24u64) * 3600),
            remember_ttl: Duration::from_secs(env_or("SESSION_REMEMBER_DAYS", 30u64) * 86_400),
            secure: environment.is_production(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max_requests: 100,
            trust_proxy: false,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            window: Duration::from_secs(env_or("RATE_LIMIT_WINDOW_SECS", defaults.window.as_secs())),
            max_requests: env_or("RATE_LIMIT_MAX", defaults.max_requests),
            trust_proxy: env_or("TRUST_PROXY", false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_file_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            max_file_bytes: 5 * 1024 * 1024,
        }
    }
}

impl UploadConfig {
    pub fn from_env() -> Self {
        Self {
            dir: PathBuf::from(env_string("UPLOAD_DIR", "uploads")),
            max_file_bytes: env_or("MAX_UPLOAD_MB", 5usize) * 1024 * 1024,
        }
    }
}

/// Credentials for the bootstrap admin created when the user table is empty.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl AdminSeed {
    pub fn from_env() -> Self {
        Self {
            username: env_string("ADMIN_USERNAME", "admin"),
            email: env_string("ADMIN_EMAIL", "admin@example.com"),
            password: env_string("ADMIN_PASSWORD", "admin12345"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub db_connect_retries: u32,
    pub db_retry_delay: Duration,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub uploads: UploadConfig,
    pub admin_seed: AdminSeed,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = Environment::from_env();
        Self {
            environment,
            host: env_string("HOST", "127.0.0.1"),
            port: env_or("PORT", 3001u16),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            db_connect_retries: env_or("DB_CONNECT_RETRIES", 5u32),
            db_retry_delay: Duration::from_secs(env_or("DB_RETRY_DELAY_SECS", 5u64)),
            session: SessionConfig::from_env(environment),
            rate_limit: RateLimitConfig::from_env(),
            uploads: UploadConfig::from_env(),
            admin_seed: AdminSeed::from_env(),
            logging: LoggingConfig::from_env(environment),
        }
    }

    /// Configuration for tests and tooling: development mode, no database,
    /// uploads under `upload_dir`.
    pub fn for_tests(upload_dir: impl Into<PathBuf>) -> Self {
        let environment = Environment::Development;
        Self {
            environment,
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: None,
            db_connect_retries: 0,
            db_retry_delay: Duration::from_millis(0),
            session: SessionConfig {
                secret: "test-session-secret".to_string(),
                cookie_name: "realty.sid".to_string(),
                ttl: Duration::from_secs(3600),
                remember_ttl: Duration::from_secs(30 * 86_400),
                secure: false,
            },
            rate_limit: RateLimitConfig::default(),
            uploads: UploadConfig {
                dir: upload_dir.into(),
                max_file_bytes: 5 * 1024 * 1024,
            },
            admin_seed: AdminSeed {
                username: "admin".to_string(),
                email: "admin@example.com".to_string(),
                password: "admin12345".to_string(),
            },
            logging: LoggingConfig::from_env(environment),
        }
    }

    /// Refuse insecure production setups. Mirrors the startup guard on the
    /// signing secret; weak admin seed credentials only warn.
    pub fn validate(&self) -> Result<(), String> {
        if self.environment.is_production() {
            if self.session.secret == DEFAULT_SESSION_SECRET || self.session.secret.len() < 32 {
                return Err(
                    "SESSION_SECRET must be set to a unique value of at least 32 characters in production"
                        .to_string(),
                );
            }
            if self.admin_seed.email == "admin@example.com" {
                tracing::warn!("SECURITY: ADMIN_EMAIL is using an insecure default");
            }
        }
        if self.rate_limit.max_requests == 0 {
            return Err("RATE_LIMIT_MAX must be at least 1".to_string());
        }
        Ok(())
    }
}
