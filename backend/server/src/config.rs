use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {message}")]
    Invalid { key: String, message: String },

    #[error("Secret {0} missing from /run/secrets and the environment")]
    MissingSecret(String),
}

#[derive(Clone, Debug)]
pub struct Admin {
    pub username: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub redis_url: Option<String>,
    pub token_secret: String,
    pub token_ttl_secs: i64,
    pub store_timeout: Duration,
    pub broadcast_buffer: usize,
    pub auto_approve_candidates: bool,
    pub cors_origin: Option<String>,
    pub admin: Option<Admin>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            redis_url: optional("REDIS_URL"),
            token_secret: read_secret("TOKEN_SECRET")?,
            token_ttl_secs: try_load("TOKEN_TTL_SECS", "604800")?,
            store_timeout: Duration::from_millis(try_load("STORE_TIMEOUT_MS", "2000")?),
            broadcast_buffer: try_load("BROADCAST_BUFFER", "64")?,
            auto_approve_candidates: try_load("AUTO_APPROVE_CANDIDATES", "true")?,
            cors_origin: optional("CORS_ORIGIN"),
            admin: load_admin()?,
        })
    }

    /// Defaults for tests and local runs, in-memory store.
    pub fn local(token_secret: &str) -> Self {
        Self {
            port: 1111,
            redis_url: None,
            token_secret: token_secret.to_string(),
            token_ttl_secs: 604_800,
            store_timeout: Duration::from_secs(2),
            broadcast_buffer: 64,
            auto_approve_candidates: true,
            cors_origin: None,
            admin: None,
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");

            ConfigError::Invalid {
                key: key.to_string(),
                message: e.to_string(),
            }
        })
}

/// Docker secret file first, then the environment.
fn read_secret(secret_name: &str) -> Result<String, ConfigError> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .or_else(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
            optional(secret_name).ok_or_else(|| ConfigError::MissingSecret(secret_name.to_string()))
        })
}

fn load_admin() -> Result<Option<Admin>, ConfigError> {
    let Some(username) = optional("ADMIN_USERNAME") else {
        info!("ADMIN_USERNAME not set, skipping admin seeding");
        return Ok(None);
    };

    Ok(Some(Admin {
        username,
        password: read_secret("ADMIN_PASSWORD")?,
        full_name: optional("ADMIN_FULL_NAME")
            .unwrap_or_else(|| "System Administrator".to_string()),
    }))
}
