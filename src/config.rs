//! Configuration loader and validator for the coupon service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub server: Server,
    pub database: Database,
    pub auth: Auth,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub bind_addr: String,
}

/// Storage settings. `DATABASE_URL` in the environment overrides `url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

/// Identity settings, including the admin account seeded at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Auth {
    pub admin_user: String,
    pub admin_password: String,
    pub session_ttl_minutes: u64,
    pub bcrypt_cost: u32,
}

impl Config {
    /// Database URL, preferring `DATABASE_URL` when set.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("server.bind_addr must be non-empty"));
    }
    if cfg.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("server.bind_addr must be host:port"));
    }

    if cfg.database.url.trim().is_empty() {
        return Err(ConfigError::Invalid("database.url must be non-empty"));
    }
    if cfg.database.max_connections == 0 {
        return Err(ConfigError::Invalid("database.max_connections must be > 0"));
    }

    if cfg.auth.admin_user.trim().is_empty() {
        return Err(ConfigError::Invalid("auth.admin_user must be non-empty"));
    }
    if cfg.auth.admin_password.is_empty() {
        return Err(ConfigError::Invalid("auth.admin_password must be non-empty"));
    }
    if cfg.auth.session_ttl_minutes == 0 {
        return Err(ConfigError::Invalid("auth.session_ttl_minutes must be > 0"));
    }
    if !(4..=31).contains(&cfg.auth.bcrypt_cost) {
        return Err(ConfigError::Invalid("auth.bcrypt_cost must be within 4..=31"));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"server:
  bind_addr: "127.0.0.1:5000"

database:
  url: "sqlite://./data/coupons.db"
  max_connections: 5

auth:
  admin_user: "admin@localhost"
  admin_password: "P@ssw0rd"
  session_ttl_minutes: 480
  bcrypt_cost: 10
"#
}
