//! Configuration module - environment variable parsing

mod rules;

pub use rules::{DeployMode, HitMultipliers, MatchMode, MatchRules, StormPhaseConfig};

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// HS256 secret used to verify session tokens
    pub jwt_secret: String,
    /// Allowed client origin for CORS (comma-separated, or "*")
    pub client_origin: String,
    /// Number of match instances hosted by this process
    pub match_instances: usize,
    /// Gameplay tuning shared by every hosted match
    pub rules: MatchRules,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let rules = MatchRules::from_env()?;
        rules.validate()?;

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            match_instances: parse_var("MATCH_INSTANCES")?.unwrap_or(1),

            rules,
        })
    }
}

/// Parse an optional environment variable, failing only when it is set but malformed
pub(crate) fn parse_var<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid storm phase table: {0}")]
    InvalidStormTable(String),

    #[error("Invalid match rule: {0}")]
    InvalidRule(String),
}
