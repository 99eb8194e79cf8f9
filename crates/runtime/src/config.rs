//! Environment-driven configuration for the deep-research broker.
//!
//! All configuration is sourced from environment variables (optionally
//! loaded from a `.env` file via `dotenvy`), following the `DRMCP_*` surface.

use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::types::ServerMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub vector_dim: usize,

    pub auth_jwks_url: Option<String>,
    pub auth_jwt_audience: Option<String>,
    pub api_key: Option<String>,
    pub allow_no_api_key: bool,
    pub require_https: bool,
    pub cors_origins: Vec<String>,

    pub rate_limit_per_min: u32,
    pub max_body_bytes: usize,

    pub lease_timeout: Duration,
    pub worker_concurrency: usize,
    pub research_parallelism: usize,

    pub embedding_endpoint: Option<String>,
    pub llm_gateway_url: Option<String>,
    pub llm_gateway_key: Option<String>,

    pub mode: ServerMode,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8008,
            db_path: std::path::PathBuf::from("deepresearch.db"),
            vector_dim: 1536,
            auth_jwks_url: None,
            auth_jwt_audience: None,
            api_key: None,
            allow_no_api_key: false,
            require_https: false,
            cors_origins: Vec::new(),
            rate_limit_per_min: 100,
            max_body_bytes: 10 * 1024 * 1024,
            lease_timeout: Duration::from_secs(120),
            worker_concurrency: 2,
            research_parallelism: 4,
            embedding_endpoint: None,
            llm_gateway_url: None,
            llm_gateway_key: None,
            mode: ServerMode::Agent,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Builds configuration purely from process environment variables,
    /// falling back to documented defaults. Never panics; malformed numeric
    /// or enum values are reported as `ConfigError::InvalidValue`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut cfg = Config::default();

        if let Ok(v) = env::var("DRMCP_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Ok(v) = env::var("DRMCP_PORT") {
            cfg.port = parse_env("DRMCP_PORT", &v)?;
        }
        if let Ok(v) = env::var("DRMCP_DB_PATH") {
            cfg.db_path = std::path::PathBuf::from(v);
        }
        if let Ok(v) = env::var("DRMCP_VECTOR_DIM") {
            cfg.vector_dim = parse_env("DRMCP_VECTOR_DIM", &v)?;
        }
        cfg.auth_jwks_url = env::var("DRMCP_AUTH_JWKS_URL").ok();
        cfg.auth_jwt_audience = env::var("DRMCP_AUTH_JWT_AUDIENCE").ok();
        cfg.api_key = env::var("DRMCP_API_KEY").ok();
        if let Ok(v) = env::var("DRMCP_ALLOW_NO_API_KEY") {
            cfg.allow_no_api_key = parse_bool("DRMCP_ALLOW_NO_API_KEY", &v)?;
        }
        if let Ok(v) = env::var("DRMCP_REQUIRE_HTTPS") {
            cfg.require_https = parse_bool("DRMCP_REQUIRE_HTTPS", &v)?;
        }
        if let Ok(v) = env::var("DRMCP_CORS_ORIGINS") {
            cfg.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("DRMCP_RATE_LIMIT_PER_MIN") {
            cfg.rate_limit_per_min = parse_env("DRMCP_RATE_LIMIT_PER_MIN", &v)?;
        }
        if let Ok(v) = env::var("DRMCP_MAX_BODY_BYTES") {
            cfg.max_body_bytes = parse_env("DRMCP_MAX_BODY_BYTES", &v)?;
        }
        if let Ok(v) = env::var("DRMCP_LEASE_TIMEOUT_MS") {
            let ms: u64 = parse_env("DRMCP_LEASE_TIMEOUT_MS", &v)?;
            cfg.lease_timeout = Duration::from_millis(ms);
        }
        if let Ok(v) = env::var("DRMCP_WORKER_CONCURRENCY") {
            cfg.worker_concurrency = parse_env("DRMCP_WORKER_CONCURRENCY", &v)?;
        }
        if let Ok(v) = env::var("DRMCP_RESEARCH_PARALLELISM") {
            cfg.research_parallelism = parse_env("DRMCP_RESEARCH_PARALLELISM", &v)?;
        }
        cfg.embedding_endpoint = env::var("DRMCP_EMBEDDING_ENDPOINT").ok();
        cfg.llm_gateway_url = env::var("DRMCP_LLM_GATEWAY_URL").ok();
        cfg.llm_gateway_key = env::var("DRMCP_LLM_GATEWAY_KEY").ok();
        if let Ok(v) = env::var("DRMCP_MODE") {
            cfg.mode = ServerMode::parse(&v).ok_or_else(|| ConfigError::InvalidValue {
                key: "DRMCP_MODE".to_string(),
                reason: format!("unrecognized mode '{v}'"),
            })?;
        }
        if let Ok(v) = env::var("DRMCP_LOG_LEVEL") {
            cfg.log_level = v;
        }

        Ok(cfg)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("could not parse '{raw}'"),
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("'{raw}' is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8008);
        assert_eq!(cfg.mode, ServerMode::Agent);
        assert!(!cfg.require_https);
    }

    #[test]
    fn parse_bool_rejects_garbage() {
        assert!(parse_bool("X", "maybe").is_err());
        assert!(parse_bool("X", "true").unwrap());
    }
}
