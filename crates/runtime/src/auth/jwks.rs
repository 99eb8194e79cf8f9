//! JWKS-backed JWT validation (§4.9 step 1). The key set is fetched over
//! HTTP and cached with the same TTL-cache shape `ModelCatalog` uses for the
//! model list.

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::types::RuntimeError;

const JWKS_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Deserialize)]
pub struct JwtClaims {
    pub sub: Option<String>,
    pub aud: Option<serde_json::Value>,
    pub exp: usize,
    #[serde(default)]
    pub scope: Option<serde_json::Value>,
}

impl JwtClaims {
    /// The `scope` claim may be a space-separated string or a JSON array;
    /// normalized to a `Vec<String>` either way.
    pub fn scopes(&self) -> Vec<String> {
        match &self.scope {
            Some(serde_json::Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
            Some(serde_json::Value::Array(items)) => {
                items.iter().filter_map(|v| v.as_str()).map(str::to_string).collect()
            }
            _ => Vec::new(),
        }
    }
}

pub struct JwksValidator {
    jwks_url: String,
    audience: Option<String>,
    cache: Mutex<Option<(Instant, JwkSet)>>,
    http: reqwest::Client,
}

impl JwksValidator {
    pub fn new(jwks_url: String, audience: Option<String>) -> Self {
        Self {
            jwks_url,
            audience,
            cache: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    async fn fetch_keys(&self) -> Result<JwkSet, RuntimeError> {
        let mut guard = self.cache.lock().await;
        if let Some((fetched_at, keys)) = guard.as_ref() {
            if fetched_at.elapsed() < JWKS_TTL {
                return Ok(keys.clone());
            }
        }
        let keys: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| RuntimeError::Upstream(format!("jwks fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| RuntimeError::Upstream(format!("jwks parse failed: {e}")))?;
        *guard = Some((Instant::now(), keys.clone()));
        Ok(keys)
    }

    pub async fn validate(&self, token: &str) -> Result<JwtClaims, RuntimeError> {
        let header = decode_header(token).map_err(|e| RuntimeError::Unauthorized(format!("malformed jwt: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| RuntimeError::Unauthorized("jwt missing 'kid' header".to_string()))?;

        let keys = self.fetch_keys().await?;
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| RuntimeError::Unauthorized(format!("no matching jwk for kid '{kid}'")))?;

        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|e| RuntimeError::Unauthorized(format!("unusable jwk: {e}")))?;

        let mut validation = Validation::new(header.alg.unwrap_or(Algorithm::RS256));
        if let Some(aud) = &self.audience {
            validation.set_audience(&[aud]);
        } else {
            validation.validate_aud = false;
        }

        let token_data = decode::<JwtClaims>(token, &decoding_key, &validation)
            .map_err(|e| RuntimeError::Unauthorized(format!("jwt validation failed: {e}")))?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_parses_space_separated_string() {
        let claims = JwtClaims {
            sub: None,
            aud: None,
            exp: 0,
            scope: Some(serde_json::json!("mcp:tools:list mcp:tools:call")),
        };
        assert_eq!(claims.scopes(), vec!["mcp:tools:list", "mcp:tools:call"]);
    }

    #[test]
    fn scopes_parses_array() {
        let claims = JwtClaims {
            sub: None,
            aud: None,
            exp: 0,
            scope: Some(serde_json::json!(["mcp:tools:list"])),
        };
        assert_eq!(claims.scopes(), vec!["mcp:tools:list"]);
    }

    #[test]
    fn scopes_empty_when_claim_absent() {
        let claims = JwtClaims { sub: None, aud: None, exp: 0, scope: None };
        assert!(claims.scopes().is_empty());
    }
}
