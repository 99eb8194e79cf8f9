//! Auth & discovery (§4.9): bearer API key and/or OAuth 2.1 JWT (JWKS)
//! validation, scope mapping, protected-resource discovery documents, and
//! per-IP rate limiting.

mod jwks;
mod rate_limit;
mod scope;

pub use jwks::{JwksValidator, JwtClaims};
pub use rate_limit::{extract_client_ip, RateLimitDecision, RateLimiter};
pub use scope::{method_scope, AuthContext};

use crate::config::Config;
use crate::types::{McpError, RuntimeError, RuntimeResult};

/// Validates an `Authorization: Bearer <token>` header per §4.9's ordering:
/// JWKS (if configured) first, then a static API key, then
/// `ALLOW_NO_API_KEY`, else reject.
pub struct Authenticator {
    jwks: Option<JwksValidator>,
    api_key: Option<String>,
    allow_no_api_key: bool,
}

impl Authenticator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jwks: config
                .auth_jwks_url
                .clone()
                .map(|url| JwksValidator::new(url, config.auth_jwt_audience.clone())),
            api_key: config.api_key.clone(),
            allow_no_api_key: config.allow_no_api_key,
        }
    }

    /// `authorization_header` is the raw `Authorization` header value, if any.
    pub async fn authenticate(&self, authorization_header: Option<&str>) -> RuntimeResult<AuthContext> {
        let bearer = authorization_header.and_then(|h| h.strip_prefix("Bearer "));

        if let Some(jwks) = &self.jwks {
            let token = bearer.ok_or_else(|| RuntimeError::Unauthorized("missing bearer token".to_string()))?;
            let claims = jwks.validate(token).await?;
            return Ok(AuthContext::from_claims(claims));
        }

        if let Some(expected) = &self.api_key {
            let token = bearer.ok_or_else(|| RuntimeError::Unauthorized("missing bearer token".to_string()))?;
            if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
                return Err(RuntimeError::Unauthorized("invalid api key".to_string()));
            }
            return Ok(AuthContext::full_access());
        }

        if self.allow_no_api_key {
            return Ok(AuthContext::full_access());
        }

        Err(RuntimeError::Unauthorized("no authentication configured for this request".to_string()))
    }

    /// Whether any authentication mechanism is active; callers use this to
    /// decide whether to enforce scope checks at all.
    pub fn is_enabled(&self) -> bool {
        self.jwks.is_some() || self.api_key.is_some()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Checks that `ctx` carries the scope required for `method`. For
/// `tools/call`, the narrower `mcp:tools:call:<toolName>` scope also
/// satisfies the check, per §4.9's "plus optionally
/// `mcp:tools:call:<toolName>`".
pub fn authorize(ctx: &AuthContext, method: &str, tool_name: Option<&str>) -> RuntimeResult<()> {
    let required = method_scope(method, tool_name);
    let tool_scope = tool_name.map(|name| format!("{required}:{name}"));
    if ctx.has_scope(&required) || tool_scope.as_deref().is_some_and(|s| ctx.has_scope(s)) {
        Ok(())
    } else {
        Err(RuntimeError::Mcp(McpError::InsufficientScope(
            tool_scope.unwrap_or(required),
        )))
    }
}

/// `GET /.well-known/oauth-protected-resource[/mcp]` body (RFC 9728-style).
pub fn protected_resource_metadata(config: &Config, resource_url: &str) -> serde_json::Value {
    serde_json::json!({
        "resource": resource_url,
        "authorization_servers": config.auth_jwks_url.clone().map(|u| vec![u]).unwrap_or_default(),
        "scopes_supported": ["mcp:tools:list", "mcp:tools:call", "mcp:resources:read", "mcp:prompts:list"],
        "bearer_methods_supported": ["header"],
        "resource_name": "deepresearch-mcpd",
    })
}

/// `GET /.well-known/mcp-server` body: server identity, supported protocol
/// versions, and transports.
pub fn mcp_server_metadata(server_name: &'static str, server_version: &'static str) -> serde_json::Value {
    serde_json::json!({
        "name": server_name,
        "version": server_version,
        "protocolVersions": crate::mcp::session::SUPPORTED_PROTOCOL_VERSIONS,
        "transports": ["stdio", "streamable-http", "websocket", "sse"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_api_key(key: &str) -> Config {
        let mut cfg = Config::default();
        cfg.api_key = Some(key.to_string());
        cfg
    }

    #[tokio::test]
    async fn static_api_key_accepts_matching_bearer() {
        let auth = Authenticator::from_config(&config_with_api_key("secret123"));
        let ctx = auth.authenticate(Some("Bearer secret123")).await.unwrap();
        assert!(ctx.has_scope("mcp:tools:call"));
    }

    #[tokio::test]
    async fn static_api_key_rejects_mismatch() {
        let auth = Authenticator::from_config(&config_with_api_key("secret123"));
        assert!(auth.authenticate(Some("Bearer wrong")).await.is_err());
    }

    #[tokio::test]
    async fn missing_header_rejected_when_no_fallback_allowed() {
        let auth = Authenticator::from_config(&config_with_api_key("secret123"));
        assert!(auth.authenticate(None).await.is_err());
    }

    #[tokio::test]
    async fn allow_no_api_key_opens_access_with_no_header() {
        let mut cfg = Config::default();
        cfg.allow_no_api_key = true;
        let auth = Authenticator::from_config(&cfg);
        let ctx = auth.authenticate(None).await.unwrap();
        assert!(ctx.has_scope("mcp:tools:list"));
    }

    #[test]
    fn authorize_rejects_missing_scope() {
        let ctx = AuthContext::with_scopes(vec!["mcp:tools:list".to_string()]);
        assert!(authorize(&ctx, "tools/call", Some("retrieve")).is_err());
        assert!(authorize(&ctx, "tools/list", None).is_ok());
    }
}
