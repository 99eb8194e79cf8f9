//! OAuth scope model (§4.9): per-method required scopes and the
//! authenticated caller's granted scope set.

/// Scopes granted to the current caller, derived either from JWT `scope`
/// claims or implicitly (static API key / `ALLOW_NO_API_KEY`, both of which
/// grant unrestricted access).
#[derive(Debug, Clone)]
pub struct AuthContext {
    scopes: Vec<String>,
    full_access: bool,
}

impl AuthContext {
    pub fn full_access() -> Self {
        Self { scopes: Vec::new(), full_access: true }
    }

    pub fn with_scopes(scopes: Vec<String>) -> Self {
        Self { scopes, full_access: false }
    }

    pub fn from_claims(claims: super::JwtClaims) -> Self {
        Self::with_scopes(claims.scopes())
    }

    pub fn has_scope(&self, required: &str) -> bool {
        self.full_access || self.scopes.iter().any(|s| s == required)
    }
}

/// Maps a JSON-RPC method onto its baseline required scope, per §4.9:
/// `tools/list → mcp:tools:list`, `tools/call → mcp:tools:call`, etc. The
/// caller holding this baseline scope is always sufficient; `tools/call`
/// additionally accepts the narrower `mcp:tools:call:<toolName>` scope.
pub fn method_scope(method: &str, _tool_name: Option<&str>) -> String {
    match method {
        "tools/list" => "mcp:tools:list".to_string(),
        "tools/call" => "mcp:tools:call".to_string(),
        "prompts/list" | "prompts/get" => "mcp:prompts:list".to_string(),
        "resources/list" | "resources/read" | "resources/subscribe" => "mcp:resources:read".to_string(),
        "completion/complete" => "mcp:tools:call".to_string(),
        "logging/setLevel" => "mcp:admin".to_string(),
        _ => "mcp:baseline".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_baseline_scope_ignores_tool_name() {
        assert_eq!(method_scope("tools/call", Some("retrieve")), "mcp:tools:call");
    }

    #[test]
    fn full_access_context_satisfies_any_scope() {
        let ctx = AuthContext::full_access();
        assert!(ctx.has_scope("mcp:admin"));
    }

    #[test]
    fn scoped_context_only_matches_granted_scopes() {
        let ctx = AuthContext::with_scopes(vec!["mcp:tools:list".to_string()]);
        assert!(ctx.has_scope("mcp:tools:list"));
        assert!(!ctx.has_scope("mcp:tools:call"));
    }
}
