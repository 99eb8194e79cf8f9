use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::types::{RuntimeError, RuntimeResult};

use crate::mcp::registry::{ToolContext, ToolHandler, ToolOutput};

pub struct PingTool;

#[async_trait]
impl ToolHandler for PingTool {
    fn name(&self) -> &'static str {
        "ping"
    }
    fn description(&self) -> &'static str {
        "Liveness check. Returns pong."
    }
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn always_on(&self) -> bool {
        true
    }
    async fn call(&self, _args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        Ok(ToolOutput::Json(json!({ "pong": true })))
    }
}

pub struct CalcTool;

#[async_trait]
impl ToolHandler for CalcTool {
    fn name(&self) -> &'static str {
        "calc"
    }
    fn description(&self) -> &'static str {
        "Evaluates a basic arithmetic expression (+, -, *, /, ^, parentheses)."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "expr": { "type": "string" } },
            "required": ["expr"],
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let expr = args
            .get("expr")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RuntimeError::InvalidParams("missing 'expr'".to_string()))?;
        let value = evaluate(expr).map_err(RuntimeError::InvalidParams)?;
        Ok(ToolOutput::Json(json!({ "expr": expr, "result": value })))
    }
}

pub struct DateTimeTool;

#[async_trait]
impl ToolHandler for DateTimeTool {
    fn name(&self) -> &'static str {
        "date_time"
    }
    fn description(&self) -> &'static str {
        "Returns the current UTC date/time as 'iso' (RFC3339, default), 'rfc' (RFC2822), or 'epoch' (unix seconds)."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "format": { "type": "string", "enum": ["iso", "rfc", "epoch"] } },
        })
    }
    async fn call(&self, args: Value, _ctx: &ToolContext) -> RuntimeResult<ToolOutput> {
        let now = Utc::now();
        let format = args.get("format").and_then(|v| v.as_str()).unwrap_or("iso");
        let rendered = match format {
            "rfc" => json!(now.to_rfc2822()),
            "epoch" => json!(now.timestamp()),
            _ => json!(now.to_rfc3339()),
        };
        Ok(ToolOutput::Json(json!({ "now": rendered })))
    }
}

/// Recursive-descent evaluator for `+ - * / ^ ( )` over `f64`. No variables,
/// no functions: just enough to answer "what's 12% of 340" style asks.
fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize_expr(expr)?;
    let mut pos = 0;
    let value = parse_expr(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(format!("unexpected trailing input in '{expr}'"));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize_expr(expr: &str) -> Result<Vec<Tok>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '+' => {
                tokens.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Tok::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Tok::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Tok::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let slice: String = chars[start..i].iter().collect();
                let n = slice.parse::<f64>().map_err(|_| format!("invalid number '{slice}'"))?;
                tokens.push(Tok::Num(n));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

fn parse_expr(tokens: &[Tok], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_term(tokens, pos)?;
    loop {
        match tokens.get(*pos) {
            Some(Tok::Plus) => {
                *pos += 1;
                value += parse_term(tokens, pos)?;
            }
            Some(Tok::Minus) => {
                *pos += 1;
                value -= parse_term(tokens, pos)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_term(tokens: &[Tok], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_power(tokens, pos)?;
    loop {
        match tokens.get(*pos) {
            Some(Tok::Star) => {
                *pos += 1;
                value *= parse_power(tokens, pos)?;
            }
            Some(Tok::Slash) => {
                *pos += 1;
                let divisor = parse_power(tokens, pos)?;
                if divisor == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= divisor;
            }
            _ => break,
        }
    }
    Ok(value)
}

/// Right-associative, binds tighter than `*`/`/`: `2 * 2 ^ 3` is `2 * 8`,
/// `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)`.
fn parse_power(tokens: &[Tok], pos: &mut usize) -> Result<f64, String> {
    let base = parse_factor(tokens, pos)?;
    match tokens.get(*pos) {
        Some(Tok::Caret) => {
            *pos += 1;
            let exponent = parse_power(tokens, pos)?;
            Ok(base.powf(exponent))
        }
        _ => Ok(base),
    }
}

fn parse_factor(tokens: &[Tok], pos: &mut usize) -> Result<f64, String> {
    match tokens.get(*pos) {
        Some(Tok::Num(n)) => {
            *pos += 1;
            Ok(*n)
        }
        Some(Tok::Minus) => {
            *pos += 1;
            Ok(-parse_factor(tokens, pos)?)
        }
        Some(Tok::LParen) => {
            *pos += 1;
            let value = parse_expr(tokens, pos)?;
            match tokens.get(*pos) {
                Some(Tok::RParen) => {
                    *pos += 1;
                    Ok(value)
                }
                _ => Err("expected ')'".to_string()),
            }
        }
        _ => Err("expected a number or '('".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calc_evaluates_precedence_correctly() {
        let ctx = test_ctx();
        let result = CalcTool.call(json!({ "expr": "2 + 3 * 4" }), &ctx).await.unwrap();
        match result {
            ToolOutput::Json(v) => assert_eq!(v["result"], json!(14.0)),
            _ => panic!("expected json output"),
        }
    }

    #[tokio::test]
    async fn calc_respects_parentheses() {
        let ctx = test_ctx();
        let result = CalcTool.call(json!({ "expr": "(2 + 3) * 4" }), &ctx).await.unwrap();
        match result {
            ToolOutput::Json(v) => assert_eq!(v["result"], json!(20.0)),
            _ => panic!("expected json output"),
        }
    }

    #[tokio::test]
    async fn calc_rejects_division_by_zero() {
        let ctx = test_ctx();
        let err = CalcTool.call(json!({ "expr": "1 / 0" }), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[tokio::test]
    async fn calc_evaluates_exponentiation() {
        let ctx = test_ctx();
        let result = CalcTool.call(json!({ "expr": "2^8" }), &ctx).await.unwrap();
        match result {
            ToolOutput::Json(v) => assert_eq!(v["result"], json!(256.0)),
            _ => panic!("expected json output"),
        }
    }

    #[tokio::test]
    async fn calc_exponentiation_is_right_associative_and_binds_tighter_than_multiply() {
        let ctx = test_ctx();
        let result = CalcTool.call(json!({ "expr": "2 ^ 3 ^ 2" }), &ctx).await.unwrap();
        match result {
            ToolOutput::Json(v) => assert_eq!(v["result"], json!(512.0)),
            _ => panic!("expected json output"),
        }
        let result = CalcTool.call(json!({ "expr": "2 * 2 ^ 3" }), &ctx).await.unwrap();
        match result {
            ToolOutput::Json(v) => assert_eq!(v["result"], json!(16.0)),
            _ => panic!("expected json output"),
        }
    }

    #[tokio::test]
    async fn date_time_defaults_to_rfc3339() {
        let ctx = test_ctx();
        let result = DateTimeTool.call(json!({}), &ctx).await.unwrap();
        match result {
            ToolOutput::Json(v) => assert!(v["now"].as_str().unwrap().contains('T')),
            _ => panic!("expected json output"),
        }
    }

    #[tokio::test]
    async fn date_time_iso_is_explicit() {
        let ctx = test_ctx();
        let result = DateTimeTool.call(json!({ "format": "iso" }), &ctx).await.unwrap();
        match result {
            ToolOutput::Json(v) => assert!(v["now"].as_str().unwrap().contains('T')),
            _ => panic!("expected json output"),
        }
    }

    #[tokio::test]
    async fn date_time_rfc_renders_rfc2822() {
        let ctx = test_ctx();
        let result = DateTimeTool.call(json!({ "format": "rfc" }), &ctx).await.unwrap();
        match result {
            ToolOutput::Json(v) => assert!(v["now"].as_str().unwrap().contains("UTC")),
            _ => panic!("expected json output"),
        }
    }

    #[tokio::test]
    async fn date_time_epoch_renders_unix_seconds() {
        let ctx = test_ctx();
        let result = DateTimeTool.call(json!({ "format": "epoch" }), &ctx).await.unwrap();
        match result {
            ToolOutput::Json(v) => assert!(v["now"].as_i64().unwrap() > 0),
            _ => panic!("expected json output"),
        }
    }

    fn test_ctx() -> ToolContext {
        let (_tx, rx) = tokio::sync::watch::channel(false);
        ToolContext::new(None, None, rx)
    }
}
