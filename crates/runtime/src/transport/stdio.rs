//! stdio transport (§4.8): newline-delimited JSON-RPC over stdin/stdout.
//! Stdio sessions are process-scoped — one `McpSession` for the process
//! lifetime, never persisted, logging only ever goes to stderr so it never
//! corrupts the protocol stream.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::mcp::{Dispatcher, JsonRpcNotification, JsonRpcRequest, McpSession};
use crate::types::TransportKind;

pub async fn run(dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    let session = Arc::new(McpSession::new(TransportKind::Stdio));
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    tracing::info!("stdio transport ready");

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("malformed stdio request: {e}");
                let error = crate::mcp::JsonRpcError::parse_error();
                let response = crate::mcp::JsonRpcResponse::failure(serde_json::Value::Null, error);
                write_line(&mut stdout, &response).await?;
                continue;
            }
        };

        let outcome = dispatcher.dispatch(&session, request).await;
        for (progress_token, progress, message) in outcome.progress {
            let notification = JsonRpcNotification::progress(progress_token, progress, message);
            write_line(&mut stdout, &notification).await?;
        }
        if let Some(response) = outcome.response {
            write_line(&mut stdout, &response).await?;
        }
    }

    tracing::info!("stdio transport closed (EOF)");
    Ok(())
}

async fn write_line<T: serde::Serialize>(stdout: &mut tokio::io::Stdout, value: &T) -> std::io::Result<()> {
    let mut payload = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    payload.push('\n');
    stdout.write_all(payload.as_bytes()).await?;
    stdout.flush().await
}
