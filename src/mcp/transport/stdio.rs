//! stdio Transport
//!
//! NDJSON framing: one JSON-RPC object per input line, one per output line.
//! A single long-lived session serves the whole process; diagnostics go to
//! stderr so stdout stays a clean protocol channel. Each message is handled
//! on its own task so a slow tool never blocks the reader.

use crate::mcp::protocol::{JsonRpcError, JsonRpcErrorResponse, JsonRpcMessage};
use crate::mcp::server::McpServer;
use crate::mcp::session::ChannelSink;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Session id used for the single stdio connection
pub const STDIO_SESSION_ID: &str = "stdio";

/// Run the server over stdin/stdout until EOF
pub async fn serve_stdio(server: Arc<McpServer>) -> Result<()> {
    info!("Starting MCP server with stdio transport");

    let (tx, mut rx) = mpsc::channel::<Value>(256);

    // Writer task: the single place that touches stdout, so output lines
    // never interleave.
    let writer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(value) = rx.recv().await {
            let mut line = value.to_string();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let session = server
        .open_session(STDIO_SESSION_ID, Arc::new(ChannelSink::new(tx.clone())))
        .await;

    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                info!("EOF reached, closing connection");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let value: Value = match serde_json::from_str(trimmed) {
                    Ok(value) => value,
                    Err(e) => {
                        error!("Failed to parse JSON: {}", e);
                        let response = JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(
                            JsonRpcError::parse_error(),
                            None,
                        ));
                        if let Ok(value) = serde_json::to_value(&response) {
                            let _ = tx.send(value).await;
                        }
                        continue;
                    }
                };

                let server = Arc::clone(&server);
                let session = Arc::clone(&session);
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = server.handle_value(&session, value).await {
                        match serde_json::to_value(&response) {
                            Ok(value) => {
                                let _ = tx.send(value).await;
                            }
                            Err(e) => error!("Failed to serialize response: {}", e),
                        }
                    }
                });
            }
            Err(e) => {
                error!("Error reading from stdin: {}", e);
                break;
            }
        }
    }

    server.close_session(STDIO_SESSION_ID).await;
    drop(tx);
    let _ = writer.await;

    info!("MCP server stopped");
    Ok(())
}
