//! Stdio transport: one JSON request per line in, one JSON response per
//! line out.  At most one call is in flight at a time — requests are
//! serviced strictly in arrival order.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::engine::Engine;

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    pub op: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub text: String,
    pub is_error: bool,
}

/// Service requests from stdin until EOF.
pub async fn run_stdio_server(engine: Engine) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    info!(store = %engine.store.paths().root().display(), "palace serving on stdio");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!(op = %request.op, "handling request");
                let result = engine.handle(&request.op, request.args).await;
                Response {
                    id: request.id,
                    text: result.text,
                    is_error: result.is_error,
                }
            }
            Err(err) => Response {
                id: None,
                text: format!("malformed request: {err}"),
                is_error: true,
            },
        };

        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("stdin closed, shutting down");
    Ok(())
}
