use crate::bridge::{AgentHandoff, ToolBridge};
use crate::types::{ToolCallRequest, ToolCallResult, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum StdioError {
    #[error("stdin/stdout I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize stdio response: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One command per line. `describe` answers from the current snapshot,
/// `discover` refreshes it, `invoke` dispatches a tool call.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeCommand {
    Describe,
    Discover,
    Invoke {
        tool_name: String,
        #[serde(default)]
        arguments: Map<String, Value>,
        #[serde(default)]
        retry: bool,
    },
}

#[derive(Debug, Serialize)]
struct BridgeReply {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    handoff: Option<AgentHandoff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ToolCallResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl BridgeReply {
    fn handoff(handoff: AgentHandoff) -> Self {
        Self {
            ok: true,
            handoff: Some(handoff),
            tools: None,
            result: None,
            error: None,
        }
    }

    fn tools(tools: Vec<ToolSpec>) -> Self {
        Self {
            ok: true,
            handoff: None,
            tools: Some(tools),
            result: None,
            error: None,
        }
    }

    fn result(result: ToolCallResult) -> Self {
        Self {
            ok: true,
            handoff: None,
            tools: None,
            result: Some(result),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            handoff: None,
            tools: None,
            result: None,
            error: Some(message.into()),
        }
    }
}

pub async fn run(bridge: Arc<ToolBridge>) -> Result<(), StdioError> {
    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received STDIO line");

        match serde_json::from_str::<BridgeCommand>(&line) {
            Ok(BridgeCommand::Describe) => {
                info!("Processing STDIO describe command");
                write_response(&mut stdout, BridgeReply::handoff(bridge.handoff().await)).await?;
            }
            Ok(BridgeCommand::Discover) => {
                info!("Processing STDIO discover command");
                match bridge.refresh().await {
                    Ok(tools) => {
                        write_response(&mut stdout, BridgeReply::tools(tools)).await?;
                    }
                    Err(err) => {
                        error!(%err, "STDIO discovery failed");
                        write_response(&mut stdout, BridgeReply::error(err.user_message()))
                            .await?;
                    }
                }
            }
            Ok(BridgeCommand::Invoke {
                tool_name,
                arguments,
                retry,
            }) => {
                info!(tool = %tool_name, retry, "Processing STDIO invoke command");
                let request = ToolCallRequest::new(tool_name, arguments);
                let outcome = if retry {
                    bridge.invoke_retrying(request).await
                } else {
                    bridge.invoke(request).await
                };
                match outcome {
                    Ok(result) => {
                        write_response(&mut stdout, BridgeReply::result(result)).await?;
                    }
                    Err(err) => {
                        error!(%err, "STDIO invoke rejected");
                        write_response(&mut stdout, BridgeReply::error(err.user_message()))
                            .await?;
                    }
                }
            }
            Err(err) => {
                error!(%err, "Failed to parse STDIO input line");
                write_response(
                    &mut stdout,
                    BridgeReply::error(format!("Format input JSON tidak valid: {err}")),
                )
                .await?;
            }
        }
    }

    stdout.flush().await?;
    Ok(())
}

async fn write_response(stdout: &mut io::Stdout, response: BridgeReply) -> Result<(), StdioError> {
    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    stdout.write_all(&payload).await?;
    stdout.flush().await?;
    Ok(())
}
