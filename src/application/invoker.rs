//! Tool invocation: local checks first, then the wire, never an exception for
//! a remote failure.

use crate::application::schema;
use crate::registry::ToolRegistry;
use crate::rpc::methods;
use crate::transport::{RetryPolicy, ToolTransport, TransportError};
use crate::types::{FailureKind, ToolCallFailure, ToolCallRequest, ToolCallResult};
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Caller mistakes. Everything that goes wrong on the service side is
/// reported inside [`ToolCallResult`] instead.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },
    #[error("invalid arguments for tool '{tool}': {}", .violations.join("; "))]
    InvalidArguments { tool: String, violations: Vec<String> },
}

impl InvokeError {
    /// User-friendly error message in Indonesian
    pub fn user_message(&self) -> String {
        match self {
            InvokeError::UnknownTool { name } => {
                format!("Tool '{name}' tidak tersedia pada layanan.")
            }
            InvokeError::InvalidArguments { tool, violations } => {
                format!(
                    "Argumen untuk tool '{tool}' tidak valid: {}",
                    violations.join("; ")
                )
            }
        }
    }
}

pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn ToolTransport>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, transport: Arc<dyn ToolTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Single-shot invocation. Remote failures come back as data.
    pub async fn invoke(&self, request: ToolCallRequest) -> Result<ToolCallResult, InvokeError> {
        self.invoke_with_retry(request, &RetryPolicy::none()).await
    }

    /// Invocation with opt-in retries for transient transport failures. The
    /// tool name and arguments are checked against the current snapshot
    /// before anything touches the network, so a bad request costs no wire
    /// traffic at all.
    pub async fn invoke_with_retry(
        &self,
        request: ToolCallRequest,
        policy: &RetryPolicy,
    ) -> Result<ToolCallResult, InvokeError> {
        let snapshot = self.registry.snapshot();
        let Some(spec) = snapshot.get(&request.tool_name) else {
            warn!(requested_tool = %request.tool_name, "Unknown tool requested");
            return Err(InvokeError::UnknownTool {
                name: request.tool_name,
            });
        };

        let violations = schema::validate_arguments(&request.arguments, &spec.input_schema);
        if !violations.is_empty() {
            warn!(
                tool = %request.tool_name,
                violation_count = violations.len(),
                "Arguments rejected before dispatch"
            );
            return Err(InvokeError::InvalidArguments {
                tool: request.tool_name,
                violations,
            });
        }

        let call_id = Uuid::new_v4();
        let params = json!({
            "name": request.tool_name,
            "arguments": Value::Object(request.arguments.clone()),
        });
        debug!(call_id = %call_id, tool = %request.tool_name, "Dispatching tool call");

        let mut retries = 0;
        loop {
            match self
                .transport
                .request(methods::TOOLS_CALL, params.clone())
                .await
            {
                Ok(result) => {
                    let outcome = decode_call_result(result);
                    info!(
                        call_id = %call_id,
                        tool = %request.tool_name,
                        success = outcome.success,
                        "Tool call completed"
                    );
                    return Ok(outcome);
                }
                Err(err) if err.is_transient() && retries + 1 < policy.max_attempts => {
                    let delay = policy.backoff(retries);
                    warn!(
                        call_id = %call_id,
                        attempt = retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "Tool call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(err) => {
                    warn!(call_id = %call_id, tool = %request.tool_name, %err, "Tool call failed");
                    return Ok(ToolCallResult::failed(failure_from_transport(err)));
                }
            }
        }
    }
}

/// Normalize a `tools/call` result into a [`ToolCallResult`].
///
/// Three shapes are recognized, checked in this order:
/// 1. the protocol envelope with `content`/`structuredContent`/`isError`;
/// 2. an object carrying a literal boolean `success` key, taken field for field;
/// 3. anything else, passed through as a successful output.
fn decode_call_result(result: Value) -> ToolCallResult {
    let mut object = match result {
        Value::Object(object) => object,
        other => return ToolCallResult::ok(Some(other)),
    };

    if object.contains_key("content")
        || object.contains_key("structuredContent")
        || object.contains_key("isError")
    {
        let is_error = object
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let text = joined_text(object.get("content"));
        let output = match object.remove("structuredContent") {
            Some(value) if !value.is_null() => Some(value),
            _ => text.clone().map(Value::String),
        };

        if is_error {
            let message = text
                .or_else(|| structured_error_message(output.as_ref()))
                .unwrap_or_else(|| "tool reported a failure".to_string());
            let mut failure = ToolCallFailure::tool(message);
            if let Some(details) = output {
                failure = failure.with_details(details);
            }
            return ToolCallResult::failed(failure);
        }
        return ToolCallResult::ok(output);
    }

    if let Some(success) = object.get("success").and_then(Value::as_bool) {
        let output = object.remove("output").filter(|value| !value.is_null());
        if success {
            return ToolCallResult {
                success: true,
                output,
                error: None,
            };
        }
        let error_value = object.remove("error").filter(|value| !value.is_null());
        let failure = match error_value {
            Some(value) => serde_json::from_value::<ToolCallFailure>(value.clone())
                .unwrap_or_else(|_| {
                    ToolCallFailure::tool(plain_error_message(&value)).with_details(value)
                }),
            None => ToolCallFailure::tool("tool reported a failure"),
        };
        return ToolCallResult::failed(failure);
    }

    ToolCallResult::ok(Some(Value::Object(object)))
}

/// Concatenated text blocks from an envelope `content` array.
fn joined_text(content: Option<&Value>) -> Option<String> {
    let array = content.and_then(Value::as_array)?;
    let mut lines = Vec::new();
    for block in array {
        let is_text = block
            .get("type")
            .and_then(Value::as_str)
            .map(|value| value.eq_ignore_ascii_case("text"))
            .unwrap_or(false);
        if !is_text {
            continue;
        }
        if let Some(text) = block.get("text").and_then(Value::as_str) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn structured_error_message(output: Option<&Value>) -> Option<String> {
    let error = output?.get("error")?.as_object()?;
    let message = error.get("message").and_then(Value::as_str)?.trim();
    if message.is_empty() {
        None
    } else {
        Some(message.to_string())
    }
}

fn plain_error_message(value: &Value) -> String {
    match value {
        Value::String(text) if !text.trim().is_empty() => text.trim().to_string(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(|message| message.trim().to_string())
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| "tool reported a failure".to_string()),
        _ => "tool reported a failure".to_string(),
    }
}

fn failure_from_transport(err: TransportError) -> ToolCallFailure {
    match err {
        TransportError::Timeout { .. } => {
            ToolCallFailure::new(FailureKind::Timeout, err.to_string())
        }
        TransportError::Rpc {
            code,
            message,
            data,
        } => {
            let mut failure = ToolCallFailure::new(FailureKind::Protocol, message).with_code(code);
            if let Some(details) = data {
                failure = failure.with_details(details);
            }
            failure
        }
        TransportError::InvalidJson { .. } | TransportError::MissingResponse => {
            ToolCallFailure::new(FailureKind::Protocol, err.to_string())
        }
        TransportError::Http { .. } | TransportError::Status { .. } => {
            ToolCallFailure::new(FailureKind::Transport, err.to_string())
        }
    }
}
