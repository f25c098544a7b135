use crate::rpc::{self, RpcRequest, RpcResponse, methods};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

const SESSION_HEADER: &str = "mcp-session-id";

/// One JSON-RPC hop to the tool service. The registry and invoker only talk
/// through this trait so tests can swap the wire out entirely.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// Usage notes announced by the service during the handshake, if any.
    async fn instructions(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to tool service timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("network error calling tool service at '{endpoint}': {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("tool service answered with HTTP {status}")]
    Status { status: StatusCode },
    #[error("tool service sent invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("tool service returned RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("tool service did not answer the request")]
    MissingResponse,
}

impl TransportError {
    /// Whether a retry has any chance of succeeding. Protocol and decode
    /// failures are deterministic and excluded.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout { .. } => true,
            TransportError::Http { source, .. } => source.is_connect(),
            TransportError::Status { status } => matches!(
                *status,
                StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            _ => false,
        }
    }

    /// User-friendly error message in Indonesian
    pub fn user_message(&self) -> String {
        match self {
            TransportError::Timeout { .. } => {
                "Permintaan ke layanan tool melebihi batas waktu.".to_string()
            }
            TransportError::Http { endpoint, source } => {
                if source.is_connect() {
                    format!("Tidak dapat terhubung ke layanan tool di '{endpoint}'.")
                } else {
                    format!("Kesalahan jaringan saat menghubungi '{endpoint}'.")
                }
            }
            TransportError::Status { status } => match *status {
                StatusCode::NOT_FOUND => "Endpoint layanan tool tidak ditemukan.".to_string(),
                StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                    "Layanan tool sedang tidak tersedia.".to_string()
                }
                other => format!("Request ke layanan tool gagal: {}", other.as_u16()),
            },
            TransportError::InvalidJson { .. } => {
                "Respons dari layanan tool tidak valid.".to_string()
            }
            TransportError::Rpc { message, .. } => {
                format!("Layanan tool menolak permintaan: {message}")
            }
            TransportError::MissingResponse => {
                "Layanan tool tidak mengirim balasan.".to_string()
            }
        }
    }
}

/// Backoff schedule for retrying transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            backoff_multiplier: 2.0,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before the next attempt, given how many retries already ran.
    pub fn backoff(&self, retries_done: u32) -> Duration {
        let scaled =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(retries_done as i32);
        Duration::from_millis((scaled as u64).min(self.max_backoff_ms))
    }
}

/// MCP-over-HTTP transport. The protocol handshake runs lazily on the first
/// request and is never repeated for the lifetime of the value.
pub struct HttpTransport {
    endpoint: String,
    http: Client,
    timeout: Duration,
    id_counter: AtomicU64,
    handshake: AsyncMutex<HandshakeState>,
}

#[derive(Default)]
struct HandshakeState {
    initialized: bool,
    session: Option<String>,
    instructions: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let endpoint = endpoint.into();
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| TransportError::Http {
                endpoint: endpoint.clone(),
                source,
            })?;
        Ok(Self {
            endpoint,
            http,
            timeout,
            id_counter: AtomicU64::new(1),
            handshake: AsyncMutex::new(HandshakeState::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn next_id(&self) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("req-{id}")
    }

    fn classify(&self, source: reqwest::Error) -> TransportError {
        if source.is_timeout() {
            TransportError::Timeout {
                timeout: self.timeout,
            }
        } else {
            TransportError::Http {
                endpoint: self.endpoint.clone(),
                source,
            }
        }
    }

    /// Send one envelope and read back whatever the service answers. Empty
    /// bodies and 202 Accepted are valid replies to notifications.
    async fn exchange(
        &self,
        payload: &RpcRequest,
        session: Option<&str>,
    ) -> Result<(Option<RpcResponse>, Option<String>), TransportError> {
        let mut builder = self
            .http
            .post(&self.endpoint)
            .header(header::ACCEPT, "application/json")
            .json(payload);
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await.map_err(|source| self.classify(source))?;
        let status = response.status();
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok((None, session));
        }
        if !status.is_success() {
            return Err(TransportError::Status { status });
        }

        let body = response.text().await.map_err(|source| self.classify(source))?;
        if body.trim().is_empty() {
            return Ok((None, session));
        }
        let parsed = serde_json::from_str::<RpcResponse>(&body)
            .map_err(|source| TransportError::InvalidJson { source })?;
        Ok((Some(parsed), session))
    }

    /// Run the protocol handshake once and hand back the session id to attach
    /// to follow-up requests.
    async fn ensure_initialized(&self) -> Result<Option<String>, TransportError> {
        let mut guard = self.handshake.lock().await;
        if guard.initialized {
            return Ok(guard.session.clone());
        }

        let params = json!({
            "protocolVersion": rpc::PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "title": "PayLink Tool Bridge"
            },
            "capabilities": {}
        });
        let request = RpcRequest::call(self.next_id(), methods::INITIALIZE, params);
        let (response, session) = self.exchange(&request, None).await?;
        let response = response.ok_or(TransportError::MissingResponse)?;
        let result = response.into_outcome().map_err(|error| TransportError::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        })?;

        if let Some(text) = result.get("instructions").and_then(Value::as_str) {
            guard.instructions = Some(text.to_string());
        }
        guard.session = session;
        guard.initialized = true;
        let session = guard.session.clone();
        drop(guard);

        info!(endpoint = %self.endpoint, "Tool service handshake completed");

        // The initialized notification is a courtesy; the service keeps
        // working without it.
        let notice = RpcRequest::notification(methods::INITIALIZED, json!({}));
        if let Err(err) = self.exchange(&notice, session.as_deref()).await {
            debug!(%err, "initialized notification was not accepted");
        }

        Ok(session)
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let session = self.ensure_initialized().await?;
        let request = RpcRequest::call(self.next_id(), method, params);
        debug!(method, "Dispatching request to tool service");
        let (response, _) = self.exchange(&request, session.as_deref()).await?;
        let response = response.ok_or(TransportError::MissingResponse)?;
        response.into_outcome().map_err(|error| TransportError::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        })
    }

    async fn instructions(&self) -> Option<String> {
        self.handshake.lock().await.instructions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(2), Duration::from_millis(800));
        assert_eq!(policy.backoff(10), Duration::from_millis(2_000));
    }

    #[test]
    fn none_policy_allows_a_single_attempt() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff(0), Duration::ZERO);
    }

    #[test]
    fn transient_classification() {
        let timeout = TransportError::Timeout {
            timeout: Duration::from_secs(30),
        };
        assert!(timeout.is_transient());

        let unavailable = TransportError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        assert!(unavailable.is_transient());

        let not_found = TransportError::Status {
            status: StatusCode::NOT_FOUND,
        };
        assert!(!not_found.is_transient());

        let rpc = TransportError::Rpc {
            code: -32601,
            message: "unknown method".to_string(),
            data: None,
        };
        assert!(!rpc.is_transient());
    }

    #[test]
    fn user_messages_cover_every_variant() {
        let errors = [
            TransportError::Timeout {
                timeout: Duration::from_secs(5),
            },
            TransportError::Status {
                status: StatusCode::BAD_GATEWAY,
            },
            TransportError::MissingResponse,
            TransportError::Rpc {
                code: -32603,
                message: "internal".to_string(),
                data: None,
            },
        ];
        for error in errors {
            assert!(!error.user_message().is_empty());
        }
    }
}
