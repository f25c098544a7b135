use crate::bridge::{AgentHandoff, ToolBridge};
use crate::invoker::InvokeError;
use crate::types::{FailureKind, ToolCallFailure, ToolCallRequest, ToolCallResult, ToolSpec};
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub(crate) struct ServerState {
    bridge: Arc<ToolBridge>,
}

impl ServerState {
    pub(crate) fn new(bridge: Arc<ToolBridge>) -> Self {
        Self { bridge }
    }

    pub(crate) fn bridge(&self) -> Arc<ToolBridge> {
        Arc::clone(&self.bridge)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(tools_handler, discover_handler, invoke_handler),
    components(
        schemas(
            AgentHandoff,
            ToolSpec,
            InvokeRequest,
            ToolCallResult,
            ToolCallFailure,
            FailureKind,
            ErrorResponse
        )
    ),
    tags(
        (name = "tools", description = "Katalog tool pembayaran yang ditemukan"),
        (name = "invoke", description = "Pemanggilan tool pembayaran jarak jauh")
    )
)]
struct ApiDoc;

pub async fn serve(bridge: Arc<ToolBridge>, addr: SocketAddr) -> Result<(), ServerError> {
    let api = ApiDoc::openapi();
    info!(%addr, "Binding REST server");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let state = Arc::new(ServerState::new(bridge));
    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", api))
        .route("/tools", get(tools_handler))
        .route("/discover", post(discover_handler))
        .route("/invoke", post(invoke_handler))
        .layer(cors)
        .with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!(%addr, "REST server ready to accept connections");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(ServerError::Serve)
}

#[derive(Debug, Deserialize, ToSchema)]
struct InvokeRequest {
    tool_name: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    arguments: Map<String, Value>,
    /// Retry transient transport failures with the configured backoff.
    #[serde(default)]
    retry: bool,
}

#[derive(Debug, Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
}

#[utoipa::path(
    get,
    path = "/tools",
    tag = "tools",
    responses(
        (status = 200, description = "Katalog tool dari snapshot terakhir", body = AgentHandoff)
    )
)]
async fn tools_handler(State(state): State<Arc<ServerState>>) -> Json<AgentHandoff> {
    let bridge = state.bridge();
    debug!(tool_count = bridge.snapshot().len(), "Serving /tools request");
    Json(bridge.handoff().await)
}

#[utoipa::path(
    post,
    path = "/discover",
    tag = "tools",
    responses(
        (status = 200, description = "Katalog berhasil diperbarui", body = AgentHandoff),
        (status = 502, description = "Layanan tool tidak dapat dihubungi", body = ErrorResponse)
    )
)]
async fn discover_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<AgentHandoff>, (StatusCode, Json<ErrorResponse>)> {
    let bridge = state.bridge();
    info!("Received /discover request");
    match bridge.refresh().await {
        Ok(tools) => {
            info!(tool_count = tools.len(), "Catalog refreshed via REST");
            Ok(Json(bridge.handoff().await))
        }
        Err(err) => {
            error!(%err, "Catalog refresh failed");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: err.user_message(),
                }),
            ))
        }
    }
}

#[utoipa::path(
    post,
    path = "/invoke",
    tag = "invoke",
    request_body = InvokeRequest,
    responses(
        (
            status = 200,
            description = "Tool dijalankan; kegagalan remote dilaporkan di body",
            body = ToolCallResult
        ),
        (status = 404, description = "Tool tidak dikenal", body = ErrorResponse),
        (status = 422, description = "Argumen tidak sesuai skema tool", body = ErrorResponse)
    )
)]
async fn invoke_handler(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<InvokeRequest>,
) -> Result<Json<ToolCallResult>, (StatusCode, Json<ErrorResponse>)> {
    let bridge = state.bridge();
    info!(tool = %payload.tool_name, retry = payload.retry, "Received /invoke request");

    let request = ToolCallRequest::new(payload.tool_name, payload.arguments);
    let outcome = if payload.retry {
        bridge.invoke_retrying(request).await
    } else {
        bridge.invoke(request).await
    };

    match outcome {
        Ok(result) => Ok(Json(result)),
        Err(err @ InvokeError::UnknownTool { .. }) => {
            error!(%err, "Rejecting /invoke request for unknown tool");
            Err((
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: err.user_message(),
                }),
            ))
        }
        Err(err @ InvokeError::InvalidArguments { .. }) => {
            error!(%err, "Rejecting /invoke request with invalid arguments");
            Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: err.user_message(),
                }),
            ))
        }
    }
}
