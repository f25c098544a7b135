//! The bridge facade an agent runtime plugs into: one connected value that
//! owns discovery, validation, and invocation against the payment service.

use crate::invoker::{InvokeError, ToolInvoker};
use crate::registry::{CatalogSnapshot, DiscoveryError, ToolRegistry};
use crate::transport::{RetryPolicy, ToolTransport};
use crate::types::{ToolCallRequest, ToolCallResult, ToolSpec};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

/// Everything an agent runtime needs to register the remote tools: the model
/// to drive them with, the service's usage notes, and the catalog itself.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AgentHandoff {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub tools: Vec<ToolSpec>,
}

pub struct ToolBridge {
    model: String,
    transport: Arc<dyn ToolTransport>,
    registry: Arc<ToolRegistry>,
    invoker: ToolInvoker,
}

impl ToolBridge {
    /// Connect to the tool service and run the first discovery. Construction
    /// fails outright when the catalog cannot be fetched, so a half-wired
    /// bridge never reaches the agent.
    pub async fn connect(
        model: impl Into<String>,
        transport: Arc<dyn ToolTransport>,
        retry: RetryPolicy,
    ) -> Result<Self, DiscoveryError> {
        let model = model.into();
        let registry = Arc::new(ToolRegistry::new(transport.clone(), retry));
        let tools = registry.discover().await?;
        info!(model = %model, tool_count = tools.len(), "Tool bridge connected");
        let invoker = ToolInvoker::new(registry.clone(), transport.clone());
        Ok(Self {
            model,
            transport,
            registry,
            invoker,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.registry.snapshot()
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        self.registry.snapshot().tools().to_vec()
    }

    /// Re-run discovery. The published snapshot only changes when the whole
    /// refresh succeeds.
    pub async fn refresh(&self) -> Result<Vec<ToolSpec>, DiscoveryError> {
        self.registry.discover().await
    }

    pub async fn invoke(&self, request: ToolCallRequest) -> Result<ToolCallResult, InvokeError> {
        self.invoker.invoke(request).await
    }

    /// Invocation that retries transient transport failures using the policy
    /// the bridge was connected with. Callers choose this explicitly; nothing
    /// retries behind their back.
    pub async fn invoke_retrying(
        &self,
        request: ToolCallRequest,
    ) -> Result<ToolCallResult, InvokeError> {
        self.invoker
            .invoke_with_retry(request, self.registry.retry_policy())
            .await
    }

    pub async fn handoff(&self) -> AgentHandoff {
        let snapshot = self.registry.snapshot();
        AgentHandoff {
            model: self.model.clone(),
            instructions: self.transport.instructions().await,
            discovered_at: snapshot.discovered_at(),
            tools: snapshot.tools().to_vec(),
        }
    }
}
