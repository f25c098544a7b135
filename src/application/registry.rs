//! Tool catalog discovery and the snapshot the rest of the bridge reads from.

use crate::transport::{RetryPolicy, ToolTransport, TransportError};
use crate::types::ToolSpec;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to fetch tool catalog: {0}")]
    Transport(#[from] TransportError),
    #[error("tool catalog is malformed: {reason}")]
    Malformed { reason: String },
    #[error("tool catalog lists '{name}' more than once")]
    DuplicateTool { name: String },
    #[error("tool catalog contains a tool with an empty name")]
    UnnamedTool,
}

impl DiscoveryError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// User-friendly error message in Indonesian
    pub fn user_message(&self) -> String {
        match self {
            DiscoveryError::Transport(source) => source.user_message(),
            DiscoveryError::Malformed { .. } => {
                "Katalog tool dari layanan tidak valid.".to_string()
            }
            DiscoveryError::DuplicateTool { name } => {
                format!("Katalog tool memuat nama ganda: '{name}'.")
            }
            DiscoveryError::UnnamedTool => {
                "Katalog tool memuat entri tanpa nama.".to_string()
            }
        }
    }
}

/// An immutable view of one successful discovery. Lookups go through the name
/// index; iteration keeps the order the service listed the tools in.
#[derive(Debug)]
pub struct CatalogSnapshot {
    tools: Vec<ToolSpec>,
    index: HashMap<String, usize>,
    discovered_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            discovered_at: Utc::now(),
        }
    }

    /// Validate a freshly fetched catalog and freeze it. Names must be
    /// present and unique; schemas must be objects when given at all.
    pub fn from_tools(tools: Vec<ToolSpec>) -> Result<Self, DiscoveryError> {
        let mut index = HashMap::with_capacity(tools.len());
        for (position, spec) in tools.iter().enumerate() {
            if spec.name.trim().is_empty() {
                return Err(DiscoveryError::UnnamedTool);
            }
            if !spec.input_schema.is_object() {
                return Err(DiscoveryError::malformed(format!(
                    "tool '{}' declares a non-object input schema",
                    spec.name
                )));
            }
            if index.insert(spec.name.clone(), position).is_some() {
                return Err(DiscoveryError::DuplicateTool {
                    name: spec.name.clone(),
                });
            }
        }
        Ok(Self {
            tools,
            index,
            discovered_at: Utc::now(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|position| &self.tools[*position])
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|spec| spec.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }
}

/// Fetches the service catalog and swaps it in atomically. A failed refresh
/// leaves the last good snapshot in place, so readers never see a partial
/// catalog.
pub struct ToolRegistry {
    transport: Arc<dyn ToolTransport>,
    retry: RetryPolicy,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
}

impl ToolRegistry {
    pub fn new(transport: Arc<dyn ToolTransport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::empty())),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The current catalog. Cheap to call; the snapshot is shared, not copied.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().expect("catalog snapshot lock").clone()
    }

    /// Fetch the catalog from the service, validate it, and publish it. The
    /// fetch retries on transient network failures per the registry policy.
    pub async fn discover(&self) -> Result<Vec<ToolSpec>, DiscoveryError> {
        let result = self.fetch_catalog().await?;
        let tools = parse_catalog(result)?;
        let snapshot = CatalogSnapshot::from_tools(tools)?;
        info!(tool_count = snapshot.len(), "Tool catalog discovered");
        if snapshot.is_empty() {
            warn!("Tool service advertised an empty catalog");
        }
        let tools = snapshot.tools().to_vec();
        *self.snapshot.write().expect("catalog snapshot lock") = Arc::new(snapshot);
        Ok(tools)
    }

    async fn fetch_catalog(&self) -> Result<Value, DiscoveryError> {
        let mut retries = 0;
        loop {
            match self
                .transport
                .request(crate::rpc::methods::TOOLS_LIST, json!({}))
                .await
            {
                Ok(result) => return Ok(result),
                Err(err) if err.is_transient() && retries + 1 < self.retry.max_attempts => {
                    let delay = self.retry.backoff(retries);
                    warn!(
                        attempt = retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "Catalog fetch failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(err) => {
                    debug!(%err, "Catalog fetch gave up");
                    return Err(DiscoveryError::Transport(err));
                }
            }
        }
    }
}

/// Pull the tool list out of a `tools/list` result.
fn parse_catalog(result: Value) -> Result<Vec<ToolSpec>, DiscoveryError> {
    let Some(entries) = result.get("tools") else {
        return Err(DiscoveryError::malformed("result has no 'tools' array"));
    };
    if !entries.is_array() {
        return Err(DiscoveryError::malformed("'tools' is not an array"));
    }
    serde_json::from_value(entries.clone())
        .map_err(|source| DiscoveryError::malformed(source.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, schema: Value) -> ToolSpec {
        ToolSpec::new(name, format!("{name} tool"), schema)
    }

    #[test]
    fn snapshot_preserves_service_order() {
        let snapshot = CatalogSnapshot::from_tools(vec![
            spec("charge_card", json!({})),
            spec("refund_payment", json!({})),
            spec("get_payment_status", json!({})),
        ])
        .expect("valid catalog");
        let names: Vec<&str> = snapshot.names().collect();
        assert_eq!(
            names,
            vec!["charge_card", "refund_payment", "get_payment_status"]
        );
        assert_eq!(snapshot.get("refund_payment").map(|s| s.name.as_str()), Some("refund_payment"));
        assert!(snapshot.get("missing").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let error = CatalogSnapshot::from_tools(vec![
            spec("charge_card", json!({})),
            spec("charge_card", json!({})),
        ])
        .expect_err("duplicate must fail");
        assert!(matches!(
            error,
            DiscoveryError::DuplicateTool { name } if name == "charge_card"
        ));
    }

    #[test]
    fn blank_names_are_rejected() {
        let error = CatalogSnapshot::from_tools(vec![spec("  ", json!({}))])
            .expect_err("blank name must fail");
        assert!(matches!(error, DiscoveryError::UnnamedTool));
    }

    #[test]
    fn non_object_schemas_are_rejected() {
        let error = CatalogSnapshot::from_tools(vec![spec("charge_card", json!("number"))])
            .expect_err("schema must be an object");
        assert!(matches!(error, DiscoveryError::Malformed { .. }));
    }

    #[test]
    fn parse_catalog_requires_a_tools_array() {
        assert!(matches!(
            parse_catalog(json!({})),
            Err(DiscoveryError::Malformed { .. })
        ));
        assert!(matches!(
            parse_catalog(json!({"tools": "nope"})),
            Err(DiscoveryError::Malformed { .. })
        ));
        let tools = parse_catalog(json!({"tools": [
            {"name": "charge_card", "description": "", "inputSchema": {"type": "object"}}
        ]}))
        .expect("valid payload");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "charge_card");
    }

    #[test]
    fn entries_missing_a_name_fail_to_parse() {
        let error = parse_catalog(json!({"tools": [{"description": "nameless"}]}))
            .expect_err("missing name must fail");
        assert!(matches!(error, DiscoveryError::Malformed { .. }));
    }
}
