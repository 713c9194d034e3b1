//! Orchestrator node registry client.
//!
//! The reconciler only needs two operations: list nodes, delete a node by
//! id. Both are behind the [`RegistryClient`] trait so reconciliation logic
//! is testable against an in-memory registry.
//!
//! The HTTP implementation tolerates two API generations: it tries the
//! versioned endpoint path first and falls back to the legacy path on 404,
//! stopping at the first definitive (non-404) response. Node records also
//! come in two schema variants (role nested under `Info.NodeType`, or
//! top-level `Type`), normalized here into one [`NodeRecord`] shape so the
//! rest of the reconciler never sees the drift.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::OrchestratorConfig;
use crate::error::DeployError;

/// Seconds allowed for a single registry API call.
pub const API_TIMEOUT_SECS: u64 = 10;

/// Endpoint paths tried in order for the node collection.
const NODES_PATHS: [&str; 2] = ["api/v1/orchestrator/nodes", "api/v1/nodes"];

/// Connection state the orchestrator reports for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Unknown(String),
}

impl From<&str> for ConnectionState {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "CONNECTED" => Self::Connected,
            "DISCONNECTED" => Self::Disconnected,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Unknown(s) => write!(f, "unknown({s})"),
        }
    }
}

/// Role a node plays in the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeType {
    Compute,
    Requester,
    Unknown(String),
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "COMPUTE" => Self::Compute,
            "REQUESTER" => Self::Requester,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compute => write!(f, "compute"),
            Self::Requester => write!(f, "requester"),
            Self::Unknown(s) => write!(f, "unknown({s})"),
        }
    }
}

/// Canonical node record; the registry owns the authoritative state and
/// each run re-fetches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: String,
    pub connection: ConnectionState,
    pub node_type: NodeType,
}

impl NodeRecord {
    /// Only disconnected compute nodes are safe to prune automatically; a
    /// disconnected requester is left for an operator.
    pub fn is_prunable(&self) -> bool {
        self.connection == ConnectionState::Disconnected && self.node_type == NodeType::Compute
    }
}

/// Read/delete access to the orchestrator's node registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, DeployError>;
    async fn delete_node(&self, node_id: &str) -> Result<(), DeployError>;
}

// ── Wire schema ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiNodeInfo {
    #[serde(rename = "NodeID")]
    node_id: Option<String>,
    #[serde(rename = "NodeType")]
    node_type: Option<String>,
}

/// A node entry as either API generation serializes it.
#[derive(Debug, Deserialize)]
struct ApiNode {
    #[serde(rename = "ID")]
    id: Option<String>,
    #[serde(rename = "Connection")]
    connection: Option<String>,
    #[serde(rename = "Type")]
    node_type: Option<String>,
    #[serde(rename = "Info")]
    info: Option<ApiNodeInfo>,
}

impl ApiNode {
    /// Collapse both schema variants into the canonical record. The nested
    /// `Info.NodeType` wins when both are present.
    fn normalize(self) -> NodeRecord {
        let nested_type = self.info.as_ref().and_then(|i| i.node_type.clone());
        let nested_id = self.info.as_ref().and_then(|i| i.node_id.clone());
        NodeRecord {
            id: self.id.or(nested_id).unwrap_or_default(),
            connection: self
                .connection
                .as_deref()
                .map(ConnectionState::from)
                .unwrap_or(ConnectionState::Unknown(String::new())),
            node_type: nested_type
                .or(self.node_type)
                .as_deref()
                .map(NodeType::from)
                .unwrap_or(NodeType::Unknown(String::new())),
        }
    }
}

/// The list endpoint answers either with a `{"Nodes": [...]}` envelope or
/// a bare array, depending on generation.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeListResponse {
    Wrapped {
        #[serde(rename = "Nodes")]
        nodes: Vec<ApiNode>,
    },
    Bare(Vec<ApiNode>),
}

impl NodeListResponse {
    fn into_nodes(self) -> Vec<ApiNode> {
        match self {
            Self::Wrapped { nodes } => nodes,
            Self::Bare(nodes) => nodes,
        }
    }
}

// ── HTTP implementation ───────────────────────────────────────────────────

/// Direct API client for the orchestrator's node registry.
pub struct HttpRegistryClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(config: &OrchestratorConfig) -> Result<Self, DeployError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .map_err(|e| DeployError::RegistryUnavailable(format!("client setup: {e}")))?;
        Ok(Self {
            base_url: config.base_url(),
            token: config.api_token.clone(),
            client,
        })
    }

    /// Issue `request` against each candidate path until one answers with
    /// something other than 404.
    async fn first_definitive(
        &self,
        method: reqwest::Method,
        suffix: &str,
    ) -> Result<reqwest::Response, DeployError> {
        for (i, path) in NODES_PATHS.iter().enumerate() {
            let url = format!("{}/{path}{suffix}", self.base_url);
            let response = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        DeployError::Timeout {
                            operation: "registry call",
                            seconds: API_TIMEOUT_SECS,
                        }
                    } else {
                        DeployError::RegistryUnavailable(e.to_string())
                    }
                })?;

            if response.status() == reqwest::StatusCode::NOT_FOUND && i + 1 < NODES_PATHS.len() {
                tracing::debug!(%url, "endpoint not found, trying legacy path");
                continue;
            }
            return Ok(response);
        }
        Err(DeployError::RegistryUnavailable(
            "no nodes endpoint answered".into(),
        ))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, DeployError> {
        let response = self.first_definitive(reqwest::Method::GET, "").await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeployError::RegistryUnavailable(format!(
                "node list returned {status}"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| DeployError::RegistryUnavailable(e.to_string()))?;
        let parsed: NodeListResponse = serde_json::from_str(&body)
            .map_err(|e| DeployError::MalformedResponse(e.to_string()))?;
        Ok(parsed
            .into_nodes()
            .into_iter()
            .map(ApiNode::normalize)
            .collect())
    }

    async fn delete_node(&self, node_id: &str) -> Result<(), DeployError> {
        let response = self
            .first_definitive(reqwest::Method::DELETE, &format!("/{node_id}"))
            .await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Already gone; deletion is idempotent.
            tracing::warn!(node_id, "node absent on delete, treating as removed");
            return Ok(());
        }
        if !status.is_success() {
            return Err(DeployError::RegistryUnavailable(format!(
                "node delete returned {status}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_parse_is_case_insensitive() {
        assert_eq!(ConnectionState::from("DISCONNECTED"), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::from("disconnected"), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::from("Connected"), ConnectionState::Connected);
        assert!(matches!(
            ConnectionState::from("HEALTHY"),
            ConnectionState::Unknown(_)
        ));
    }

    #[test]
    fn test_node_type_parse() {
        assert_eq!(NodeType::from("Compute"), NodeType::Compute);
        assert_eq!(NodeType::from("REQUESTER"), NodeType::Requester);
        assert!(matches!(NodeType::from("gateway"), NodeType::Unknown(_)));
    }

    #[test]
    fn test_normalize_nested_schema() {
        let node: ApiNode = serde_json::from_str(
            r#"{"ID": "n1", "Connection": "DISCONNECTED", "Info": {"NodeType": "Compute"}}"#,
        )
        .unwrap();
        let record = node.normalize();
        assert_eq!(record.id, "n1");
        assert_eq!(record.connection, ConnectionState::Disconnected);
        assert_eq!(record.node_type, NodeType::Compute);
        assert!(record.is_prunable());
    }

    #[test]
    fn test_normalize_flat_schema() {
        let node: ApiNode = serde_json::from_str(
            r#"{"ID": "n2", "Connection": "CONNECTED", "Type": "Requester"}"#,
        )
        .unwrap();
        let record = node.normalize();
        assert_eq!(record.node_type, NodeType::Requester);
        assert!(!record.is_prunable());
    }

    #[test]
    fn test_normalize_prefers_nested_type() {
        let node: ApiNode = serde_json::from_str(
            r#"{"ID": "n3", "Connection": "DISCONNECTED", "Type": "Requester",
                "Info": {"NodeType": "Compute"}}"#,
        )
        .unwrap();
        assert_eq!(node.normalize().node_type, NodeType::Compute);
    }

    #[test]
    fn test_normalize_id_from_info() {
        let node: ApiNode = serde_json::from_str(
            r#"{"Connection": "DISCONNECTED", "Info": {"NodeID": "n4", "NodeType": "Compute"}}"#,
        )
        .unwrap();
        assert_eq!(node.normalize().id, "n4");
    }

    #[test]
    fn test_list_response_envelope_and_bare() {
        let wrapped: NodeListResponse =
            serde_json::from_str(r#"{"Nodes": [{"ID": "n1"}]}"#).unwrap();
        assert_eq!(wrapped.into_nodes().len(), 1);

        let bare: NodeListResponse = serde_json::from_str(r#"[{"ID": "n1"}, {"ID": "n2"}]"#).unwrap();
        assert_eq!(bare.into_nodes().len(), 2);
    }

    #[test]
    fn test_malformed_list_fails_to_parse() {
        assert!(serde_json::from_str::<NodeListResponse>(r#"{"Nodes": 42}"#).is_err());
        assert!(serde_json::from_str::<NodeListResponse>("not json").is_err());
    }

    #[test]
    fn test_disconnected_requester_not_prunable() {
        let record = NodeRecord {
            id: "n5".into(),
            connection: ConnectionState::Disconnected,
            node_type: NodeType::Requester,
        };
        assert!(!record.is_prunable());
    }
}
