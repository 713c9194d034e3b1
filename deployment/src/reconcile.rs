//! Node reconciliation against the orchestrator registry.
//!
//! Instances torn down without a graceful unregister leave stale node
//! records behind. Each reconciliation run re-fetches the node list (no
//! state is cached across runs), prunes the disconnected compute nodes,
//! and reports how many deletions succeeded and failed. One node's
//! deletion failure never stops the rest; idempotent re-invocation closes
//! any remaining gap.

use crate::error::DeployError;
use crate::registry::{NodeRecord, RegistryClient};

/// Counters for one reconciliation run; not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub deleted: usize,
    pub failed: usize,
}

/// Prunes stale node records from the orchestrator registry.
pub struct NodeReconciler<C> {
    client: C,
}

impl<C: RegistryClient> NodeReconciler<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Current node collection, for operator inspection.
    pub async fn list_nodes(&self) -> Result<Vec<NodeRecord>, DeployError> {
        self.client.list_nodes().await
    }

    /// Delete every node that is both disconnected and a compute node.
    ///
    /// Zero matches is a normal, successful outcome. Individual deletion
    /// failures are counted, logged, and do not abort the run.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, DeployError> {
        let nodes = self.client.list_nodes().await?;
        let stale: Vec<&NodeRecord> = nodes
            .iter()
            .filter(|n| n.is_prunable() && !n.id.is_empty())
            .collect();

        if stale.is_empty() {
            tracing::info!(total = nodes.len(), "no disconnected compute nodes to prune");
            return Ok(ReconcileOutcome::default());
        }

        let mut outcome = ReconcileOutcome::default();
        for node in stale {
            match self.client.delete_node(&node.id).await {
                Ok(()) => {
                    tracing::info!(node_id = %node.id, "deleted stale node");
                    outcome.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(node_id = %node.id, error = %e, "node deletion failed");
                    outcome.failed += 1;
                }
            }
        }

        tracing::info!(
            deleted = outcome.deleted,
            failed = outcome.failed,
            "reconciliation complete"
        );
        Ok(outcome)
    }

    /// Delete the first node whose identifier contains `instance_id`.
    ///
    /// Used for single-instance teardown; connection state is ignored
    /// because the instance is being destroyed either way. No matching
    /// node is success; it may never have registered.
    pub async fn remove_node_for_instance(&self, instance_id: &str) -> Result<(), DeployError> {
        let nodes = self.client.list_nodes().await?;
        match nodes.iter().find(|n| n.id.contains(instance_id)) {
            Some(node) => {
                self.client.delete_node(&node.id).await?;
                tracing::info!(node_id = %node.id, instance_id, "removed node for instance");
                Ok(())
            }
            None => {
                tracing::info!(instance_id, "no node registered for instance");
                Ok(())
            }
        }
    }
}
