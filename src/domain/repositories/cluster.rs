//! Cluster store interface
//!
//! The store is the single source of truth for cluster and node pool state.
//! Every implementation reports a missing row as [`AppError::NotFound`] so
//! callers can branch on `is_not_found()` instead of inspecting messages.
//!
//! [`AppError::NotFound`]: crate::error::AppError::NotFound

use async_trait::async_trait;

use crate::domain::entities::{
    Cluster, ClusterId, ClusterStatus, NodePool, OrganizationId, StatusHistoryRecord,
};
use crate::error::Result;

#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Persist a new cluster together with its node pools
    async fn create(&self, cluster: &Cluster) -> Result<()>;

    /// Add a node pool; fails with a conflict when the name is taken
    async fn create_node_pool(&self, cluster_id: ClusterId, node_pool: &NodePool) -> Result<()>;

    /// Remove the cluster record
    async fn delete(&self, cluster_id: ClusterId) -> Result<()>;

    /// Remove one node pool row
    async fn delete_node_pool(&self, cluster_id: ClusterId, node_pool_name: &str) -> Result<()>;

    async fn update_node_pool_size(
        &self,
        cluster_id: ClusterId,
        node_pool_name: &str,
        size: u32,
    ) -> Result<()>;

    async fn get_by_id(&self, cluster_id: ClusterId) -> Result<Cluster>;

    async fn get_by_name(&self, organization_id: OrganizationId, name: &str) -> Result<Cluster>;

    /// Record a status transition.
    ///
    /// Only persists, and only appends to the status history, when the
    /// (status, message) pair differs from the stored one.
    async fn set_status(
        &self,
        cluster_id: ClusterId,
        status: ClusterStatus,
        message: &str,
    ) -> Result<()>;

    /// Unconditionally overwrite the active workflow id
    async fn set_active_workflow_id(&self, cluster_id: ClusterId, workflow_id: &str) -> Result<()>;

    /// Compare-and-swap the active workflow id from empty to `workflow_id`.
    ///
    /// Fails with a conflict when another workflow holds the cluster.
    async fn try_acquire_workflow(&self, cluster_id: ClusterId, workflow_id: &str) -> Result<()>;

    /// Clear the active workflow id if it is still held by `workflow_id`
    async fn release_workflow(&self, cluster_id: ClusterId, workflow_id: &str) -> Result<()>;

    async fn set_config_secret_id(&self, cluster_id: ClusterId, secret_id: &str) -> Result<()>;

    async fn set_ssh_secret_id(&self, cluster_id: ClusterId, secret_id: &str) -> Result<()>;

    /// Status transitions of a cluster, oldest first
    async fn status_history(&self, cluster_id: ClusterId) -> Result<Vec<StatusHistoryRecord>>;
}
