//! Cluster lifecycle workflows.
//!
//! Workflows only sequence activities and child workflows; every side
//! effect, including status updates, goes through an activity.

pub mod create_cluster;
pub mod delete_cluster;
pub mod delete_node_pool;
pub mod setup;
pub mod update_cluster;

use tracing::warn;

pub use create_cluster::{CreateClusterInput, CreateClusterWorkflow, CREATE_CLUSTER, MASTER_READY_SIGNAL};
pub use delete_cluster::{DeleteClusterInput, DeleteClusterWorkflow, DELETE_CLUSTER};
pub use delete_node_pool::{DeleteNodePoolInput, DeleteNodePoolWorkflow, DELETE_NODE_POOL};
pub use setup::{
    DeleteK8sResourcesInput, DeleteK8sResourcesWorkflow, SetupClusterInput, SetupClusterWorkflow,
    DELETE_K8S_RESOURCES, SETUP_CLUSTER,
};
pub use update_cluster::{UpdateClusterInput, UpdateClusterWorkflow, UPDATE_CLUSTER};

use crate::core::activities::{
    ReleaseClusterWorkflowInput, SetClusterStatusInput, RELEASE_CLUSTER_WORKFLOW, SET_CLUSTER_STATUS,
};
use crate::core::engine::{LocalWorkflowEngineBuilder, WorkflowContext};
use crate::domain::entities::{ClusterId, ClusterStatus};
use crate::error::Result;

pub fn register_workflows(builder: LocalWorkflowEngineBuilder) -> LocalWorkflowEngineBuilder {
    builder
        .workflow(CreateClusterWorkflow)
        .workflow(UpdateClusterWorkflow)
        .workflow(DeleteClusterWorkflow)
        .workflow(DeleteNodePoolWorkflow)
        .workflow(SetupClusterWorkflow)
        .workflow(DeleteK8sResourcesWorkflow)
}

async fn set_status(ctx: &WorkflowContext, cluster_id: ClusterId, status: ClusterStatus, message: &str) -> Result<()> {
    ctx.execute_activity(
        SET_CLUSTER_STATUS,
        &SetClusterStatusInput {
            cluster_id,
            status,
            message: message.to_string(),
        },
    )
    .await
}

/// Record a terminal status and free the cluster. Failures are logged:
/// the workflow outcome is already decided.
async fn finish(ctx: &WorkflowContext, cluster_id: ClusterId, status: Option<(ClusterStatus, &str)>) {
    if let Some((status, message)) = status {
        if let Err(err) = set_status(ctx, cluster_id, status, message).await {
            warn!(cluster_id = %cluster_id, error = %err, "Failed to record final cluster status");
        }
    }

    let release: Result<()> = ctx
        .execute_activity(
            RELEASE_CLUSTER_WORKFLOW,
            &ReleaseClusterWorkflowInput {
                cluster_id,
                workflow_id: ctx.workflow_id().to_string(),
            },
        )
        .await;
    if let Err(err) = release {
        warn!(cluster_id = %cluster_id, error = %err, "Failed to release cluster workflow lock");
    }
}
