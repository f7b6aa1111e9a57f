use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::activities::{
    DeleteK8sNodeInput, DeleteNodeInput, DeleteNodeOutput, DeleteNodePoolFromStoreInput,
    DELETE_K8S_NODE, DELETE_NODE, DELETE_NODE_POOL_FROM_STORE,
};
use crate::core::engine::{join_activities, Workflow, WorkflowContext};
use crate::domain::entities::{ClusterId, NodePool, OrganizationId};
use crate::error::Result;

pub const DELETE_NODE_POOL: &str = "delete-node-pool";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteNodePoolInput {
    pub cluster_id: ClusterId,
    pub organization_id: OrganizationId,
    pub cluster_name: String,
    pub config_secret_id: String,
    pub node_pool: NodePool,
}

pub struct DeleteNodePoolWorkflow;

#[async_trait]
impl Workflow for DeleteNodePoolWorkflow {
    type Input = DeleteNodePoolInput;
    type Output = ();

    fn name(&self) -> &'static str {
        DELETE_NODE_POOL
    }

    async fn run(&self, ctx: WorkflowContext, input: DeleteNodePoolInput) -> Result<()> {
        let names = input.node_pool.vm_names(&input.cluster_name);

        let k8s_inputs: Vec<DeleteK8sNodeInput> = names
            .iter()
            .map(|name| DeleteK8sNodeInput {
                organization_id: input.organization_id,
                config_secret_id: input.config_secret_id.clone(),
                name: name.clone(),
            })
            .collect();
        let _: Vec<bool> = join_activities(
            k8s_inputs
                .iter()
                .map(|k8s_input| ctx.execute_activity(DELETE_K8S_NODE, k8s_input)),
        )
        .await?;

        let vm_inputs: Vec<DeleteNodeInput> = names
            .iter()
            .map(|name| DeleteNodeInput { name: name.clone() })
            .collect();
        let deleted: Vec<DeleteNodeOutput> = join_activities(
            vm_inputs
                .iter()
                .map(|vm_input| ctx.execute_activity(DELETE_NODE, vm_input)),
        )
        .await?;

        let _: () = ctx
            .execute_activity(
                DELETE_NODE_POOL_FROM_STORE,
                &DeleteNodePoolFromStoreInput {
                    cluster_id: input.cluster_id,
                    node_pool_name: input.node_pool.name.clone(),
                },
            )
            .await?;

        info!(
            cluster_id = %input.cluster_id,
            node_pool = %input.node_pool.name,
            deleted_vms = deleted.iter().filter(|d| d.existed).count(),
            "Node pool deleted"
        );
        Ok(())
    }
}
