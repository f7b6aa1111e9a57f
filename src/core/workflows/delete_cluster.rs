use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{info, warn};

use super::{finish, DeleteK8sResourcesInput, DELETE_K8S_RESOURCES};
use crate::core::activities::{
    ClusterSecretsInput, DeleteClusterFromStoreInput, DeleteNodeInput, DeleteNodeOutput,
    DELETE_CLUSTER_FROM_STORE, DELETE_NODE, DELETE_OIDC_CLIENT, DELETE_UNUSED_SECRETS,
};
use crate::core::engine::{join_activities, Workflow, WorkflowContext};
use crate::core::traits::KubeConfigRef;
use crate::domain::entities::{ClusterId, ClusterStatus, NodePool, OrganizationId};
use crate::error::Result;

pub const DELETE_CLUSTER: &str = "delete-cluster";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteClusterInput {
    pub cluster_id: ClusterId,
    pub cluster_uid: String,
    pub organization_id: OrganizationId,
    pub cluster_name: String,
    pub config_secret_id: String,
    pub oidc_enabled: bool,
    pub node_pools: Vec<NodePool>,
    /// Log and continue past failing steps instead of aborting
    pub forced: bool,
}

pub struct DeleteClusterWorkflow;

impl DeleteClusterWorkflow {
    /// Run one step under the failure policy of the deletion
    async fn step<T, F>(&self, input: &DeleteClusterInput, step: &str, future: F) -> Result<Option<T>>
    where
        F: Future<Output = Result<T>>,
    {
        match future.await {
            Ok(value) => Ok(Some(value)),
            Err(err) if input.forced => {
                warn!(
                    cluster_id = %input.cluster_id,
                    step = step,
                    error = %err,
                    "Deletion step failed, continuing because deletion is forced"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn delete(&self, ctx: &WorkflowContext, input: &DeleteClusterInput) -> Result<()> {
        if !input.config_secret_id.is_empty() {
            let resources = DeleteK8sResourcesInput {
                kubeconfig: KubeConfigRef {
                    organization_id: input.organization_id,
                    secret_id: input.config_secret_id.clone(),
                },
            };
            self.step::<(), _>(
                input,
                DELETE_K8S_RESOURCES,
                ctx.execute_child_workflow(DELETE_K8S_RESOURCES, &resources),
            )
            .await?;
        }

        let (masters, workers): (Vec<&NodePool>, Vec<&NodePool>) =
            input.node_pools.iter().partition(|pool| pool.is_master());

        for name in workers.iter().flat_map(|pool| pool.vm_names(&input.cluster_name)) {
            let node = DeleteNodeInput { name: name.clone() };
            self.step::<DeleteNodeOutput, _>(input, DELETE_NODE, ctx.execute_activity(DELETE_NODE, &node))
                .await?;
        }

        let master_nodes: Vec<DeleteNodeInput> = masters
            .iter()
            .flat_map(|pool| pool.vm_names(&input.cluster_name))
            .map(|name| DeleteNodeInput { name })
            .collect();
        self.step::<Vec<DeleteNodeOutput>, _>(
            input,
            DELETE_NODE,
            join_activities(
                master_nodes
                    .iter()
                    .map(|node| ctx.execute_activity(DELETE_NODE, node)),
            ),
        )
        .await?;

        let secrets = ClusterSecretsInput {
            organization_id: input.organization_id,
            cluster_uid: input.cluster_uid.clone(),
        };
        // Best effort regardless of the failure policy
        let cleanup: Result<u32> = ctx.execute_activity(DELETE_UNUSED_SECRETS, &secrets).await;
        if let Err(err) = cleanup {
            warn!(cluster_id = %input.cluster_id, error = %err, "Failed to clean up cluster secrets");
        }

        if input.oidc_enabled {
            self.step::<(), _>(
                input,
                DELETE_OIDC_CLIENT,
                ctx.execute_activity(DELETE_OIDC_CLIENT, &secrets),
            )
            .await?;
        }

        let _: () = ctx
            .execute_activity(
                DELETE_CLUSTER_FROM_STORE,
                &DeleteClusterFromStoreInput {
                    cluster_id: input.cluster_id,
                },
            )
            .await?;

        info!(cluster_id = %input.cluster_id, cluster_name = %input.cluster_name, forced = input.forced, "Cluster deleted");
        Ok(())
    }
}

#[async_trait]
impl Workflow for DeleteClusterWorkflow {
    type Input = DeleteClusterInput;
    type Output = ();

    fn name(&self) -> &'static str {
        DELETE_CLUSTER
    }

    async fn run(&self, ctx: WorkflowContext, input: DeleteClusterInput) -> Result<()> {
        let result = self.delete(&ctx, &input).await;
        if let Err(err) = &result {
            let message = err.root_message();
            finish(&ctx, input.cluster_id, Some((ClusterStatus::Error, &message))).await;
        }
        result
    }
}
