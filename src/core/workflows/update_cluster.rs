use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{finish, DeleteNodePoolInput, DELETE_NODE_POOL};
use crate::core::activities::{
    ApplyNodePoolLabelsInput, CreateNodeInput, CreateNodeOutput, DeleteK8sNodeInput, DeleteNodeInput,
    DeleteNodeOutput, GetProxySettingsInput, GetPublicAddressInput, APPLY_NODE_POOL_LABELS,
    CREATE_NODE, DELETE_K8S_NODE, DELETE_NODE, GET_PROXY_SETTINGS, GET_PUBLIC_ADDRESS,
};
use crate::core::engine::{join_activities, Workflow, WorkflowContext};
use crate::core::node_template::{NodeSpec, ResolvedProxy};
use crate::domain::entities::{ClusterId, ClusterStatus, HttpProxy, NodePool, OrganizationId, Placement};
use crate::error::{AppError, Result};

pub const UPDATE_CLUSTER: &str = "update-cluster";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateClusterInput {
    pub cluster_id: ClusterId,
    pub organization_id: OrganizationId,
    pub cluster_name: String,
    pub config_secret_id: String,
    pub http_proxy: HttpProxy,
    pub placement: Placement,
    /// VM whose address workers join
    pub master_vm_name: Option<String>,
    /// Pools kept by the update, with their new sizes
    pub node_pools: Vec<NodePool>,
    pub nodes_to_create: Vec<NodeSpec>,
    /// VM names shed by shrunk pools
    pub nodes_to_delete: Vec<String>,
    pub node_pools_to_delete: Vec<NodePool>,
}

/// How far an update got before failing
enum UpdateFailure {
    /// Nothing changed on the cluster yet, or node creation failed
    BeforeCreation(AppError),
    /// New nodes exist, cleanup of old ones failed
    AfterCreation(AppError),
}

pub struct UpdateClusterWorkflow;

impl UpdateClusterWorkflow {
    async fn create_nodes(&self, ctx: &WorkflowContext, input: &UpdateClusterInput) -> Result<()> {
        let proxy: ResolvedProxy = ctx
            .execute_activity(
                GET_PROXY_SETTINGS,
                &GetProxySettingsInput {
                    organization_id: input.organization_id,
                    http_proxy: input.http_proxy.clone(),
                },
            )
            .await?;

        let master_address = if input.nodes_to_create.iter().any(|node| !node.is_master()) {
            let master = input.master_vm_name.clone().ok_or_else(|| {
                AppError::validation("cluster has no master node to join new workers to")
            })?;
            let address: String = ctx
                .execute_activity(GET_PUBLIC_ADDRESS, &GetPublicAddressInput { name: master })
                .await?;
            Some(address)
        } else {
            None
        };

        let _: u32 = ctx
            .execute_activity(
                APPLY_NODE_POOL_LABELS,
                &ApplyNodePoolLabelsInput {
                    organization_id: input.organization_id,
                    config_secret_id: input.config_secret_id.clone(),
                    cluster_name: input.cluster_name.clone(),
                    node_pools: input.node_pools.clone(),
                },
            )
            .await?;

        let node_inputs: Vec<CreateNodeInput> = input
            .nodes_to_create
            .iter()
            .map(|node| {
                let mut node = node.clone();
                node.set_proxy(&proxy);
                if let Some(address) = &master_address {
                    node.set_master_address(address);
                }
                CreateNodeInput {
                    cluster_id: input.cluster_id,
                    cluster_name: input.cluster_name.clone(),
                    folder: input.placement.folder.clone(),
                    resource_pool: input.placement.resource_pool.clone(),
                    datastore: input.placement.datastore.clone(),
                    node,
                }
            })
            .collect();

        let created: Vec<CreateNodeOutput> = join_activities(
            node_inputs
                .iter()
                .map(|node_input| ctx.execute_activity(CREATE_NODE, node_input)),
        )
        .await?;

        if !created.is_empty() {
            info!(cluster_id = %input.cluster_id, nodes = created.len(), "New nodes created");
        }
        Ok(())
    }

    async fn remove_nodes(&self, ctx: &WorkflowContext, input: &UpdateClusterInput) -> Result<()> {
        let k8s_inputs: Vec<DeleteK8sNodeInput> = input
            .nodes_to_delete
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

        let vm_inputs: Vec<DeleteNodeInput> = input
            .nodes_to_delete
            .iter()
            .map(|name| DeleteNodeInput { name: name.clone() })
            .collect();
        let _: Vec<DeleteNodeOutput> = join_activities(
            vm_inputs
                .iter()
                .map(|vm_input| ctx.execute_activity(DELETE_NODE, vm_input)),
        )
        .await?;

        let pool_inputs: Vec<DeleteNodePoolInput> = input
            .node_pools_to_delete
            .iter()
            .map(|pool| DeleteNodePoolInput {
                cluster_id: input.cluster_id,
                organization_id: input.organization_id,
                cluster_name: input.cluster_name.clone(),
                config_secret_id: input.config_secret_id.clone(),
                node_pool: pool.clone(),
            })
            .collect();
        let _: Vec<()> = join_activities(
            pool_inputs
                .iter()
                .map(|pool_input| ctx.execute_child_workflow(DELETE_NODE_POOL, pool_input)),
        )
        .await?;

        Ok(())
    }

    async fn update(&self, ctx: &WorkflowContext, input: &UpdateClusterInput) -> std::result::Result<(), UpdateFailure> {
        self.create_nodes(ctx, input)
            .await
            .map_err(UpdateFailure::BeforeCreation)?;
        self.remove_nodes(ctx, input)
            .await
            .map_err(UpdateFailure::AfterCreation)?;
        Ok(())
    }
}

#[async_trait]
impl Workflow for UpdateClusterWorkflow {
    type Input = UpdateClusterInput;
    type Output = ();

    fn name(&self) -> &'static str {
        UPDATE_CLUSTER
    }

    async fn run(&self, ctx: WorkflowContext, input: UpdateClusterInput) -> Result<()> {
        match self.update(&ctx, &input).await {
            Ok(()) => {
                finish(&ctx, input.cluster_id, Some((ClusterStatus::Running, "Cluster updated"))).await;
                Ok(())
            }
            Err(UpdateFailure::BeforeCreation(err)) => {
                let message = err.root_message();
                finish(&ctx, input.cluster_id, Some((ClusterStatus::Error, &message))).await;
                Err(err)
            }
            Err(UpdateFailure::AfterCreation(err)) => {
                let message = err.root_message();
                finish(&ctx, input.cluster_id, Some((ClusterStatus::Warning, &message))).await;
                Err(err)
            }
        }
    }
}
