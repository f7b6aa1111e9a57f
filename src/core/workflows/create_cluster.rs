use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::{finish, set_status, SetupClusterInput, SETUP_CLUSTER};
use crate::core::activities::{
    ClusterSecretsInput, CreateNodeInput, CreateNodeOutput, DownloadKubeConfigInput, CREATE_NODE,
    DOWNLOAD_KUBECONFIG, GENERATE_CERTIFICATES,
};
use crate::core::engine::{join_activities, Workflow, WorkflowContext};
use crate::core::node_template::NodeSpec;
use crate::core::traits::KubeConfigRef;
use crate::domain::entities::{
    ClusterId, ClusterStatus, KubernetesSettings, NodePool, OrganizationId, Placement, UserId,
    WAITING_FOR_MASTER_MESSAGE,
};
use crate::error::{AppError, Result};

pub const CREATE_CLUSTER: &str = "create-cluster";

/// Signal delivered once the first master has bootstrapped
pub const MASTER_READY_SIGNAL: &str = "master-ready";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterInput {
    pub cluster_id: ClusterId,
    pub cluster_uid: String,
    pub organization_id: OrganizationId,
    pub cluster_name: String,
    pub created_by: UserId,
    pub kubernetes: KubernetesSettings,
    pub placement: Placement,
    pub node_pools: Vec<NodePool>,
    pub nodes: Vec<NodeSpec>,
    pub master_ready_timeout: Duration,
}

pub struct CreateClusterWorkflow;

impl CreateClusterWorkflow {
    async fn provision(&self, ctx: &WorkflowContext, input: &CreateClusterInput) -> Result<()> {
        let _: String = ctx
            .execute_activity(
                GENERATE_CERTIFICATES,
                &ClusterSecretsInput {
                    organization_id: input.organization_id,
                    cluster_uid: input.cluster_uid.clone(),
                },
            )
            .await?;

        let node_inputs: Vec<CreateNodeInput> = input
            .nodes
            .iter()
            .map(|node| CreateNodeInput {
                cluster_id: input.cluster_id,
                cluster_name: input.cluster_name.clone(),
                folder: input.placement.folder.clone(),
                resource_pool: input.placement.resource_pool.clone(),
                datastore: input.placement.datastore.clone(),
                node: node.clone(),
            })
            .collect();
        let created: Vec<CreateNodeOutput> = join_activities(
            node_inputs
                .iter()
                .map(|node_input| ctx.execute_activity(CREATE_NODE, node_input)),
        )
        .await?;
        info!(cluster_id = %input.cluster_id, nodes = created.len(), "Cluster nodes created");

        set_status(ctx, input.cluster_id, ClusterStatus::Creating, WAITING_FOR_MASTER_MESSAGE).await?;

        let ready: Option<serde_json::Value> = ctx
            .receive_signal(MASTER_READY_SIGNAL, input.master_ready_timeout)
            .await?;
        if ready.is_none() {
            return Err(AppError::Timeout(format!(
                "Kubernetes master did not report ready within {:?}",
                input.master_ready_timeout
            )));
        }

        let config_secret_id: String = ctx
            .execute_activity(
                DOWNLOAD_KUBECONFIG,
                &DownloadKubeConfigInput {
                    cluster_id: input.cluster_id,
                    organization_id: input.organization_id,
                    cluster_uid: input.cluster_uid.clone(),
                },
            )
            .await?;

        let _: () = ctx
            .execute_child_workflow(
                SETUP_CLUSTER,
                &SetupClusterInput {
                    kubeconfig: KubeConfigRef {
                        organization_id: input.organization_id,
                        secret_id: config_secret_id,
                    },
                    cluster_name: input.cluster_name.clone(),
                    rbac_enabled: input.kubernetes.rbac_enabled,
                    admin_user: format!("user-{}", input.created_by),
                    node_pools: input.node_pools.clone(),
                },
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl Workflow for CreateClusterWorkflow {
    type Input = CreateClusterInput;
    type Output = ();

    fn name(&self) -> &'static str {
        CREATE_CLUSTER
    }

    async fn run(&self, ctx: WorkflowContext, input: CreateClusterInput) -> Result<()> {
        let result = self.provision(&ctx, &input).await;

        match &result {
            Ok(()) => {
                finish(&ctx, input.cluster_id, Some((ClusterStatus::Running, "Cluster created"))).await;
            }
            Err(err) => {
                let message = err.root_message();
                finish(&ctx, input.cluster_id, Some((ClusterStatus::Error, &message))).await;
            }
        }
        result
    }
}
