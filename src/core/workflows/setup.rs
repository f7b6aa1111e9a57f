//! Child workflows run against the Kubernetes API of a managed cluster.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::activities::{
    ApplyNodePoolLabelsInput, ConfigureRbacInput, KubeConfigInput, APPLY_NODE_POOL_LABELS,
    CONFIGURE_RBAC, DELETE_HELM_RELEASES, DELETE_USER_NAMESPACES, ENSURE_SYSTEM_NAMESPACE,
};
use crate::core::engine::{Workflow, WorkflowContext};
use crate::core::traits::KubeConfigRef;
use crate::domain::entities::NodePool;
use crate::error::Result;

pub const SETUP_CLUSTER: &str = "setup-cluster";
pub const DELETE_K8S_RESOURCES: &str = "delete-k8s-resources";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupClusterInput {
    pub kubeconfig: KubeConfigRef,
    pub cluster_name: String,
    pub rbac_enabled: bool,
    pub admin_user: String,
    pub node_pools: Vec<NodePool>,
}

/// Bootstraps a freshly created cluster
pub struct SetupClusterWorkflow;

#[async_trait]
impl Workflow for SetupClusterWorkflow {
    type Input = SetupClusterInput;
    type Output = ();

    fn name(&self) -> &'static str {
        SETUP_CLUSTER
    }

    async fn run(&self, ctx: WorkflowContext, input: SetupClusterInput) -> Result<()> {
        let kubeconfig = KubeConfigInput {
            kubeconfig: input.kubeconfig.clone(),
        };

        let _: () = ctx
            .execute_activity(ENSURE_SYSTEM_NAMESPACE, &kubeconfig)
            .await?;

        let _: () = ctx
            .execute_activity(
                CONFIGURE_RBAC,
                &ConfigureRbacInput {
                    kubeconfig: input.kubeconfig.clone(),
                    rbac_enabled: input.rbac_enabled,
                    admin_user: input.admin_user.clone(),
                },
            )
            .await?;

        let labeled: u32 = ctx
            .execute_activity(
                APPLY_NODE_POOL_LABELS,
                &ApplyNodePoolLabelsInput {
                    organization_id: input.kubeconfig.organization_id,
                    config_secret_id: input.kubeconfig.secret_id.clone(),
                    cluster_name: input.cluster_name.clone(),
                    node_pools: input.node_pools,
                },
            )
            .await?;

        info!(cluster_name = %input.cluster_name, labeled_nodes = labeled, "Cluster bootstrap finished");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteK8sResourcesInput {
    pub kubeconfig: KubeConfigRef,
}

/// Removes everything deployed into a cluster before its nodes go away
pub struct DeleteK8sResourcesWorkflow;

#[async_trait]
impl Workflow for DeleteK8sResourcesWorkflow {
    type Input = DeleteK8sResourcesInput;
    type Output = ();

    fn name(&self) -> &'static str {
        DELETE_K8S_RESOURCES
    }

    async fn run(&self, ctx: WorkflowContext, input: DeleteK8sResourcesInput) -> Result<()> {
        let kubeconfig = KubeConfigInput {
            kubeconfig: input.kubeconfig,
        };

        let releases: u32 = ctx
            .execute_activity(DELETE_HELM_RELEASES, &kubeconfig)
            .await?;
        let namespaces: Vec<String> = ctx
            .execute_activity(DELETE_USER_NAMESPACES, &kubeconfig)
            .await?;

        info!(
            releases = releases,
            namespaces = namespaces.len(),
            "Kubernetes resources deleted"
        );
        Ok(())
    }
}
