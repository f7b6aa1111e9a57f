use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::engine::Activity;
use crate::core::preparer::node_pool_labels;
use crate::core::traits::{ChartDeployer, KubeConfigRef, KubernetesApi};
use crate::domain::entities::{NodePool, OrganizationId};
use crate::error::{AppError, Result};

pub const DELETE_K8S_NODE: &str = "delete-k8s-node";
pub const APPLY_NODE_POOL_LABELS: &str = "apply-node-pool-labels";
pub const ENSURE_SYSTEM_NAMESPACE: &str = "ensure-system-namespace";
pub const CONFIGURE_RBAC: &str = "configure-rbac";
pub const DELETE_HELM_RELEASES: &str = "delete-helm-releases";
pub const DELETE_USER_NAMESPACES: &str = "delete-user-namespaces";

pub const SYSTEM_NAMESPACE: &str = "vmkube-system";

const PROTECTED_NAMESPACES: [&str; 4] = ["default", "kube-system", "kube-public", "kube-node-lease"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteK8sNodeInput {
    pub organization_id: OrganizationId,
    /// Empty while the cluster has no kubeconfig yet
    pub config_secret_id: String,
    pub name: String,
}

pub struct DeleteK8sNodeActivity {
    kubernetes: Arc<dyn KubernetesApi>,
}

impl DeleteK8sNodeActivity {
    pub fn new(kubernetes: Arc<dyn KubernetesApi>) -> Self {
        Self { kubernetes }
    }
}

#[async_trait]
impl Activity for DeleteK8sNodeActivity {
    type Input = DeleteK8sNodeInput;
    /// Whether a node object was deleted
    type Output = bool;

    fn name(&self) -> &'static str {
        DELETE_K8S_NODE
    }

    async fn execute(&self, input: DeleteK8sNodeInput) -> Result<bool> {
        if input.config_secret_id.is_empty() {
            debug!(node = %input.name, "Cluster has no kubeconfig, nothing to delete");
            return Ok(false);
        }
        let kubeconfig = KubeConfigRef {
            organization_id: input.organization_id,
            secret_id: input.config_secret_id,
        };

        match self.kubernetes.get_node(&kubeconfig, &input.name).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                debug!(node = %input.name, "Kubernetes node already absent");
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        match self.kubernetes.delete_node(&kubeconfig, &input.name).await {
            Ok(()) => {
                info!(node = %input.name, "Kubernetes node deleted");
                Ok(true)
            }
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyNodePoolLabelsInput {
    pub organization_id: OrganizationId,
    pub config_secret_id: String,
    pub cluster_name: String,
    pub node_pools: Vec<NodePool>,
}

pub struct ApplyNodePoolLabelsActivity {
    kubernetes: Arc<dyn KubernetesApi>,
}

impl ApplyNodePoolLabelsActivity {
    pub fn new(kubernetes: Arc<dyn KubernetesApi>) -> Self {
        Self { kubernetes }
    }
}

#[async_trait]
impl Activity for ApplyNodePoolLabelsActivity {
    type Input = ApplyNodePoolLabelsInput;
    /// Number of nodes labeled
    type Output = u32;

    fn name(&self) -> &'static str {
        APPLY_NODE_POOL_LABELS
    }

    async fn execute(&self, input: ApplyNodePoolLabelsInput) -> Result<u32> {
        if input.config_secret_id.is_empty() {
            return Ok(0);
        }
        let kubeconfig = KubeConfigRef {
            organization_id: input.organization_id,
            secret_id: input.config_secret_id,
        };

        let mut labeled = 0;
        for pool in &input.node_pools {
            let labels = node_pool_labels(pool);
            for node in pool.vm_names(&input.cluster_name) {
                match self.kubernetes.label_node(&kubeconfig, &node, &labels).await {
                    Ok(()) => labeled += 1,
                    // Not joined yet; the bootstrap script applies the labels
                    Err(err) if err.is_not_found() => debug!(node = %node, "Node not registered yet"),
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(labeled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeConfigInput {
    pub kubeconfig: KubeConfigRef,
}

pub struct EnsureSystemNamespaceActivity {
    kubernetes: Arc<dyn KubernetesApi>,
}

impl EnsureSystemNamespaceActivity {
    pub fn new(kubernetes: Arc<dyn KubernetesApi>) -> Self {
        Self { kubernetes }
    }
}

#[async_trait]
impl Activity for EnsureSystemNamespaceActivity {
    type Input = KubeConfigInput;
    type Output = ();

    fn name(&self) -> &'static str {
        ENSURE_SYSTEM_NAMESPACE
    }

    async fn execute(&self, input: KubeConfigInput) -> Result<()> {
        self.kubernetes
            .ensure_namespace(&input.kubeconfig, SYSTEM_NAMESPACE)
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureRbacInput {
    pub kubeconfig: KubeConfigRef,
    pub rbac_enabled: bool,
    /// User bound to cluster-admin
    pub admin_user: String,
}

pub struct ConfigureRbacActivity {
    kubernetes: Arc<dyn KubernetesApi>,
}

impl ConfigureRbacActivity {
    pub fn new(kubernetes: Arc<dyn KubernetesApi>) -> Self {
        Self { kubernetes }
    }
}

#[async_trait]
impl Activity for ConfigureRbacActivity {
    type Input = ConfigureRbacInput;
    type Output = ();

    fn name(&self) -> &'static str {
        CONFIGURE_RBAC
    }

    async fn execute(&self, input: ConfigureRbacInput) -> Result<()> {
        if !input.rbac_enabled {
            return Ok(());
        }
        self.kubernetes
            .ensure_cluster_admin_binding(&input.kubeconfig, &input.admin_user)
            .await
    }
}

pub struct DeleteHelmReleasesActivity {
    charts: Arc<dyn ChartDeployer>,
}

impl DeleteHelmReleasesActivity {
    pub fn new(charts: Arc<dyn ChartDeployer>) -> Self {
        Self { charts }
    }
}

#[async_trait]
impl Activity for DeleteHelmReleasesActivity {
    type Input = KubeConfigInput;
    type Output = u32;

    fn name(&self) -> &'static str {
        DELETE_HELM_RELEASES
    }

    async fn execute(&self, input: KubeConfigInput) -> Result<u32> {
        let releases = self.charts.list_releases(&input.kubeconfig).await?;
        let mut deleted = 0;
        let mut errors = Vec::new();

        for release in &releases {
            match self.charts.delete_release(&input.kubeconfig, release).await {
                Ok(()) => deleted += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!(release = %release.name, namespace = %release.namespace, error = %err, "Failed to delete release");
                    errors.push(err);
                }
            }
        }

        match AppError::combine(errors) {
            Some(err) => Err(err),
            None => Ok(deleted),
        }
    }
}

pub struct DeleteUserNamespacesActivity {
    kubernetes: Arc<dyn KubernetesApi>,
}

impl DeleteUserNamespacesActivity {
    pub fn new(kubernetes: Arc<dyn KubernetesApi>) -> Self {
        Self { kubernetes }
    }
}

#[async_trait]
impl Activity for DeleteUserNamespacesActivity {
    type Input = KubeConfigInput;
    type Output = Vec<String>;

    fn name(&self) -> &'static str {
        DELETE_USER_NAMESPACES
    }

    async fn execute(&self, input: KubeConfigInput) -> Result<Vec<String>> {
        let namespaces = self.kubernetes.list_namespaces(&input.kubeconfig).await?;
        let mut deleted = Vec::new();
        let mut errors = Vec::new();

        for namespace in namespaces
            .into_iter()
            .filter(|ns| !PROTECTED_NAMESPACES.contains(&ns.as_str()))
        {
            match self.kubernetes.delete_namespace(&input.kubeconfig, &namespace).await {
                Ok(()) => deleted.push(namespace),
                Err(err) if err.is_not_found() => {}
                Err(err) => errors.push(err),
            }
        }

        match AppError::combine(errors) {
            Some(err) => Err(err),
            None => Ok(deleted),
        }
    }
}
