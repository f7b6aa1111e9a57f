//! Activities of the cluster lifecycle workflows
//!
//! Each activity is a minimal unit of external work, safe to retry.

pub mod cluster;
pub mod kubernetes;
pub mod node;

use std::sync::Arc;

pub use cluster::*;
pub use kubernetes::*;
pub use node::*;

use crate::core::engine::LocalWorkflowEngineBuilder;
use crate::core::traits::{ChartDeployer, KubernetesApi, OidcClientManager, SecretStore, VirtualizationBackend};
use crate::domain::repositories::ClusterStore;

/// External collaborators the activities drive
#[derive(Clone)]
pub struct ActivityDependencies {
    pub store: Arc<dyn ClusterStore>,
    pub virtualization: Arc<dyn VirtualizationBackend>,
    pub kubernetes: Arc<dyn KubernetesApi>,
    pub secrets: Arc<dyn SecretStore>,
    pub charts: Arc<dyn ChartDeployer>,
    pub oidc: Arc<dyn OidcClientManager>,
}

pub fn register_activities(builder: LocalWorkflowEngineBuilder, deps: &ActivityDependencies) -> LocalWorkflowEngineBuilder {
    builder
        .activity(CreateNodeActivity::new(deps.virtualization.clone()))
        .activity(DeleteNodeActivity::new(deps.virtualization.clone()))
        .activity(GetPublicAddressActivity::new(deps.virtualization.clone()))
        .activity(DeleteK8sNodeActivity::new(deps.kubernetes.clone()))
        .activity(ApplyNodePoolLabelsActivity::new(deps.kubernetes.clone()))
        .activity(EnsureSystemNamespaceActivity::new(deps.kubernetes.clone()))
        .activity(ConfigureRbacActivity::new(deps.kubernetes.clone()))
        .activity(DeleteUserNamespacesActivity::new(deps.kubernetes.clone()))
        .activity(DeleteHelmReleasesActivity::new(deps.charts.clone()))
        .activity(SetClusterStatusActivity::new(deps.store.clone()))
        .activity(ReleaseClusterWorkflowActivity::new(deps.store.clone()))
        .activity(DeleteNodePoolFromStoreActivity::new(deps.store.clone()))
        .activity(DeleteClusterFromStoreActivity::new(deps.store.clone()))
        .activity(DownloadKubeConfigActivity::new(deps.store.clone(), deps.secrets.clone()))
        .activity(GetProxySettingsActivity::new(deps.secrets.clone()))
        .activity(GenerateCertificatesActivity::new(deps.secrets.clone()))
        .activity(DeleteUnusedSecretsActivity::new(deps.secrets.clone()))
        .activity(DeleteOidcClientActivity::new(deps.oidc.clone()))
}
