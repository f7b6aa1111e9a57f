//! Activities persisting cluster state and handling cluster credentials.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::engine::{Activity, ActivityOptions, RetryPolicy};
use crate::core::node_template::{resolve_proxy, ResolvedProxy};
use crate::core::traits::{cluster_secret_tag, NewSecret, OidcClientManager, SecretKind, SecretStore};
use crate::domain::entities::{ClusterId, ClusterStatus, HttpProxy, OrganizationId};
use crate::domain::repositories::ClusterStore;
use crate::error::Result;

pub const SET_CLUSTER_STATUS: &str = "set-cluster-status";
pub const RELEASE_CLUSTER_WORKFLOW: &str = "release-cluster-workflow";
pub const DELETE_NODE_POOL_FROM_STORE: &str = "delete-node-pool-from-store";
pub const DELETE_CLUSTER_FROM_STORE: &str = "delete-cluster-from-store";
pub const DOWNLOAD_KUBECONFIG: &str = "download-kubeconfig";
pub const GET_PROXY_SETTINGS: &str = "get-proxy-settings";
pub const GENERATE_CERTIFICATES: &str = "generate-certificates";
pub const DELETE_UNUSED_SECRETS: &str = "delete-unused-secrets";
pub const DELETE_OIDC_CLIENT: &str = "delete-oidc-client";

/// Name of the secret holding the kubeconfig uploaded by the master
pub fn kubeconfig_secret_name(cluster_uid: &str) -> String {
    format!("cluster-{}-kubeconfig", cluster_uid)
}

pub fn ca_secret_name(cluster_uid: &str) -> String {
    format!("cluster-{}-ca", cluster_uid)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetClusterStatusInput {
    pub cluster_id: ClusterId,
    pub status: ClusterStatus,
    pub message: String,
}

pub struct SetClusterStatusActivity {
    store: Arc<dyn ClusterStore>,
}

impl SetClusterStatusActivity {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Activity for SetClusterStatusActivity {
    type Input = SetClusterStatusInput;
    type Output = ();

    fn name(&self) -> &'static str {
        SET_CLUSTER_STATUS
    }

    async fn execute(&self, input: SetClusterStatusInput) -> Result<()> {
        self.store
            .set_status(input.cluster_id, input.status, &input.message)
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseClusterWorkflowInput {
    pub cluster_id: ClusterId,
    pub workflow_id: String,
}

pub struct ReleaseClusterWorkflowActivity {
    store: Arc<dyn ClusterStore>,
}

impl ReleaseClusterWorkflowActivity {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Activity for ReleaseClusterWorkflowActivity {
    type Input = ReleaseClusterWorkflowInput;
    type Output = ();

    fn name(&self) -> &'static str {
        RELEASE_CLUSTER_WORKFLOW
    }

    async fn execute(&self, input: ReleaseClusterWorkflowInput) -> Result<()> {
        self.store
            .release_workflow(input.cluster_id, &input.workflow_id)
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteNodePoolFromStoreInput {
    pub cluster_id: ClusterId,
    pub node_pool_name: String,
}

pub struct DeleteNodePoolFromStoreActivity {
    store: Arc<dyn ClusterStore>,
}

impl DeleteNodePoolFromStoreActivity {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Activity for DeleteNodePoolFromStoreActivity {
    type Input = DeleteNodePoolFromStoreInput;
    type Output = ();

    fn name(&self) -> &'static str {
        DELETE_NODE_POOL_FROM_STORE
    }

    async fn execute(&self, input: DeleteNodePoolFromStoreInput) -> Result<()> {
        match self
            .store
            .delete_node_pool(input.cluster_id, &input.node_pool_name)
            .await
        {
            Err(err) if err.is_not_found() => {
                debug!(node_pool = %input.node_pool_name, "Node pool already removed");
                Ok(())
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteClusterFromStoreInput {
    pub cluster_id: ClusterId,
}

pub struct DeleteClusterFromStoreActivity {
    store: Arc<dyn ClusterStore>,
}

impl DeleteClusterFromStoreActivity {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Activity for DeleteClusterFromStoreActivity {
    type Input = DeleteClusterFromStoreInput;
    type Output = ();

    fn name(&self) -> &'static str {
        DELETE_CLUSTER_FROM_STORE
    }

    async fn execute(&self, input: DeleteClusterFromStoreInput) -> Result<()> {
        match self.store.delete(input.cluster_id).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadKubeConfigInput {
    pub cluster_id: ClusterId,
    pub organization_id: OrganizationId,
    pub cluster_uid: String,
}

/// Locates the kubeconfig secret the master uploaded and records it on the
/// cluster. Returns the secret id.
pub struct DownloadKubeConfigActivity {
    store: Arc<dyn ClusterStore>,
    secrets: Arc<dyn SecretStore>,
}

impl DownloadKubeConfigActivity {
    pub fn new(store: Arc<dyn ClusterStore>, secrets: Arc<dyn SecretStore>) -> Self {
        Self { store, secrets }
    }
}

#[async_trait]
impl Activity for DownloadKubeConfigActivity {
    type Input = DownloadKubeConfigInput;
    type Output = String;

    fn name(&self) -> &'static str {
        DOWNLOAD_KUBECONFIG
    }

    async fn execute(&self, input: DownloadKubeConfigInput) -> Result<String> {
        let secret = self
            .secrets
            .get_by_name(input.organization_id, &kubeconfig_secret_name(&input.cluster_uid))
            .await?;
        self.store
            .set_config_secret_id(input.cluster_id, &secret.id)
            .await?;

        info!(cluster_id = %input.cluster_id, secret_id = %secret.id, "Kubeconfig stored");
        Ok(secret.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProxySettingsInput {
    pub organization_id: OrganizationId,
    pub http_proxy: HttpProxy,
}

pub struct GetProxySettingsActivity {
    secrets: Arc<dyn SecretStore>,
}

impl GetProxySettingsActivity {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl Activity for GetProxySettingsActivity {
    type Input = GetProxySettingsInput;
    type Output = ResolvedProxy;

    fn name(&self) -> &'static str {
        GET_PROXY_SETTINGS
    }

    async fn execute(&self, input: GetProxySettingsInput) -> Result<ResolvedProxy> {
        resolve_proxy(self.secrets.as_ref(), input.organization_id, &input.http_proxy).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSecretsInput {
    pub organization_id: OrganizationId,
    pub cluster_uid: String,
}

/// Issues the cluster CA; reuses it when a previous attempt created it
pub struct GenerateCertificatesActivity {
    secrets: Arc<dyn SecretStore>,
}

impl GenerateCertificatesActivity {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl Activity for GenerateCertificatesActivity {
    type Input = ClusterSecretsInput;
    type Output = String;

    fn name(&self) -> &'static str {
        GENERATE_CERTIFICATES
    }

    async fn execute(&self, input: ClusterSecretsInput) -> Result<String> {
        let name = ca_secret_name(&input.cluster_uid);
        match self.secrets.get_by_name(input.organization_id, &name).await {
            Ok(secret) => return Ok(secret.id),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let secret_id = self
            .secrets
            .create(
                input.organization_id,
                NewSecret {
                    name,
                    kind: SecretKind::ClusterCa,
                    values: BTreeMap::new(),
                    tags: vec![cluster_secret_tag(&input.cluster_uid)],
                },
            )
            .await?;

        info!(cluster_uid = %input.cluster_uid, secret_id = %secret_id, "Cluster CA generated");
        Ok(secret_id)
    }
}

/// Best-effort removal of the secrets issued for a cluster
pub struct DeleteUnusedSecretsActivity {
    secrets: Arc<dyn SecretStore>,
}

impl DeleteUnusedSecretsActivity {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl Activity for DeleteUnusedSecretsActivity {
    type Input = ClusterSecretsInput;
    /// Number of secrets deleted
    type Output = u32;

    fn name(&self) -> &'static str {
        DELETE_UNUSED_SECRETS
    }

    fn options(&self) -> Option<ActivityOptions> {
        Some(ActivityOptions {
            retry_policy: RetryPolicy::no_retry(),
            ..ActivityOptions::default()
        })
    }

    async fn execute(&self, input: ClusterSecretsInput) -> Result<u32> {
        let tag = cluster_secret_tag(&input.cluster_uid);
        let secrets = match self.secrets.list_by_tag(input.organization_id, &tag).await {
            Ok(secrets) => secrets,
            Err(err) => {
                warn!(cluster_uid = %input.cluster_uid, error = %err, "Failed to list cluster secrets");
                return Ok(0);
            }
        };

        let mut deleted = 0;
        for secret in secrets {
            match self.secrets.delete(input.organization_id, &secret.id).await {
                Ok(()) => deleted += 1,
                Err(err) => warn!(secret = %secret.name, error = %err, "Failed to delete secret"),
            }
        }
        Ok(deleted)
    }
}

pub struct DeleteOidcClientActivity {
    oidc: Arc<dyn OidcClientManager>,
}

impl DeleteOidcClientActivity {
    pub fn new(oidc: Arc<dyn OidcClientManager>) -> Self {
        Self { oidc }
    }
}

#[async_trait]
impl Activity for DeleteOidcClientActivity {
    type Input = ClusterSecretsInput;
    type Output = ();

    fn name(&self) -> &'static str {
        DELETE_OIDC_CLIENT
    }

    async fn execute(&self, input: ClusterSecretsInput) -> Result<()> {
        match self
            .oidc
            .delete_client(input.organization_id, &input.cluster_uid)
            .await
        {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}
