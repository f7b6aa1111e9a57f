use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::Mutex;

use super::FailureInjector;
use crate::core::traits::{ChartDeployer, KubeConfigRef, OidcClientManager, Release};
use crate::domain::entities::OrganizationId;
use crate::error::{AppError, Result};

/// Chart releases of the managed cluster
#[derive(Default)]
pub struct SandboxChartDeployer {
    releases: Mutex<Vec<Release>>,
    failures: FailureInjector,
}

impl SandboxChartDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> &FailureInjector {
        &self.failures
    }

    pub async fn install(&self, name: &str, namespace: &str) {
        self.releases.lock().await.push(Release {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
    }

    pub async fn releases(&self) -> Vec<Release> {
        self.releases.lock().await.clone()
    }
}

#[async_trait]
impl ChartDeployer for SandboxChartDeployer {
    async fn list_releases(&self, kubeconfig: &KubeConfigRef) -> Result<Vec<Release>> {
        if self.failures.should_fail("list_releases", &kubeconfig.secret_id).await {
            return Err(AppError::ExternalServiceError(format!(
                "cannot reach cluster with kubeconfig {}",
                kubeconfig.secret_id
            )));
        }
        Ok(self.releases.lock().await.clone())
    }

    async fn delete_release(&self, _kubeconfig: &KubeConfigRef, release: &Release) -> Result<()> {
        if self.failures.should_fail("delete_release", &release.name).await {
            return Err(AppError::ExternalServiceError(format!(
                "failed to delete release {}",
                release.name
            )));
        }
        let mut releases = self.releases.lock().await;
        let before = releases.len();
        releases.retain(|r| r != release);
        if releases.len() == before {
            return Err(AppError::not_found("release", release.name.clone()));
        }
        Ok(())
    }
}

/// OIDC clients keyed by cluster uid
#[derive(Default)]
pub struct SandboxOidcClientManager {
    clients: Mutex<BTreeSet<(OrganizationId, String)>>,
}

impl SandboxOidcClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, organization_id: OrganizationId, cluster_uid: &str) {
        self.clients
            .lock()
            .await
            .insert((organization_id, cluster_uid.to_string()));
    }

    pub async fn contains(&self, organization_id: OrganizationId, cluster_uid: &str) -> bool {
        self.clients
            .lock()
            .await
            .contains(&(organization_id, cluster_uid.to_string()))
    }
}

#[async_trait]
impl OidcClientManager for SandboxOidcClientManager {
    async fn delete_client(&self, organization_id: OrganizationId, cluster_uid: &str) -> Result<()> {
        if self
            .clients
            .lock()
            .await
            .remove(&(organization_id, cluster_uid.to_string()))
        {
            Ok(())
        } else {
            Err(AppError::not_found("oidc client", cluster_uid))
        }
    }
}
