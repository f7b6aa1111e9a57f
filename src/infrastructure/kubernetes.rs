//! `KubernetesApi` over the managed cluster's API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::traits::{KubeConfigRef, KubernetesApi, KubernetesNode, SecretStore, KUBECONFIG_SECRET_KEY};
use crate::domain::entities::OrganizationId;
use crate::error::{AppError, Result};

const FIELD_MANAGER: &str = "vmkube";

/// Builds one client per kubeconfig secret and caches it
pub struct KubeClusterApi {
    secrets: Arc<dyn SecretStore>,
    clients: RwLock<HashMap<(OrganizationId, String), Client>>,
}

impl KubeClusterApi {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            secrets,
            clients: RwLock::new(HashMap::new()),
        }
    }

    async fn client(&self, kubeconfig: &KubeConfigRef) -> Result<Client> {
        let key = (kubeconfig.organization_id, kubeconfig.secret_id.clone());
        if let Some(client) = self.clients.read().await.get(&key) {
            return Ok(client.clone());
        }

        let secret = self
            .secrets
            .get(kubeconfig.organization_id, &kubeconfig.secret_id)
            .await?;
        let raw = secret.values.get(KUBECONFIG_SECRET_KEY).ok_or_else(|| {
            AppError::KubernetesError(format!(
                "secret {} has no {} value",
                kubeconfig.secret_id, KUBECONFIG_SECRET_KEY
            ))
        })?;

        let parsed = Kubeconfig::from_yaml(raw)
            .map_err(|e| AppError::KubernetesError(format!("invalid kubeconfig: {}", e)))?;
        let config = Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| AppError::KubernetesError(format!("invalid kubeconfig: {}", e)))?;
        let client = Client::try_from(config)?;

        debug!(secret_id = %kubeconfig.secret_id, "Kubernetes client created");
        self.clients.write().await.insert(key, client.clone());
        Ok(client)
    }
}

fn binding_name(user: &str) -> String {
    let sanitized: String = user
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    format!("vmkube-admin-{}", sanitized)
}

#[async_trait]
impl KubernetesApi for KubeClusterApi {
    async fn get_node(&self, kubeconfig: &KubeConfigRef, name: &str) -> Result<KubernetesNode> {
        let nodes: Api<Node> = Api::all(self.client(kubeconfig).await?);
        let node = nodes.get(name).await?;
        Ok(KubernetesNode {
            name: name.to_string(),
            labels: node.metadata.labels.unwrap_or_default(),
        })
    }

    async fn delete_node(&self, kubeconfig: &KubeConfigRef, name: &str) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.client(kubeconfig).await?);
        nodes.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn label_node(
        &self,
        kubeconfig: &KubeConfigRef,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.client(kubeconfig).await?);
        let patch = json!({ "metadata": { "labels": labels } });
        nodes
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn ensure_namespace(&self, kubeconfig: &KubeConfigRef, namespace: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client(kubeconfig).await?);
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": namespace }
        });
        namespaces
            .patch(namespace, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&manifest))
            .await?;
        Ok(())
    }

    async fn ensure_cluster_admin_binding(&self, kubeconfig: &KubeConfigRef, user: &str) -> Result<()> {
        let bindings: Api<ClusterRoleBinding> = Api::all(self.client(kubeconfig).await?);
        let name = binding_name(user);
        let manifest = json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRoleBinding",
            "metadata": { "name": name },
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "ClusterRole",
                "name": "cluster-admin"
            },
            "subjects": [{
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "User",
                "name": user
            }]
        });
        bindings
            .patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&manifest))
            .await?;
        info!(user = %user, binding = %name, "Cluster admin binding applied");
        Ok(())
    }

    async fn list_namespaces(&self, kubeconfig: &KubeConfigRef) -> Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client(kubeconfig).await?);
        let list = namespaces.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn delete_namespace(&self, kubeconfig: &KubeConfigRef, namespace: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client(kubeconfig).await?);
        namespaces.delete(namespace, &DeleteParams::default()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_name_is_dns_safe() {
        assert_eq!(binding_name("user-42"), "vmkube-admin-user-42");
        assert_eq!(binding_name("Jane.Doe@example.com"), "vmkube-admin-jane-doe-example-com");
    }
}
