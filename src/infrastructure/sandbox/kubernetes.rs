use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

use super::FailureInjector;
use crate::core::traits::{KubeConfigRef, KubernetesApi, KubernetesNode};
use crate::error::{AppError, Result};

const BUILTIN_NAMESPACES: [&str; 4] = ["default", "kube-node-lease", "kube-public", "kube-system"];

struct ClusterObjects {
    nodes: BTreeMap<String, BTreeMap<String, String>>,
    namespaces: BTreeSet<String>,
    admin_bindings: BTreeSet<String>,
}

impl Default for ClusterObjects {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            namespaces: BUILTIN_NAMESPACES.iter().map(|ns| ns.to_string()).collect(),
            admin_bindings: BTreeSet::new(),
        }
    }
}

/// Kubernetes API of a single managed cluster, shared by every kubeconfig
#[derive(Default)]
pub struct SandboxKubernetes {
    objects: Mutex<ClusterObjects>,
    failures: FailureInjector,
}

impl SandboxKubernetes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> &FailureInjector {
        &self.failures
    }

    /// Simulate a node joining the cluster
    pub async fn register_node(&self, name: &str) {
        self.objects
            .lock()
            .await
            .nodes
            .insert(name.to_string(), BTreeMap::new());
    }

    pub async fn node_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.objects.lock().await.nodes.get(name).cloned()
    }

    pub async fn node_names(&self) -> Vec<String> {
        self.objects.lock().await.nodes.keys().cloned().collect()
    }

    pub async fn add_namespace(&self, namespace: &str) {
        self.objects
            .lock()
            .await
            .namespaces
            .insert(namespace.to_string());
    }

    pub async fn admin_bindings(&self) -> Vec<String> {
        self.objects
            .lock()
            .await
            .admin_bindings
            .iter()
            .cloned()
            .collect()
    }

    async fn injected(&self, operation: &str, target: &str) -> Result<()> {
        if self.failures.should_fail(operation, target).await {
            return Err(AppError::KubernetesError(format!(
                "{} failed for {}",
                operation, target
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KubernetesApi for SandboxKubernetes {
    async fn get_node(&self, _kubeconfig: &KubeConfigRef, name: &str) -> Result<KubernetesNode> {
        self.injected("get_node", name).await?;
        let objects = self.objects.lock().await;
        let labels = objects
            .nodes
            .get(name)
            .ok_or_else(|| AppError::not_found("node", name))?;
        Ok(KubernetesNode {
            name: name.to_string(),
            labels: labels.clone(),
        })
    }

    async fn delete_node(&self, _kubeconfig: &KubeConfigRef, name: &str) -> Result<()> {
        self.injected("delete_node", name).await?;
        self.objects
            .lock()
            .await
            .nodes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("node", name))
    }

    async fn label_node(
        &self,
        _kubeconfig: &KubeConfigRef,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.injected("label_node", name).await?;
        let mut objects = self.objects.lock().await;
        let node = objects
            .nodes
            .get_mut(name)
            .ok_or_else(|| AppError::not_found("node", name))?;
        node.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn ensure_namespace(&self, _kubeconfig: &KubeConfigRef, namespace: &str) -> Result<()> {
        self.injected("ensure_namespace", namespace).await?;
        self.add_namespace(namespace).await;
        Ok(())
    }

    async fn ensure_cluster_admin_binding(&self, _kubeconfig: &KubeConfigRef, user: &str) -> Result<()> {
        self.injected("ensure_cluster_admin_binding", user).await?;
        self.objects
            .lock()
            .await
            .admin_bindings
            .insert(user.to_string());
        Ok(())
    }

    async fn list_namespaces(&self, kubeconfig: &KubeConfigRef) -> Result<Vec<String>> {
        self.injected("list_namespaces", &kubeconfig.secret_id).await?;
        Ok(self.objects.lock().await.namespaces.iter().cloned().collect())
    }

    async fn delete_namespace(&self, _kubeconfig: &KubeConfigRef, namespace: &str) -> Result<()> {
        self.injected("delete_namespace", namespace).await?;
        if self.objects.lock().await.namespaces.remove(namespace) {
            Ok(())
        } else {
            Err(AppError::not_found("namespace", namespace))
        }
    }
}
