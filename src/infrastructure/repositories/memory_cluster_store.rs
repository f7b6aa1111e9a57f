use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    domain::{
        entities::{Cluster, ClusterId, ClusterStatus, NodePool, OrganizationId, StatusHistoryRecord},
        repositories::ClusterStore,
    },
    error::{AppError, Result},
};

/// In-memory cluster store, used by tests and the sandbox binary
#[derive(Default)]
pub struct InMemoryClusterStore {
    clusters: RwLock<HashMap<ClusterId, Cluster>>,
    history: RwLock<Vec<StatusHistoryRecord>>,
}

impl InMemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status transition recorded so far, across all clusters
    pub async fn all_status_history(&self) -> Vec<StatusHistoryRecord> {
        self.history.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.clusters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clusters.read().await.is_empty()
    }

    async fn update<F, T>(&self, cluster_id: ClusterId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Cluster) -> Result<T>,
    {
        let mut clusters = self.clusters.write().await;
        let cluster = clusters
            .get_mut(&cluster_id)
            .ok_or_else(|| AppError::not_found("cluster", cluster_id.to_string()))?;
        let result = f(cluster)?;
        cluster.updated_at = Utc::now();
        Ok(result)
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn create(&self, cluster: &Cluster) -> Result<()> {
        let mut clusters = self.clusters.write().await;
        if clusters.contains_key(&cluster.id)
            || clusters.values().any(|c| {
                c.organization_id == cluster.organization_id && c.name == cluster.name
            })
        {
            return Err(AppError::Conflict(format!(
                "cluster {} already exists in organization {}",
                cluster.name, cluster.organization_id
            )));
        }

        clusters.insert(cluster.id, cluster.clone());
        info!(cluster_id = %cluster.id, cluster_name = %cluster.name, "Cluster record created");
        Ok(())
    }

    async fn create_node_pool(&self, cluster_id: ClusterId, node_pool: &NodePool) -> Result<()> {
        self.update(cluster_id, |cluster| {
            if cluster.node_pool(&node_pool.name).is_some() {
                return Err(AppError::Conflict(format!(
                    "node pool {} already exists",
                    node_pool.name
                )));
            }
            cluster.node_pools.push(node_pool.clone());
            Ok(())
        })
        .await
    }

    async fn delete(&self, cluster_id: ClusterId) -> Result<()> {
        let mut clusters = self.clusters.write().await;
        clusters
            .remove(&cluster_id)
            .ok_or_else(|| AppError::not_found("cluster", cluster_id.to_string()))?;
        info!(cluster_id = %cluster_id, "Cluster record deleted");
        Ok(())
    }

    async fn delete_node_pool(&self, cluster_id: ClusterId, node_pool_name: &str) -> Result<()> {
        self.update(cluster_id, |cluster| {
            let before = cluster.node_pools.len();
            cluster.node_pools.retain(|pool| pool.name != node_pool_name);
            if cluster.node_pools.len() == before {
                return Err(AppError::not_found("node pool", node_pool_name));
            }
            Ok(())
        })
        .await
    }

    async fn update_node_pool_size(
        &self,
        cluster_id: ClusterId,
        node_pool_name: &str,
        size: u32,
    ) -> Result<()> {
        self.update(cluster_id, |cluster| {
            let pool = cluster
                .node_pools
                .iter_mut()
                .find(|pool| pool.name == node_pool_name)
                .ok_or_else(|| AppError::not_found("node pool", node_pool_name))?;
            pool.size = size;
            Ok(())
        })
        .await
    }

    async fn get_by_id(&self, cluster_id: ClusterId) -> Result<Cluster> {
        self.clusters
            .read()
            .await
            .get(&cluster_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("cluster", cluster_id.to_string()))
    }

    async fn get_by_name(&self, organization_id: OrganizationId, name: &str) -> Result<Cluster> {
        self.clusters
            .read()
            .await
            .values()
            .find(|c| c.organization_id == organization_id && c.name == name)
            .cloned()
            .ok_or_else(|| AppError::not_found("cluster", name))
    }

    async fn set_status(
        &self,
        cluster_id: ClusterId,
        status: ClusterStatus,
        message: &str,
    ) -> Result<()> {
        let record = {
            let mut clusters = self.clusters.write().await;
            let cluster = clusters
                .get_mut(&cluster_id)
                .ok_or_else(|| AppError::not_found("cluster", cluster_id.to_string()))?;

            if cluster.status == status && cluster.status_message == message {
                debug!(cluster_id = %cluster_id, status = %status, "Status unchanged");
                return Ok(());
            }

            let record = StatusHistoryRecord {
                cluster_id,
                cluster_name: cluster.name.clone(),
                from_status: cluster.status,
                from_status_message: std::mem::replace(&mut cluster.status_message, message.to_string()),
                to_status: status,
                to_status_message: message.to_string(),
                created_at: Utc::now(),
            };
            cluster.status = status;
            cluster.updated_at = record.created_at;
            record
        };

        info!(
            cluster_id = %cluster_id,
            from = %record.from_status,
            to = %status,
            message = message,
            "Cluster status changed"
        );
        self.history.write().await.push(record);
        Ok(())
    }

    async fn set_active_workflow_id(&self, cluster_id: ClusterId, workflow_id: &str) -> Result<()> {
        self.update(cluster_id, |cluster| {
            cluster.active_workflow_id = workflow_id.to_string();
            Ok(())
        })
        .await
    }

    async fn try_acquire_workflow(&self, cluster_id: ClusterId, workflow_id: &str) -> Result<()> {
        self.update(cluster_id, |cluster| {
            if !cluster.is_idle() && cluster.active_workflow_id != workflow_id {
                return Err(AppError::Conflict(format!(
                    "cluster {} is busy with workflow {}",
                    cluster.name, cluster.active_workflow_id
                )));
            }
            cluster.active_workflow_id = workflow_id.to_string();
            Ok(())
        })
        .await
    }

    async fn release_workflow(&self, cluster_id: ClusterId, workflow_id: &str) -> Result<()> {
        let mut clusters = self.clusters.write().await;
        if let Some(cluster) = clusters.get_mut(&cluster_id) {
            if cluster.active_workflow_id == workflow_id {
                cluster.active_workflow_id.clear();
                cluster.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn set_config_secret_id(&self, cluster_id: ClusterId, secret_id: &str) -> Result<()> {
        self.update(cluster_id, |cluster| {
            cluster.config_secret_id = secret_id.to_string();
            Ok(())
        })
        .await
    }

    async fn set_ssh_secret_id(&self, cluster_id: ClusterId, secret_id: &str) -> Result<()> {
        self.update(cluster_id, |cluster| {
            cluster.ssh_secret_id = secret_id.to_string();
            Ok(())
        })
        .await
    }

    async fn status_history(&self, cluster_id: ClusterId) -> Result<Vec<StatusHistoryRecord>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .filter(|record| record.cluster_id == cluster_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{HttpProxy, KubernetesSettings, NodePoolRole};
    use uuid::Uuid;

    fn cluster(name: &str) -> Cluster {
        let now = Utc::now();
        Cluster {
            id: Uuid::new_v4(),
            uid: Uuid::new_v4().to_string(),
            organization_id: 1,
            name: name.to_string(),
            created_by: 1,
            status: ClusterStatus::Creating,
            status_message: String::new(),
            secret_id: "vsphere".into(),
            config_secret_id: String::new(),
            ssh_secret_id: String::new(),
            kubernetes: KubernetesSettings::default(),
            http_proxy: HttpProxy::default(),
            folder: String::new(),
            resource_pool: String::new(),
            datastore: String::new(),
            active_workflow_id: String::new(),
            node_pools: vec![NodePool {
                name: "masters".into(),
                roles: vec![NodePoolRole::Master],
                size: 1,
                ..Default::default()
            }],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_repeated_set_status_writes_one_history_record() {
        let store = InMemoryClusterStore::new();
        let cluster = cluster("demo");
        store.create(&cluster).await.unwrap();

        store
            .set_status(cluster.id, ClusterStatus::Running, "Cluster created")
            .await
            .unwrap();
        store
            .set_status(cluster.id, ClusterStatus::Running, "Cluster created")
            .await
            .unwrap();

        let history = store.status_history(cluster.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_status, ClusterStatus::Creating);
        assert_eq!(history[0].to_status, ClusterStatus::Running);
    }

    #[tokio::test]
    async fn test_message_change_alone_is_recorded() {
        let store = InMemoryClusterStore::new();
        let cluster = cluster("demo");
        store.create(&cluster).await.unwrap();

        store
            .set_status(cluster.id, ClusterStatus::Creating, "Waiting for Kubernetes master")
            .await
            .unwrap();

        let history = store.status_history(cluster.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to_status_message, "Waiting for Kubernetes master");
    }

    #[tokio::test]
    async fn test_missing_rows_are_typed_not_found() {
        let store = InMemoryClusterStore::new();
        let missing = Uuid::new_v4();

        assert!(store.get_by_id(missing).await.unwrap_err().is_not_found());
        assert!(store
            .set_status(missing, ClusterStatus::Error, "x")
            .await
            .unwrap_err()
            .is_not_found());

        let cluster = cluster("demo");
        store.create(&cluster).await.unwrap();
        assert!(store
            .delete_node_pool(cluster.id, "workers")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_workflow_lock_is_compare_and_swap() {
        let store = InMemoryClusterStore::new();
        let cluster = cluster("demo");
        store.create(&cluster).await.unwrap();

        store.try_acquire_workflow(cluster.id, "wf-1").await.unwrap();
        store.try_acquire_workflow(cluster.id, "wf-1").await.unwrap();
        let err = store.try_acquire_workflow(cluster.id, "wf-2").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Releasing with a stale id leaves the lock alone
        store.release_workflow(cluster.id, "wf-2").await.unwrap();
        assert_eq!(store.get_by_id(cluster.id).await.unwrap().active_workflow_id, "wf-1");

        store.release_workflow(cluster.id, "wf-1").await.unwrap();
        store.try_acquire_workflow(cluster.id, "wf-2").await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_names_conflict() {
        let store = InMemoryClusterStore::new();
        store.create(&cluster("demo")).await.unwrap();
        let err = store.create(&cluster("demo")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_node_pool_lifecycle() {
        let store = InMemoryClusterStore::new();
        let cluster = cluster("demo");
        store.create(&cluster).await.unwrap();

        let workers = NodePool {
            name: "workers".into(),
            roles: vec![NodePoolRole::Worker],
            size: 2,
            ..Default::default()
        };
        store.create_node_pool(cluster.id, &workers).await.unwrap();
        assert!(store.create_node_pool(cluster.id, &workers).await.is_err());

        store.update_node_pool_size(cluster.id, "workers", 5).await.unwrap();
        let stored = store.get_by_id(cluster.id).await.unwrap();
        assert_eq!(stored.node_pool("workers").map(|p| p.size), Some(5));

        store.delete_node_pool(cluster.id, "workers").await.unwrap();
        let stored = store.get_by_id(cluster.id).await.unwrap();
        assert!(stored.node_pool("workers").is_none());
    }
}
