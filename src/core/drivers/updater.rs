use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::DriverSettings;
use crate::core::diff::{diff_node_pools, NodePoolDiff};
use crate::core::engine::{StartWorkflowOptions, WorkflowClient};
use crate::core::node_template::NodeTemplateFactory;
use crate::core::preparer::ClusterPreparer;
use crate::core::workflows::{UpdateClusterInput, UPDATE_CLUSTER};
use crate::domain::entities::{vm_names, Cluster, ClusterId, ClusterStatus, Placement, UpdateClusterParams};
use crate::domain::repositories::ClusterStore;
use crate::error::Result;

pub struct ClusterUpdater {
    store: Arc<dyn ClusterStore>,
    engine: Arc<dyn WorkflowClient>,
    preparer: ClusterPreparer,
    templates: NodeTemplateFactory,
    settings: DriverSettings,
}

impl ClusterUpdater {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        engine: Arc<dyn WorkflowClient>,
        preparer: ClusterPreparer,
        templates: NodeTemplateFactory,
        settings: DriverSettings,
    ) -> Self {
        Self {
            store,
            engine,
            preparer,
            templates,
            settings,
        }
    }

    /// Reconcile the node pools of a cluster with the request
    pub async fn update(&self, cluster_id: ClusterId, mut params: UpdateClusterParams) -> Result<Cluster> {
        let cluster = self.store.get_by_id(cluster_id).await?;
        self.preparer.prepare_update(&cluster, &mut params)?;
        let diff = diff_node_pools(&cluster.node_pools, &params.node_pools);

        let workflow_id = format!("{}-{}-{}", UPDATE_CLUSTER, cluster.uid, Uuid::new_v4());
        self.store.try_acquire_workflow(cluster.id, &workflow_id).await?;

        if let Err(err) = self.start(&cluster, &diff, &workflow_id).await {
            error!(cluster_id = %cluster.id, error = %err, "Failed to start cluster update");
            self.store
                .set_status(cluster.id, ClusterStatus::Error, &err.root_message())
                .await?;
            self.store.release_workflow(cluster.id, &workflow_id).await?;
            return Err(err);
        }

        info!(
            cluster_id = %cluster.id,
            workflow_id = %workflow_id,
            pools_created = diff.to_create.len(),
            pools_deleted = diff.to_delete.len(),
            "Cluster update started"
        );
        self.store.get_by_id(cluster.id).await
    }

    async fn start(&self, cluster: &Cluster, diff: &NodePoolDiff, workflow_id: &str) -> Result<()> {
        for pool in &diff.to_create {
            self.store.create_node_pool(cluster.id, pool).await?;
        }
        for update in diff.to_update.iter().filter(|u| u.is_resized()) {
            self.store
                .update_node_pool_size(cluster.id, &update.pool.name, update.pool.size)
                .await?;
        }
        self.store
            .set_status(cluster.id, ClusterStatus::Updating, "Cluster update requested")
            .await?;

        let updated = self.store.get_by_id(cluster.id).await?;
        let ctx = self.templates.context(&updated).await?;

        let mut nodes_to_create = Vec::new();
        for pool in &diff.to_create {
            nodes_to_create.extend(self.templates.node_specs(&updated, pool, 1..=pool.size, &ctx));
        }
        let mut nodes_to_delete = Vec::new();
        for update in &diff.to_update {
            if let Some(indices) = update.nodes_to_add() {
                nodes_to_create.extend(self.templates.node_specs(&updated, &update.pool, indices, &ctx));
            }
            if let Some(indices) = update.nodes_to_remove() {
                nodes_to_delete.extend(vm_names(&cluster.name, &update.pool.name, indices));
            }
        }

        let input = UpdateClusterInput {
            cluster_id: cluster.id,
            organization_id: cluster.organization_id,
            cluster_name: cluster.name.clone(),
            config_secret_id: cluster.config_secret_id.clone(),
            http_proxy: cluster.http_proxy.clone(),
            placement: Placement {
                folder: cluster.folder.clone(),
                resource_pool: cluster.resource_pool.clone(),
                datastore: cluster.datastore.clone(),
            },
            master_vm_name: cluster.first_master_vm_name(),
            node_pools: diff.to_update.iter().map(|u| u.pool.clone()).collect(),
            nodes_to_create,
            nodes_to_delete,
            node_pools_to_delete: diff.to_delete.clone(),
        };

        self.engine
            .start_workflow(
                StartWorkflowOptions {
                    workflow_id: workflow_id.to_string(),
                    execution_timeout: self.settings.workflow_execution_timeout,
                },
                UPDATE_CLUSTER,
                serde_json::to_value(&input)?,
            )
            .await?;
        Ok(())
    }
}
