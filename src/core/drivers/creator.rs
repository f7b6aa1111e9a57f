use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::{or_default, DriverSettings};
use crate::core::engine::{StartWorkflowOptions, WorkflowClient};
use crate::core::node_template::NodeTemplateFactory;
use crate::core::preparer::ClusterPreparer;
use crate::core::traits::{cluster_secret_tag, NewSecret, SecretKind, SecretStore};
use crate::core::workflows::{CreateClusterInput, CREATE_CLUSTER};
use crate::domain::entities::{Cluster, ClusterStatus, CreateClusterParams, Placement};
use crate::domain::repositories::ClusterStore;
use crate::error::{AppError, Result};

pub struct ClusterCreator {
    store: Arc<dyn ClusterStore>,
    secrets: Arc<dyn SecretStore>,
    engine: Arc<dyn WorkflowClient>,
    preparer: ClusterPreparer,
    templates: NodeTemplateFactory,
    settings: DriverSettings,
}

impl ClusterCreator {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        secrets: Arc<dyn SecretStore>,
        engine: Arc<dyn WorkflowClient>,
        preparer: ClusterPreparer,
        templates: NodeTemplateFactory,
        settings: DriverSettings,
    ) -> Self {
        Self {
            store,
            secrets,
            engine,
            preparer,
            templates,
            settings,
        }
    }

    /// Validate, persist and start provisioning a cluster. Returns the
    /// persisted cluster once the create workflow is running.
    pub async fn create(&self, mut params: CreateClusterParams) -> Result<Cluster> {
        self.preparer.prepare_create(&mut params).await?;

        match self.store.get_by_name(params.organization_id, &params.name).await {
            Ok(_) => {
                return Err(AppError::Conflict(format!(
                    "cluster {} already exists in organization {}",
                    params.name, params.organization_id
                )));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let defaults = &self.settings.default_placement;
        let now = Utc::now();
        let mut cluster = Cluster {
            id: Uuid::new_v4(),
            uid: Uuid::new_v4().to_string(),
            organization_id: params.organization_id,
            name: params.name,
            created_by: params.created_by,
            status: ClusterStatus::Creating,
            status_message: "Cluster creation requested".to_string(),
            secret_id: params.secret_id,
            config_secret_id: String::new(),
            ssh_secret_id: params.ssh_secret_id,
            kubernetes: params.kubernetes,
            http_proxy: params.http_proxy,
            folder: or_default(&params.placement.folder, &defaults.folder),
            resource_pool: or_default(&params.placement.resource_pool, &defaults.resource_pool),
            datastore: or_default(&params.placement.datastore, &defaults.datastore),
            active_workflow_id: String::new(),
            node_pools: params.node_pools,
            created_at: now,
            updated_at: now,
        };
        self.store.create(&cluster).await?;

        let workflow_id = format!("{}-{}", CREATE_CLUSTER, cluster.uid);
        if let Err(err) = self.start(&mut cluster, &workflow_id).await {
            error!(cluster_id = %cluster.id, error = %err, "Failed to start cluster creation");
            self.store
                .set_status(cluster.id, ClusterStatus::Error, &err.root_message())
                .await?;
            self.store.release_workflow(cluster.id, &workflow_id).await?;
            return Err(err);
        }

        info!(
            cluster_id = %cluster.id,
            cluster_name = %cluster.name,
            workflow_id = %workflow_id,
            "Cluster creation started"
        );
        self.store.get_by_id(cluster.id).await
    }

    async fn start(&self, cluster: &mut Cluster, workflow_id: &str) -> Result<()> {
        if cluster.ssh_secret_id.is_empty() {
            let secret_id = self
                .secrets
                .create(
                    cluster.organization_id,
                    NewSecret {
                        name: format!("cluster-{}-ssh", cluster.uid),
                        kind: SecretKind::Ssh,
                        values: BTreeMap::new(),
                        tags: vec![cluster_secret_tag(&cluster.uid)],
                    },
                )
                .await?;
            self.store.set_ssh_secret_id(cluster.id, &secret_id).await?;
            cluster.ssh_secret_id = secret_id;
        }
        let cluster: &Cluster = cluster;

        let ctx = self.templates.context(cluster).await?;
        let nodes = cluster
            .node_pools
            .iter()
            .flat_map(|pool| self.templates.node_specs(cluster, pool, 1..=pool.size, &ctx))
            .collect();

        let input = CreateClusterInput {
            cluster_id: cluster.id,
            cluster_uid: cluster.uid.clone(),
            organization_id: cluster.organization_id,
            cluster_name: cluster.name.clone(),
            created_by: cluster.created_by,
            kubernetes: cluster.kubernetes.clone(),
            placement: Placement {
                folder: cluster.folder.clone(),
                resource_pool: cluster.resource_pool.clone(),
                datastore: cluster.datastore.clone(),
            },
            node_pools: cluster.node_pools.clone(),
            nodes,
            master_ready_timeout: self.settings.master_ready_timeout,
        };

        self.store.try_acquire_workflow(cluster.id, workflow_id).await?;
        self.engine
            .start_workflow(
                StartWorkflowOptions {
                    workflow_id: workflow_id.to_string(),
                    execution_timeout: self.settings.workflow_execution_timeout,
                },
                CREATE_CLUSTER,
                serde_json::to_value(&input)?,
            )
            .await?;
        Ok(())
    }
}
