use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::DriverSettings;
use crate::core::engine::{StartWorkflowOptions, WorkflowClient, WorkflowRun};
use crate::core::events::{ClusterEvent, ClusterEventBus};
use crate::core::workflows::{DeleteClusterInput, DELETE_CLUSTER};
use crate::domain::entities::{Cluster, ClusterId, ClusterStatus};
use crate::domain::repositories::ClusterStore;
use crate::error::{AppError, Result};

pub struct ClusterDeleter {
    store: Arc<dyn ClusterStore>,
    engine: Arc<dyn WorkflowClient>,
    events: ClusterEventBus,
    settings: DriverSettings,
}

impl ClusterDeleter {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        engine: Arc<dyn WorkflowClient>,
        events: ClusterEventBus,
        settings: DriverSettings,
    ) -> Self {
        Self {
            store,
            engine,
            events,
            settings,
        }
    }

    /// Start deleting a cluster. Deleting a cluster that no longer exists
    /// succeeds and returns `None`.
    pub async fn delete(&self, cluster_id: ClusterId, forced: bool) -> Result<Option<WorkflowRun>> {
        let cluster = match self.store.get_by_id(cluster_id).await {
            Ok(cluster) => cluster,
            Err(err) if err.is_not_found() => {
                info!(cluster_id = %cluster_id, "Cluster already deleted");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let workflow_id = format!("{}-{}-{}", DELETE_CLUSTER, cluster.uid, Uuid::new_v4());
        match self.store.try_acquire_workflow(cluster.id, &workflow_id).await {
            Ok(()) => {}
            Err(AppError::Conflict(message)) if forced => {
                let previous = self.store.get_by_id(cluster.id).await?.active_workflow_id;
                warn!(
                    cluster_id = %cluster.id,
                    previous_workflow_id = %previous,
                    reason = %message,
                    "Forced deletion takes over the cluster workflow lock"
                );
                self.stop_previous_workflow(cluster.id, &previous).await?;
                self.store
                    .set_active_workflow_id(cluster.id, &workflow_id)
                    .await?;
            }
            Err(err) => return Err(err),
        }

        let run = match self.start(&cluster, &workflow_id, forced).await {
            Ok(run) => run,
            Err(err) => {
                error!(cluster_id = %cluster.id, error = %err, "Failed to start cluster deletion");
                self.store
                    .set_status(cluster.id, ClusterStatus::Error, &err.root_message())
                    .await?;
                self.store.release_workflow(cluster.id, &workflow_id).await?;
                return Err(err);
            }
        };

        self.notify_on_completion(&cluster, workflow_id);
        info!(cluster_id = %cluster.id, workflow_id = %run.workflow_id, forced = forced, "Cluster deletion started");
        Ok(Some(run))
    }

    /// Cancel the workflow holding the lock so it cannot act on the cluster
    /// while it is being deleted
    async fn stop_previous_workflow(&self, cluster_id: ClusterId, workflow_id: &str) -> Result<()> {
        if workflow_id.is_empty() {
            return Ok(());
        }
        match self.engine.cancel_workflow(workflow_id).await {
            Ok(()) => {
                info!(cluster_id = %cluster_id, workflow_id = %workflow_id, "Cancelled previous cluster workflow");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                warn!(cluster_id = %cluster_id, workflow_id = %workflow_id, "Previous cluster workflow is unknown to the engine");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn start(&self, cluster: &Cluster, workflow_id: &str, forced: bool) -> Result<WorkflowRun> {
        self.store
            .set_status(cluster.id, ClusterStatus::Deleting, "Cluster deletion requested")
            .await?;

        let input = DeleteClusterInput {
            cluster_id: cluster.id,
            cluster_uid: cluster.uid.clone(),
            organization_id: cluster.organization_id,
            cluster_name: cluster.name.clone(),
            config_secret_id: cluster.config_secret_id.clone(),
            oidc_enabled: cluster.kubernetes.oidc_enabled,
            node_pools: cluster.node_pools.clone(),
            forced,
        };

        self.engine
            .start_workflow(
                StartWorkflowOptions {
                    workflow_id: workflow_id.to_string(),
                    execution_timeout: self.settings.workflow_execution_timeout,
                },
                DELETE_CLUSTER,
                serde_json::to_value(&input)?,
            )
            .await
    }

    /// Await the workflow in the background and publish its outcome
    fn notify_on_completion(&self, cluster: &Cluster, workflow_id: String) {
        let engine = self.engine.clone();
        let events = self.events.clone();
        let cluster_id = cluster.id;
        let organization_id = cluster.organization_id;
        let name = cluster.name.clone();

        tokio::spawn(async move {
            let event = match engine.get_result(&workflow_id).await {
                Ok(_) => ClusterEvent::Deleted {
                    cluster_id,
                    organization_id,
                    name,
                    timestamp: Utc::now(),
                },
                Err(err) => {
                    warn!(cluster_id = %cluster_id, error = %err, "Cluster deletion failed");
                    ClusterEvent::DeletionFailed {
                        cluster_id,
                        message: err.root_message(),
                        timestamp: Utc::now(),
                    }
                }
            };
            events.publish(event);
        });
    }
}
