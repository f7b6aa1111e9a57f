use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::core::activities::kubeconfig_secret_name;
use crate::core::engine::WorkflowClient;
use crate::core::traits::{cluster_secret_tag, NewSecret, SecretKind, SecretStore, KUBECONFIG_SECRET_KEY};
use crate::core::workflows::MASTER_READY_SIGNAL;
use crate::domain::entities::ClusterId;
use crate::domain::repositories::ClusterStore;
use crate::error::{AppError, Result};

/// Delivers external events into a cluster's running workflow
pub struct ClusterSignaler {
    store: Arc<dyn ClusterStore>,
    secrets: Arc<dyn SecretStore>,
    engine: Arc<dyn WorkflowClient>,
}

impl ClusterSignaler {
    pub fn new(store: Arc<dyn ClusterStore>, secrets: Arc<dyn SecretStore>, engine: Arc<dyn WorkflowClient>) -> Self {
        Self { store, secrets, engine }
    }

    /// Called once the first master has bootstrapped. A kubeconfig, when
    /// given, is stored as the cluster's kubeconfig secret first.
    pub async fn master_ready(&self, cluster_id: ClusterId, kubeconfig: Option<String>) -> Result<()> {
        let cluster = self.store.get_by_id(cluster_id).await?;
        if cluster.is_idle() {
            return Err(AppError::Conflict(format!(
                "cluster {} has no running workflow",
                cluster.name
            )));
        }

        if let Some(kubeconfig) = kubeconfig {
            self.secrets
                .create(
                    cluster.organization_id,
                    NewSecret {
                        name: kubeconfig_secret_name(&cluster.uid),
                        kind: SecretKind::Kubernetes,
                        values: BTreeMap::from([(KUBECONFIG_SECRET_KEY.to_string(), kubeconfig)]),
                        tags: vec![cluster_secret_tag(&cluster.uid)],
                    },
                )
                .await?;
        }

        self.engine
            .signal_workflow(
                &cluster.active_workflow_id,
                MASTER_READY_SIGNAL,
                serde_json::json!({ "cluster_id": cluster.id }),
            )
            .await?;

        info!(cluster_id = %cluster.id, workflow_id = %cluster.active_workflow_id, "Master ready signal delivered");
        Ok(())
    }
}
