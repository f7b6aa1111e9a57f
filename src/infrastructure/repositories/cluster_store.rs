use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Document},
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            Cluster, ClusterId, ClusterStatus, HttpProxy, KubernetesSettings, NodePool,
            OrganizationId, StatusHistoryRecord, UserId,
        },
        repositories::ClusterStore,
    },
    error::{AppError, Result},
    infrastructure::database::db::{CLUSTERS_COLLECTION, STATUS_HISTORY_COLLECTION},
};

/// MongoDB document representation of a cluster, node pools embedded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub uid: String,
    pub organization_id: OrganizationId,
    pub name: String,
    pub created_by: UserId,
    pub status: ClusterStatus,
    pub status_message: String,
    pub secret_id: String,
    pub config_secret_id: String,
    pub ssh_secret_id: String,
    pub kubernetes: KubernetesSettings,
    pub http_proxy: HttpProxy,
    pub folder: String,
    pub resource_pool: String,
    pub datastore: String,
    pub active_workflow_id: String,
    pub node_pools: Vec<NodePool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryDocument {
    pub cluster_id: String,
    pub cluster_name: String,
    pub from_status: ClusterStatus,
    pub from_status_message: String,
    pub to_status: ClusterStatus,
    pub to_status_message: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Cluster> for ClusterDocument {
    fn from(cluster: &Cluster) -> Self {
        Self {
            id: cluster.id.to_string(),
            uid: cluster.uid.clone(),
            organization_id: cluster.organization_id,
            name: cluster.name.clone(),
            created_by: cluster.created_by,
            status: cluster.status,
            status_message: cluster.status_message.clone(),
            secret_id: cluster.secret_id.clone(),
            config_secret_id: cluster.config_secret_id.clone(),
            ssh_secret_id: cluster.ssh_secret_id.clone(),
            kubernetes: cluster.kubernetes.clone(),
            http_proxy: cluster.http_proxy.clone(),
            folder: cluster.folder.clone(),
            resource_pool: cluster.resource_pool.clone(),
            datastore: cluster.datastore.clone(),
            active_workflow_id: cluster.active_workflow_id.clone(),
            node_pools: cluster.node_pools.clone(),
            created_at: cluster.created_at,
            updated_at: cluster.updated_at,
        }
    }
}

impl TryFrom<ClusterDocument> for Cluster {
    type Error = AppError;

    fn try_from(doc: ClusterDocument) -> Result<Self> {
        let id = Uuid::parse_str(&doc.id)
            .map_err(|e| AppError::DatabaseError(format!("Invalid cluster ID: {}", e)))?;

        Ok(Cluster {
            id,
            uid: doc.uid,
            organization_id: doc.organization_id,
            name: doc.name,
            created_by: doc.created_by,
            status: doc.status,
            status_message: doc.status_message,
            secret_id: doc.secret_id,
            config_secret_id: doc.config_secret_id,
            ssh_secret_id: doc.ssh_secret_id,
            kubernetes: doc.kubernetes,
            http_proxy: doc.http_proxy,
            folder: doc.folder,
            resource_pool: doc.resource_pool,
            datastore: doc.datastore,
            active_workflow_id: doc.active_workflow_id,
            node_pools: doc.node_pools,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        })
    }
}

impl TryFrom<StatusHistoryDocument> for StatusHistoryRecord {
    type Error = AppError;

    fn try_from(doc: StatusHistoryDocument) -> Result<Self> {
        Ok(StatusHistoryRecord {
            cluster_id: Uuid::parse_str(&doc.cluster_id)
                .map_err(|e| AppError::DatabaseError(format!("Invalid cluster ID: {}", e)))?,
            cluster_name: doc.cluster_name,
            from_status: doc.from_status,
            from_status_message: doc.from_status_message,
            to_status: doc.to_status,
            to_status_message: doc.to_status_message,
            created_at: doc.created_at,
        })
    }
}

/// MongoDB implementation of the cluster store
pub struct MongoClusterStore {
    clusters: Collection<ClusterDocument>,
    history: Collection<StatusHistoryDocument>,
}

impl MongoClusterStore {
    pub async fn new(database: &Database) -> Result<Self> {
        let store = Self {
            clusters: database.collection::<ClusterDocument>(CLUSTERS_COLLECTION),
            history: database.collection::<StatusHistoryDocument>(STATUS_HISTORY_COLLECTION),
        };
        store.create_indexes().await?;

        Ok(store)
    }

    async fn create_indexes(&self) -> Result<()> {
        let cluster_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "organization_id": 1, "name": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            IndexModel::builder().keys(doc! { "status": 1 }).build(),
        ];

        self.clusters
            .create_indexes(cluster_indexes, None)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to create indexes: {}", e)))?;

        self.history
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "cluster_id": 1, "created_at": 1 })
                    .build(),
                None,
            )
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    fn id_filter(cluster_id: ClusterId) -> Document {
        doc! { "_id": cluster_id.to_string() }
    }

    fn now() -> Result<mongodb::bson::Bson> {
        Ok(to_bson(&Utc::now())?)
    }

    async fn exists(&self, cluster_id: ClusterId) -> Result<bool> {
        let count = self
            .clusters
            .count_documents(Self::id_filter(cluster_id), None)
            .await?;
        Ok(count > 0)
    }

    async fn ensure_exists(&self, cluster_id: ClusterId) -> Result<()> {
        if self.exists(cluster_id).await? {
            Ok(())
        } else {
            Err(AppError::not_found("cluster", cluster_id.to_string()))
        }
    }

    async fn set_field(&self, cluster_id: ClusterId, field: &str, value: &str) -> Result<()> {
        let result = self
            .clusters
            .update_one(
                Self::id_filter(cluster_id),
                doc! { "$set": { field: value, "updated_at": Self::now()? } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(AppError::not_found("cluster", cluster_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for MongoClusterStore {
    async fn create(&self, cluster: &Cluster) -> Result<()> {
        let document = ClusterDocument::from(cluster);

        self.clusters
            .insert_one(&document, None)
            .await
            .map_err(|e| match *e.kind {
                mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we))
                    if we.code == 11000 =>
                {
                    AppError::Conflict(format!(
                        "cluster {} already exists in organization {}",
                        cluster.name, cluster.organization_id
                    ))
                }
                _ => AppError::DatabaseError(format!("Failed to create cluster: {}", e)),
            })?;

        info!(cluster_id = %cluster.id, cluster_name = %cluster.name, "Cluster record created");
        Ok(())
    }

    async fn create_node_pool(&self, cluster_id: ClusterId, node_pool: &NodePool) -> Result<()> {
        let mut filter = Self::id_filter(cluster_id);
        filter.insert("node_pools.name", doc! { "$ne": &node_pool.name });

        let result = self
            .clusters
            .update_one(
                filter,
                doc! {
                    "$push": { "node_pools": to_bson(node_pool)? },
                    "$set": { "updated_at": Self::now()? },
                },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            self.ensure_exists(cluster_id).await?;
            return Err(AppError::Conflict(format!(
                "node pool {} already exists",
                node_pool.name
            )));
        }
        Ok(())
    }

    async fn delete(&self, cluster_id: ClusterId) -> Result<()> {
        let result = self
            .clusters
            .delete_one(Self::id_filter(cluster_id), None)
            .await?;

        if result.deleted_count == 0 {
            return Err(AppError::not_found("cluster", cluster_id.to_string()));
        }
        info!(cluster_id = %cluster_id, "Cluster record deleted");
        Ok(())
    }

    async fn delete_node_pool(&self, cluster_id: ClusterId, node_pool_name: &str) -> Result<()> {
        let result = self
            .clusters
            .update_one(
                Self::id_filter(cluster_id),
                doc! {
                    "$pull": { "node_pools": { "name": node_pool_name } },
                    "$set": { "updated_at": Self::now()? },
                },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(AppError::not_found("cluster", cluster_id.to_string()));
        }
        if result.modified_count == 0 {
            return Err(AppError::not_found("node pool", node_pool_name));
        }
        Ok(())
    }

    async fn update_node_pool_size(
        &self,
        cluster_id: ClusterId,
        node_pool_name: &str,
        size: u32,
    ) -> Result<()> {
        let mut filter = Self::id_filter(cluster_id);
        filter.insert("node_pools.name", node_pool_name);

        let result = self
            .clusters
            .update_one(
                filter,
                doc! { "$set": { "node_pools.$.size": size as i64, "updated_at": Self::now()? } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            self.ensure_exists(cluster_id).await?;
            return Err(AppError::not_found("node pool", node_pool_name));
        }
        Ok(())
    }

    async fn get_by_id(&self, cluster_id: ClusterId) -> Result<Cluster> {
        let document = self
            .clusters
            .find_one(Self::id_filter(cluster_id), None)
            .await?
            .ok_or_else(|| AppError::not_found("cluster", cluster_id.to_string()))?;

        Cluster::try_from(document)
    }

    async fn get_by_name(&self, organization_id: OrganizationId, name: &str) -> Result<Cluster> {
        let document = self
            .clusters
            .find_one(
                doc! { "organization_id": organization_id as i64, "name": name },
                None,
            )
            .await?
            .ok_or_else(|| AppError::not_found("cluster", name))?;

        Cluster::try_from(document)
    }

    async fn set_status(
        &self,
        cluster_id: ClusterId,
        status: ClusterStatus,
        message: &str,
    ) -> Result<()> {
        let mut filter = Self::id_filter(cluster_id);
        filter.insert(
            "$or",
            vec![
                doc! { "status": { "$ne": status.as_str() } },
                doc! { "status_message": { "$ne": message } },
            ],
        );

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::Before)
            .build();

        let previous = self
            .clusters
            .find_one_and_update(
                filter,
                doc! { "$set": {
                    "status": status.as_str(),
                    "status_message": message,
                    "updated_at": Self::now()?,
                } },
                options,
            )
            .await?;

        let Some(previous) = previous else {
            // Either unchanged or missing
            self.ensure_exists(cluster_id).await?;
            debug!(cluster_id = %cluster_id, status = %status, "Status unchanged");
            return Ok(());
        };

        let record = StatusHistoryDocument {
            cluster_id: previous.id,
            cluster_name: previous.name,
            from_status: previous.status,
            from_status_message: previous.status_message,
            to_status: status,
            to_status_message: message.to_string(),
            created_at: Utc::now(),
        };
        self.history.insert_one(&record, None).await?;

        info!(
            cluster_id = %cluster_id,
            from = %record.from_status,
            to = %status,
            message = message,
            "Cluster status changed"
        );
        Ok(())
    }

    async fn set_active_workflow_id(&self, cluster_id: ClusterId, workflow_id: &str) -> Result<()> {
        self.set_field(cluster_id, "active_workflow_id", workflow_id).await
    }

    async fn try_acquire_workflow(&self, cluster_id: ClusterId, workflow_id: &str) -> Result<()> {
        let mut filter = Self::id_filter(cluster_id);
        filter.insert(
            "active_workflow_id",
            doc! { "$in": ["", workflow_id] },
        );

        let acquired = self
            .clusters
            .find_one_and_update(
                filter,
                doc! { "$set": { "active_workflow_id": workflow_id, "updated_at": Self::now()? } },
                None,
            )
            .await?;

        if acquired.is_some() {
            return Ok(());
        }

        let current = self.get_by_id(cluster_id).await?;
        Err(AppError::Conflict(format!(
            "cluster {} is busy with workflow {}",
            current.name, current.active_workflow_id
        )))
    }

    async fn release_workflow(&self, cluster_id: ClusterId, workflow_id: &str) -> Result<()> {
        let mut filter = Self::id_filter(cluster_id);
        filter.insert("active_workflow_id", workflow_id);

        self.clusters
            .update_one(
                filter,
                doc! { "$set": { "active_workflow_id": "", "updated_at": Self::now()? } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn set_config_secret_id(&self, cluster_id: ClusterId, secret_id: &str) -> Result<()> {
        self.set_field(cluster_id, "config_secret_id", secret_id).await
    }

    async fn set_ssh_secret_id(&self, cluster_id: ClusterId, secret_id: &str) -> Result<()> {
        self.set_field(cluster_id, "ssh_secret_id", secret_id).await
    }

    async fn status_history(&self, cluster_id: ClusterId) -> Result<Vec<StatusHistoryRecord>> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self
            .history
            .find(doc! { "cluster_id": cluster_id.to_string() }, options)
            .await?;

        let documents: Vec<StatusHistoryDocument> = cursor.try_collect().await?;
        documents.into_iter().map(StatusHistoryRecord::try_from).collect()
    }
}
