//! Cluster lifecycle HTTP handlers
//!
//! Thin adapters over the drivers: every handler returns as soon as the
//! workflow has been started.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::core::engine::WorkflowRun;
use crate::domain::entities::{Cluster, ClusterId, CreateClusterParams, UpdateClusterParams};
use crate::domain::repositories::ClusterStore;
use crate::error::Result;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DeleteClusterQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteClusterResponse {
    pub cluster_id: ClusterId,
    /// Absent when the cluster was already gone
    pub workflow: Option<WorkflowRun>,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MasterReadyRequest {
    /// Admin kubeconfig produced by the first master
    pub kubeconfig: Option<String>,
}

pub async fn health_checker_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = match &state.db {
        Some(db) => match db.health_check().await {
            Ok(()) => "MongoDB connected",
            Err(_) => "MongoDB unreachable",
        },
        None => "in-memory store",
    };

    Json(json!({
        "status": "success",
        "message": "vmkube control plane is running",
        "database": database,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn create_cluster(
    State(state): State<AppState>,
    Json(params): Json<CreateClusterParams>,
) -> Result<(StatusCode, Json<Cluster>)> {
    info!(organization_id = params.organization_id, cluster_name = %params.name, "Create cluster requested");
    let cluster = state.control_plane.creator.create(params).await?;
    Ok((StatusCode::CREATED, Json(cluster)))
}

pub async fn get_cluster(
    State(state): State<AppState>,
    Path(cluster_id): Path<ClusterId>,
) -> Result<Json<Cluster>> {
    let cluster = state.control_plane.store.get_by_id(cluster_id).await?;
    Ok(Json(cluster))
}

pub async fn update_cluster(
    State(state): State<AppState>,
    Path(cluster_id): Path<ClusterId>,
    Json(params): Json<UpdateClusterParams>,
) -> Result<(StatusCode, Json<Cluster>)> {
    info!(cluster_id = %cluster_id, "Update cluster requested");
    let cluster = state.control_plane.updater.update(cluster_id, params).await?;
    Ok((StatusCode::ACCEPTED, Json(cluster)))
}

pub async fn delete_cluster(
    State(state): State<AppState>,
    Path(cluster_id): Path<ClusterId>,
    Query(query): Query<DeleteClusterQuery>,
) -> Result<(StatusCode, Json<DeleteClusterResponse>)> {
    info!(cluster_id = %cluster_id, forced = query.force, "Delete cluster requested");
    let workflow = state
        .control_plane
        .deleter
        .delete(cluster_id, query.force)
        .await?;

    let (status, message) = match workflow {
        Some(_) => (StatusCode::ACCEPTED, "Cluster deletion started"),
        None => (StatusCode::OK, "Cluster already deleted"),
    };
    Ok((
        status,
        Json(DeleteClusterResponse {
            cluster_id,
            workflow,
            message: message.to_string(),
        }),
    ))
}

pub async fn master_ready(
    State(state): State<AppState>,
    Path(cluster_id): Path<ClusterId>,
    body: Option<Json<MasterReadyRequest>>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    state
        .control_plane
        .signaler
        .master_ready(cluster_id, request.kubeconfig)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "signaled" }))))
}
