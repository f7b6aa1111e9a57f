use crate::{
    application::handlers::cluster::{
        create_cluster, delete_cluster, get_cluster, master_ready, update_cluster,
    },
    AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Cluster lifecycle endpoints, nested under `/api/clusters`
pub fn cluster_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_cluster))
        .route(
            "/:cluster_id",
            get(get_cluster).put(update_cluster).delete(delete_cluster),
        )
        // Called by the first master's bootstrap script
        .route("/:cluster_id/master-ready", post(master_ready))
}
