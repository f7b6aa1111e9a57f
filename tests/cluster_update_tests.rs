mod common;

use common::*;
use vmkube::domain::entities::{ClusterStatus, NodePoolRole, UpdateClusterParams};
use vmkube::domain::repositories::ClusterStore;
use vmkube::AppError;

fn update_params(pools: &[(&str, NodePoolRole, u32)]) -> UpdateClusterParams {
    UpdateClusterParams {
        updated_by: USER_ID,
        node_pools: pools
            .iter()
            .map(|(name, role, size)| node_pool(name, *role, *size))
            .collect(),
    }
}

#[tokio::test]
async fn test_grow_pool_and_add_new_pool() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("grow").await;

    let updating = harness
        .control_plane
        .updater
        .update(
            cluster.id,
            update_params(&[
                ("master", NodePoolRole::Master, 1),
                ("workers", NodePoolRole::Worker, 3),
                ("gpu", NodePoolRole::Worker, 1),
            ]),
        )
        .await
        .unwrap();
    assert_eq!(updating.status, ClusterStatus::Updating);

    let updated = harness.wait_for_status(cluster.id, ClusterStatus::Running).await;
    assert_eq!(updated.status_message, "Cluster updated");
    assert_eq!(updated.node_pool("workers").unwrap().size, 3);
    assert_eq!(updated.node_pool("gpu").unwrap().size, 1);
    assert_eq!(
        harness.virtualization.vm_names().await,
        vec![
            "grow-gpu-01",
            "grow-master-01",
            "grow-workers-01",
            "grow-workers-02",
            "grow-workers-03",
        ]
    );
}

#[tokio::test]
async fn test_shrink_pool_removes_highest_nodes() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("shrink").await;

    harness
        .control_plane
        .updater
        .update(
            cluster.id,
            update_params(&[
                ("master", NodePoolRole::Master, 1),
                ("workers", NodePoolRole::Worker, 1),
            ]),
        )
        .await
        .unwrap();
    let updated = harness.wait_for_status(cluster.id, ClusterStatus::Running).await;

    assert_eq!(updated.node_pool("workers").unwrap().size, 1);
    assert_eq!(
        harness.virtualization.vm_names().await,
        vec!["shrink-master-01", "shrink-workers-01"]
    );
    assert!(!harness
        .kubernetes
        .node_names()
        .await
        .contains(&"shrink-workers-02".to_string()));
}

#[tokio::test]
async fn test_removed_pool_is_deleted() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("drop").await;

    harness
        .control_plane
        .updater
        .update(cluster.id, update_params(&[("master", NodePoolRole::Master, 1)]))
        .await
        .unwrap();
    let updated = harness.wait_for_status(cluster.id, ClusterStatus::Running).await;

    assert!(updated.node_pool("workers").is_none());
    assert_eq!(harness.virtualization.vm_names().await, vec!["drop-master-01"]);
    assert_eq!(harness.kubernetes.node_names().await, vec!["drop-master-01"]);
}

#[tokio::test]
async fn test_master_pool_cannot_be_removed() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("keep").await;

    let err = harness
        .control_plane
        .updater
        .update(cluster.id, update_params(&[("workers", NodePoolRole::Worker, 2)]))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let unchanged = harness.store.get_by_id(cluster.id).await.unwrap();
    assert_eq!(unchanged.status, ClusterStatus::Running);
    assert!(unchanged.is_idle());
}

#[tokio::test]
async fn test_update_conflicts_with_running_workflow() {
    let harness = TestHarness::new().await;
    let cluster = harness
        .control_plane
        .creator
        .create(harness.create_params("busy"))
        .await
        .unwrap();

    let err = harness
        .control_plane
        .updater
        .update(
            cluster.id,
            update_params(&[
                ("master", NodePoolRole::Master, 1),
                ("workers", NodePoolRole::Worker, 5),
            ]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let current = harness.store.get_by_id(cluster.id).await.unwrap();
    assert_eq!(current.node_pool("workers").unwrap().size, 2);
}

#[tokio::test]
async fn test_cleanup_failure_leaves_cluster_in_warning() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("warn").await;
    harness
        .virtualization
        .failures()
        .fail_always("destroy_vm", "warn-workers-02")
        .await;

    harness
        .control_plane
        .updater
        .update(
            cluster.id,
            update_params(&[
                ("master", NodePoolRole::Master, 1),
                ("workers", NodePoolRole::Worker, 1),
            ]),
        )
        .await
        .unwrap();
    let updated = harness.wait_for_status(cluster.id, ClusterStatus::Warning).await;

    assert!(updated.status_message.contains("warn-workers-02"));
}

#[tokio::test]
async fn test_creation_failure_during_update_is_an_error() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("fail").await;
    harness
        .virtualization
        .failures()
        .fail_always("clone_vm", "fail-workers-03")
        .await;

    harness
        .control_plane
        .updater
        .update(
            cluster.id,
            update_params(&[
                ("master", NodePoolRole::Master, 1),
                ("workers", NodePoolRole::Worker, 3),
            ]),
        )
        .await
        .unwrap();
    let updated = harness.wait_for_status(cluster.id, ClusterStatus::Error).await;

    assert!(updated.status_message.contains("fail-workers-03"));
}
