mod common;

use std::time::Duration;
use tokio::time::timeout;

use common::*;
use vmkube::core::events::ClusterEvent;
use vmkube::domain::entities::{ClusterStatus, WAITING_FOR_MASTER_MESSAGE};
use vmkube::infrastructure::sandbox::ANY_TARGET;
use vmkube::AppError;

#[tokio::test]
async fn test_delete_cluster_removes_everything() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("gone").await;
    harness.charts.install("ingress", "ingress-nginx").await;
    harness.kubernetes.add_namespace("team-a").await;
    let mut events = harness.control_plane.events.subscribe();

    let run = harness
        .control_plane
        .deleter
        .delete(cluster.id, false)
        .await
        .unwrap();
    assert!(run.is_some());

    let event = timeout(Duration::from_secs(15), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        ClusterEvent::Deleted { cluster_id, name, .. } => {
            assert_eq!(cluster_id, cluster.id);
            assert_eq!(name, "gone");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    harness.wait_until_deleted(cluster.id).await;
    assert!(harness.virtualization.vm_names().await.is_empty());
    assert!(harness.charts.releases().await.is_empty());
    // Only the credentials created outside the cluster survive
    assert_eq!(harness.secrets.names(ORGANIZATION_ID).await, vec!["vsphere-credentials"]);
}

#[tokio::test]
async fn test_delete_missing_cluster_succeeds() {
    let harness = TestHarness::new().await;

    let run = harness
        .control_plane
        .deleter
        .delete(unknown_cluster_id(), false)
        .await
        .unwrap();
    assert!(run.is_none());
}

#[tokio::test]
async fn test_delete_stops_at_first_failure_unless_forced() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("stuck").await;
    harness
        .charts
        .failures()
        .fail_always("list_releases", ANY_TARGET)
        .await;
    let mut events = harness.control_plane.events.subscribe();

    harness
        .control_plane
        .deleter
        .delete(cluster.id, false)
        .await
        .unwrap();
    let failed = harness.wait_for_status(cluster.id, ClusterStatus::Error).await;
    assert!(failed.status_message.contains("cannot reach cluster"));
    assert_eq!(harness.virtualization.vm_names().await.len(), 3);

    let event = timeout(Duration::from_secs(15), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ClusterEvent::DeletionFailed { .. }));
}

#[tokio::test]
async fn test_forced_delete_continues_past_failures() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("forced").await;
    harness
        .charts
        .failures()
        .fail_always("list_releases", ANY_TARGET)
        .await;

    harness
        .control_plane
        .deleter
        .delete(cluster.id, true)
        .await
        .unwrap();

    harness.wait_until_deleted(cluster.id).await;
    assert!(harness.virtualization.vm_names().await.is_empty());
}

#[tokio::test]
async fn test_forced_delete_takes_over_running_workflow() {
    let harness = TestHarness::new().await;
    let cluster = harness
        .control_plane
        .creator
        .create(harness.create_params("takeover"))
        .await
        .unwrap();
    harness
        .wait_for_cluster(cluster.id, |c| c.status_message == WAITING_FOR_MASTER_MESSAGE)
        .await;

    let err = harness
        .control_plane
        .deleter
        .delete(cluster.id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    harness
        .control_plane
        .deleter
        .delete(cluster.id, true)
        .await
        .unwrap();
    harness.wait_until_deleted(cluster.id).await;
    assert!(harness.virtualization.vm_names().await.is_empty());
}

#[tokio::test]
async fn test_forced_delete_stops_creation_in_progress() {
    let harness = TestHarness::new().await;
    harness
        .virtualization
        .failures()
        .fail("clone_vm", ANY_TARGET, 6)
        .await;
    let cluster = harness
        .control_plane
        .creator
        .create(harness.create_params("racing"))
        .await
        .unwrap();

    harness
        .control_plane
        .deleter
        .delete(cluster.id, true)
        .await
        .unwrap();
    assert!(
        !harness
            .control_plane
            .engine
            .is_running(&cluster.active_workflow_id)
            .await
    );

    harness.wait_until_deleted(cluster.id).await;
    // Longer than any retry backoff of the cancelled creation
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(harness.virtualization.vm_names().await.is_empty());
}

#[tokio::test]
async fn test_delete_removes_oidc_client() {
    let harness = TestHarness::new().await;
    let mut params = harness.create_params("oidc");
    params.kubernetes.oidc_enabled = true;
    let cluster = harness.control_plane.creator.create(params).await.unwrap();
    harness
        .control_plane
        .signaler
        .master_ready(cluster.id, Some(KUBECONFIG.to_string()))
        .await
        .unwrap();
    let cluster = harness.wait_for_status(cluster.id, ClusterStatus::Running).await;
    harness.oidc.register(ORGANIZATION_ID, &cluster.uid).await;

    harness
        .control_plane
        .deleter
        .delete(cluster.id, false)
        .await
        .unwrap();
    harness.wait_until_deleted(cluster.id).await;

    assert!(!harness.oidc.contains(ORGANIZATION_ID, &cluster.uid).await);
}

#[tokio::test]
async fn test_deleted_cluster_history_is_kept() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("audit").await;

    harness
        .control_plane
        .deleter
        .delete(cluster.id, false)
        .await
        .unwrap();
    harness.wait_until_deleted(cluster.id).await;

    let history = harness.store.all_status_history().await;
    assert!(history
        .iter()
        .any(|record| record.cluster_id == cluster.id && record.to_status == ClusterStatus::Deleting));
}
