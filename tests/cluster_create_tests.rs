mod common;

use std::time::Duration;

use common::*;
use vmkube::core::traits::{KubeConfigRef, KubernetesApi, PowerState, SecretStore, SSH_PUBLIC_KEY_SECRET_KEY};
use vmkube::domain::entities::{ClusterStatus, WAITING_FOR_MASTER_MESSAGE};
use vmkube::domain::repositories::ClusterStore;
use vmkube::AppError;

#[tokio::test]
async fn test_create_cluster_runs_after_master_ready() {
    let harness = TestHarness::new().await;

    let created = harness
        .control_plane
        .creator
        .create(harness.create_params("demo"))
        .await
        .unwrap();
    assert_eq!(created.status, ClusterStatus::Creating);
    assert!(!created.active_workflow_id.is_empty());
    assert!(!created.ssh_secret_id.is_empty());
    assert_eq!(created.folder, harness.config.folder);

    harness
        .wait_for_cluster(created.id, |c| c.status_message == WAITING_FOR_MASTER_MESSAGE)
        .await;
    assert_eq!(
        harness.virtualization.vm_names().await,
        vec!["demo-master-01", "demo-workers-01", "demo-workers-02"]
    );

    harness
        .control_plane
        .signaler
        .master_ready(created.id, Some(KUBECONFIG.to_string()))
        .await
        .unwrap();
    let running = harness.wait_for_status(created.id, ClusterStatus::Running).await;
    assert_eq!(running.status_message, "Cluster created");
    assert!(!running.config_secret_id.is_empty());

    let kubeconfig = KubeConfigRef {
        organization_id: ORGANIZATION_ID,
        secret_id: running.config_secret_id.clone(),
    };
    let namespaces = harness.kubernetes.list_namespaces(&kubeconfig).await.unwrap();
    assert!(namespaces.contains(&"vmkube-system".to_string()));
    assert_eq!(harness.kubernetes.admin_bindings().await, vec!["user-7"]);
}

#[tokio::test]
async fn test_status_history_has_one_record_per_change() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("history").await;

    let history = harness.store.status_history(cluster.id).await.unwrap();
    assert!(!history.is_empty());
    for record in &history {
        assert!(
            record.from_status != record.to_status
                || record.from_status_message != record.to_status_message,
            "no-op transition recorded: {:?}",
            record
        );
    }
    let last = history.last().unwrap();
    assert_eq!(last.to_status, ClusterStatus::Running);
    assert_eq!(last.cluster_name, "history");
}

#[tokio::test]
async fn test_nodes_receive_bootstrap_metadata() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("meta").await;

    let master = harness.virtualization.vm("meta-master-01").await.unwrap();
    assert_eq!(master.num_cpus, 2);
    assert_eq!(master.memory_mib, 4096);
    assert!(!master.extra_config.is_empty());

    let ssh = harness
        .secrets
        .get(ORGANIZATION_ID, &cluster.ssh_secret_id)
        .await
        .unwrap();
    assert!(ssh.values.contains_key(SSH_PUBLIC_KEY_SECRET_KEY));
}

#[tokio::test]
async fn test_duplicate_cluster_name_is_rejected() {
    let harness = TestHarness::new().await;
    harness
        .control_plane
        .creator
        .create(harness.create_params("dup"))
        .await
        .unwrap();

    let err = harness
        .control_plane
        .creator
        .create(harness.create_params("dup"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(harness.store.len().await, 1);
}

#[tokio::test]
async fn test_invalid_request_has_no_side_effects() {
    let harness = TestHarness::new().await;
    let mut params = harness.create_params("bad-ram");
    params.node_pools[1].ram_mib = 4095;

    let err = harness.control_plane.creator.create(params).await.unwrap_err();
    assert!(err.is_validation());
    assert!(harness.store.is_empty().await);
    assert!(harness.virtualization.vm_names().await.is_empty());
}

#[tokio::test]
async fn test_unknown_compute_secret_is_rejected() {
    let harness = TestHarness::new().await;
    let mut params = harness.create_params("nosecret");
    params.secret_id = "missing".to_string();

    let err = harness.control_plane.creator.create(params).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_clone_failures_are_all_reported() {
    let harness = TestHarness::new().await;
    let failures = harness.virtualization.failures();
    failures.fail_always("clone_vm", "broken-workers-01").await;
    failures.fail_always("clone_vm", "broken-workers-02").await;

    let cluster = harness
        .control_plane
        .creator
        .create(harness.create_params("broken"))
        .await
        .unwrap();
    let failed = harness.wait_for_status(cluster.id, ClusterStatus::Error).await;

    assert!(failed.status_message.contains("broken-workers-01"));
    assert!(failed.status_message.contains("broken-workers-02"));
    // The master clone was unaffected by its siblings failing
    assert_eq!(harness.virtualization.vm_names().await, vec!["broken-master-01"]);
}

#[tokio::test]
async fn test_transient_clone_failure_is_retried() {
    let harness = TestHarness::new().await;
    harness
        .virtualization
        .failures()
        .fail("clone_vm", "flaky-workers-02", 2)
        .await;

    let cluster = harness.create_running_cluster("flaky").await;
    assert_eq!(cluster.status, ClusterStatus::Running);
    assert_eq!(harness.virtualization.vm_names().await.len(), 3);
}

#[tokio::test]
async fn test_master_ready_timeout_fails_cluster() {
    let harness = TestHarness::with_master_ready_timeout(Duration::from_millis(200)).await;
    let cluster = harness
        .control_plane
        .creator
        .create(harness.create_params("slow"))
        .await
        .unwrap();

    let failed = harness.wait_for_status(cluster.id, ClusterStatus::Error).await;
    assert!(failed.status_message.contains("did not report ready"));
}

#[tokio::test]
async fn test_master_ready_signal_sent_early_is_buffered() {
    let harness = TestHarness::new().await;
    let cluster = harness
        .control_plane
        .creator
        .create(harness.create_params("early"))
        .await
        .unwrap();

    // Signal before the workflow starts waiting for it
    harness
        .control_plane
        .signaler
        .master_ready(cluster.id, Some(KUBECONFIG.to_string()))
        .await
        .unwrap();
    let running = harness.wait_for_status(cluster.id, ClusterStatus::Running).await;
    assert!(!running.config_secret_id.is_empty());
}

#[tokio::test]
async fn test_master_ready_without_workflow_conflicts() {
    let harness = TestHarness::new().await;
    let cluster = harness.create_running_cluster("idle").await;

    let err = harness
        .control_plane
        .signaler
        .master_ready(cluster.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_existing_vm_is_reused_instead_of_cloned() {
    let harness = TestHarness::new().await;
    harness
        .virtualization
        .add_vm("reuse-workers-01", PowerState::PoweredOff)
        .await;

    harness.create_running_cluster("reuse").await;

    assert_eq!(harness.virtualization.clone_calls().await, 2);
    let vm = harness.virtualization.vm("reuse-workers-01").await.unwrap();
    assert_eq!(vm.power_state, PowerState::PoweredOn);
}
