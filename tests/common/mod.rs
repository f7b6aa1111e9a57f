#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use vmkube::config::Config;
use vmkube::core::activities::ActivityDependencies;
use vmkube::core::drivers::DriverSettings;
use vmkube::core::traits::SecretKind;
use vmkube::domain::entities::{
    Cluster, ClusterId, ClusterStatus, CreateClusterParams, KubernetesSettings, NodePool,
    NodePoolRole, WAITING_FOR_MASTER_MESSAGE,
};
use vmkube::domain::repositories::ClusterStore;
use vmkube::infrastructure::repositories::InMemoryClusterStore;
use vmkube::infrastructure::sandbox::{
    SandboxChartDeployer, SandboxKubernetes, SandboxOidcClientManager, SandboxSecretStore,
    SandboxVirtualization,
};
use vmkube::ControlPlane;

pub const ORGANIZATION_ID: u32 = 1;
pub const USER_ID: u32 = 7;
pub const TEMPLATE: &str = "ubuntu-2204-kube";

pub const KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
clusters:
- cluster:
    server: https://10.0.0.3:6443
  name: demo
contexts:
- context:
    cluster: demo
    user: admin
  name: admin@demo
current-context: admin@demo
users:
- name: admin
  user:
    token: sandbox
"#;

/// Engine tuned for tests: small pool, fast retries
pub fn test_config() -> Config {
    Config {
        sandbox: true,
        activity_workers: 8,
        schedule_to_start_secs: 5,
        start_to_close_secs: 5,
        schedule_to_close_secs: 10,
        max_attempts: 3,
        initial_interval_ms: 10,
        max_interval_ms: 50,
        ..Config::default()
    }
}

/// A control plane wired to the in-memory store and sandbox backends
pub struct TestHarness {
    pub config: Config,
    pub store: Arc<InMemoryClusterStore>,
    pub virtualization: Arc<SandboxVirtualization>,
    pub kubernetes: Arc<SandboxKubernetes>,
    pub secrets: Arc<SandboxSecretStore>,
    pub charts: Arc<SandboxChartDeployer>,
    pub oidc: Arc<SandboxOidcClientManager>,
    pub control_plane: Arc<ControlPlane>,
    pub vsphere_secret_id: String,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_master_ready_timeout(Duration::from_secs(10)).await
    }

    pub async fn with_master_ready_timeout(master_ready_timeout: Duration) -> Self {
        let config = test_config();
        let store = Arc::new(InMemoryClusterStore::new());
        let virtualization = Arc::new(SandboxVirtualization::new());
        let kubernetes = Arc::new(SandboxKubernetes::new());
        let secrets = Arc::new(SandboxSecretStore::new());
        let charts = Arc::new(SandboxChartDeployer::new());
        let oidc = Arc::new(SandboxOidcClientManager::new());

        let vsphere_secret_id = secrets
            .insert(
                ORGANIZATION_ID,
                "vsphere-credentials",
                SecretKind::Vsphere,
                BTreeMap::from([("username".to_string(), "administrator".to_string())]),
            )
            .await;

        let deps = ActivityDependencies {
            store: store.clone(),
            virtualization: virtualization.clone(),
            kubernetes: kubernetes.clone(),
            secrets: secrets.clone(),
            charts: charts.clone(),
            oidc: oidc.clone(),
        };
        let settings = DriverSettings {
            default_placement: config.default_placement(),
            master_ready_timeout,
            ..DriverSettings::default()
        };
        let control_plane = Arc::new(ControlPlane::with_settings(&config, deps, settings));

        Self {
            config,
            store,
            virtualization,
            kubernetes,
            secrets,
            charts,
            oidc,
            control_plane,
            vsphere_secret_id,
        }
    }

    /// One master and two workers
    pub fn create_params(&self, name: &str) -> CreateClusterParams {
        CreateClusterParams {
            organization_id: ORGANIZATION_ID,
            created_by: USER_ID,
            name: name.to_string(),
            secret_id: self.vsphere_secret_id.clone(),
            kubernetes: KubernetesSettings {
                version: "1.28.2".to_string(),
                rbac_enabled: true,
                ..Default::default()
            },
            node_pools: vec![
                node_pool("master", NodePoolRole::Master, 1),
                node_pool("workers", NodePoolRole::Worker, 2),
            ],
            ..Default::default()
        }
    }

    /// Create a cluster, report its master ready and wait for `Running`
    pub async fn create_running_cluster(&self, name: &str) -> Cluster {
        let cluster = self
            .control_plane
            .creator
            .create(self.create_params(name))
            .await
            .expect("cluster creation should start");
        self.wait_for_cluster(cluster.id, |c| c.status_message == WAITING_FOR_MASTER_MESSAGE)
            .await;
        for name in self.virtualization.vm_names().await {
            self.kubernetes.register_node(&name).await;
        }

        self.control_plane
            .signaler
            .master_ready(cluster.id, Some(KUBECONFIG.to_string()))
            .await
            .expect("master ready signal should be delivered");
        self.wait_for_status(cluster.id, ClusterStatus::Running).await
    }

    /// Poll the store until `predicate` holds
    pub async fn wait_for_cluster<F>(&self, cluster_id: ClusterId, predicate: F) -> Cluster
    where
        F: Fn(&Cluster) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            if let Ok(cluster) = self.store.get_by_id(cluster_id).await {
                if predicate(&cluster) {
                    return cluster;
                }
                if Instant::now() > deadline {
                    panic!(
                        "cluster {} stuck in {} ({:?})",
                        cluster_id, cluster.status, cluster.status_message
                    );
                }
            } else if Instant::now() > deadline {
                panic!("cluster {} disappeared", cluster_id);
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait for `status` with no workflow holding the cluster
    pub async fn wait_for_status(&self, cluster_id: ClusterId, status: ClusterStatus) -> Cluster {
        self.wait_for_cluster(cluster_id, |c| c.status == status && c.is_idle())
            .await
    }

    pub async fn wait_until_deleted(&self, cluster_id: ClusterId) {
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            match self.store.get_by_id(cluster_id).await {
                Err(err) if err.is_not_found() => return,
                _ if Instant::now() > deadline => panic!("cluster {} was not deleted", cluster_id),
                _ => sleep(Duration::from_millis(10)).await,
            }
        }
    }
}

pub fn node_pool(name: &str, role: NodePoolRole, size: u32) -> NodePool {
    NodePool {
        name: name.to_string(),
        roles: vec![role],
        size,
        vcpu: 2,
        ram_mib: 4096,
        template_name: TEMPLATE.to_string(),
        ..Default::default()
    }
}

pub fn unknown_cluster_id() -> ClusterId {
    Uuid::new_v4()
}
