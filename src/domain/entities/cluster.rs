//! Cluster domain entities and types
//!
//! This module defines the persisted cluster and node pool records, the
//! request parameters accepted by the drivers and the deterministic node
//! naming scheme used to locate virtual machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use uuid::Uuid;

/// Unique identifier for a cluster
pub type ClusterId = Uuid;

/// Identifier of the organization owning a cluster
pub type OrganizationId = u32;

/// Identifier of the user that created a resource
pub type UserId = u32;

/// Status message recorded while the create workflow waits for the master.
pub const WAITING_FOR_MASTER_MESSAGE: &str = "Waiting for Kubernetes master";

/// Lifecycle status of a cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    Creating,
    Running,
    Updating,
    Deleting,
    Warning,
    Error,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Creating => "CREATING",
            ClusterStatus::Running => "RUNNING",
            ClusterStatus::Updating => "UPDATING",
            ClusterStatus::Deleting => "DELETING",
            ClusterStatus::Warning => "WARNING",
            ClusterStatus::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATING" => Some(ClusterStatus::Creating),
            "RUNNING" => Some(ClusterStatus::Running),
            "UPDATING" => Some(ClusterStatus::Updating),
            "DELETING" => Some(ClusterStatus::Deleting),
            "WARNING" => Some(ClusterStatus::Warning),
            "ERROR" => Some(ClusterStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of the nodes in a node pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum NodePoolRole {
    /// Control plane nodes
    Master,
    /// Nodes running user workloads
    Worker,
    /// Nodes reserved for system components
    System,
}

impl NodePoolRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodePoolRole::Master => "master",
            NodePoolRole::Worker => "worker",
            NodePoolRole::System => "system",
        }
    }
}

/// A named, homogeneous group of cluster nodes.
///
/// Zero or empty fields in a request mean "unspecified"; the preparer fills
/// them in from defaults or from the persisted pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodePool {
    pub name: String,
    pub roles: Vec<NodePoolRole>,
    /// Desired node count
    pub size: u32,
    pub vcpu: u32,
    /// Memory per node in MiB, a positive multiple of 4
    pub ram_mib: u32,
    /// Name of the VM template the nodes are cloned from
    pub template_name: String,
    pub admin_username: String,
    pub created_by: UserId,
    pub labels: BTreeMap<String, String>,
}

impl NodePool {
    pub fn is_master(&self) -> bool {
        self.roles.contains(&NodePoolRole::Master)
    }

    /// Names of the virtual machines backing this pool at its current size.
    pub fn vm_names(&self, cluster_name: &str) -> Vec<String> {
        vm_names(cluster_name, &self.name, 1..=self.size)
    }
}

/// Derives the name of the virtual machine hosting node `index` of a pool.
///
/// The deletion path relies on this being a pure function of its inputs: it
/// is the only way VMs are located, there is no node table.
pub fn vm_name(cluster_name: &str, node_pool_name: &str, index: u32) -> String {
    format!("{}-{}-{:02}", cluster_name, node_pool_name, index)
}

pub fn vm_names(cluster_name: &str, node_pool_name: &str, indices: RangeInclusive<u32>) -> Vec<String> {
    indices
        .map(|index| vm_name(cluster_name, node_pool_name, index))
        .collect()
}

/// Network settings of the Kubernetes cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkSettings {
    pub provider: String,
    pub service_cidr: String,
    pub pod_cidr: String,
    pub api_server_address: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            provider: "cilium".to_string(),
            service_cidr: "10.10.0.0/16".to_string(),
            pod_cidr: "10.20.0.0/16".to_string(),
            api_server_address: String::new(),
        }
    }
}

/// Kubernetes configuration of a cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KubernetesSettings {
    pub version: String,
    pub rbac_enabled: bool,
    pub oidc_enabled: bool,
    pub network: NetworkSettings,
}

/// One proxy endpoint; credentials live in an optional secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub secret_id: Option<String>,
}

/// HTTP(S) proxy configuration handed to the nodes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpProxy {
    pub http: Option<ProxyEndpoint>,
    pub https: Option<ProxyEndpoint>,
    pub exceptions: Vec<String>,
}

/// Cluster entity, the single source of truth for lifecycle status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    /// Immutable external identity
    pub uid: String,
    pub organization_id: OrganizationId,
    pub name: String,
    pub created_by: UserId,
    pub status: ClusterStatus,
    pub status_message: String,
    /// Compute (virtualization) credentials
    pub secret_id: String,
    /// Kubeconfig secret, empty until the master reported ready
    pub config_secret_id: String,
    pub ssh_secret_id: String,
    pub kubernetes: KubernetesSettings,
    pub http_proxy: HttpProxy,
    pub folder: String,
    pub resource_pool: String,
    pub datastore: String,
    /// In-flight workflow, empty when idle
    pub active_workflow_id: String,
    pub node_pools: Vec<NodePool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    pub fn node_pool(&self, name: &str) -> Option<&NodePool> {
        self.node_pools.iter().find(|pool| pool.name == name)
    }

    pub fn master_node_pools(&self) -> impl Iterator<Item = &NodePool> {
        self.node_pools.iter().filter(|pool| pool.is_master())
    }

    /// Total number of control plane nodes across all master pools.
    pub fn master_count(&self) -> u32 {
        self.master_node_pools().map(|pool| pool.size).sum()
    }

    /// Name of the first control plane VM, used to resolve the API address.
    pub fn first_master_vm_name(&self) -> Option<String> {
        self.master_node_pools()
            .find(|pool| pool.size > 0)
            .map(|pool| vm_name(&self.name, &pool.name, 1))
    }

    pub fn is_idle(&self) -> bool {
        self.active_workflow_id.is_empty()
    }
}

/// Audit record of a status transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusHistoryRecord {
    pub cluster_id: ClusterId,
    pub cluster_name: String,
    pub from_status: ClusterStatus,
    pub from_status_message: String,
    pub to_status: ClusterStatus,
    pub to_status_message: String,
    pub created_at: DateTime<Utc>,
}

/// Placement of the cluster's VMs in the virtualization backend
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Placement {
    pub folder: String,
    pub resource_pool: String,
    pub datastore: String,
}

/// Request to create a cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateClusterParams {
    pub organization_id: OrganizationId,
    pub created_by: UserId,
    pub name: String,
    pub secret_id: String,
    pub ssh_secret_id: String,
    pub kubernetes: KubernetesSettings,
    pub http_proxy: HttpProxy,
    pub placement: Placement,
    pub node_pools: Vec<NodePool>,
}

/// Request to update the node pools of a cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateClusterParams {
    pub updated_by: UserId,
    pub node_pools: Vec<NodePool>,
}
