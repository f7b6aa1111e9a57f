//! Core traits and interfaces for the system
//!
//! This module defines the contracts of the external collaborators the
//! orchestration engine drives: the virtualization backend, the Kubernetes
//! API of a managed cluster, the secret store, the chart deployer and the
//! OIDC client issuer. Implementations report missing resources as
//! `AppError::NotFound`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::domain::entities::{ClusterId, OrganizationId};
use crate::error::Result;

/// Opaque reference to an object managed by the virtualization backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ManagedObjectRef {
    pub kind: String,
    pub value: String,
}

impl ManagedObjectRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Handle of an asynchronous backend task (clone, power off, destroy)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRef(pub String);

/// Result of a finished backend task
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    /// The object produced by the task, e.g. the cloned VM
    pub result: Option<ManagedObjectRef>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

/// Everything the backend needs to clone a template into a node VM
#[derive(Debug, Clone)]
pub struct CloneSpec {
    pub name: String,
    pub folder: ManagedObjectRef,
    pub resource_pool: ManagedObjectRef,
    pub datastore: ManagedObjectRef,
    pub num_cpus: u32,
    pub memory_mib: u32,
    pub power_on: bool,
    /// Guest metadata (bootstrap script, tags)
    pub extra_config: BTreeMap<String, String>,
}

/// Capabilities consumed from the virtualization backend
#[async_trait]
pub trait VirtualizationBackend: Send + Sync {
    async fn find_folder(&self, name: &str) -> Result<ManagedObjectRef>;

    async fn find_resource_pool(&self, name: &str) -> Result<ManagedObjectRef>;

    async fn find_template(&self, name: &str) -> Result<ManagedObjectRef>;

    async fn find_datastore(&self, name: &str) -> Result<ManagedObjectRef>;

    async fn find_datastore_cluster(&self, name: &str) -> Result<ManagedObjectRef>;

    /// Ask the storage placement API for a datastore of a datastore cluster
    async fn recommend_datastore(
        &self,
        datastore_cluster: &ManagedObjectRef,
        spec: &CloneSpec,
    ) -> Result<ManagedObjectRef>;

    /// Every VM carrying exactly this name
    async fn find_vms_by_name(&self, name: &str) -> Result<Vec<ManagedObjectRef>>;

    async fn clone_vm(&self, template: &ManagedObjectRef, spec: &CloneSpec) -> Result<TaskRef>;

    async fn power_state(&self, vm: &ManagedObjectRef) -> Result<PowerState>;

    async fn power_on_vm(&self, vm: &ManagedObjectRef) -> Result<TaskRef>;

    async fn power_off_vm(&self, vm: &ManagedObjectRef) -> Result<TaskRef>;

    async fn destroy_vm(&self, vm: &ManagedObjectRef) -> Result<TaskRef>;

    async fn wait_for_task(&self, task: &TaskRef) -> Result<TaskOutcome>;

    /// Block until the guest reports an externally reachable address
    async fn wait_for_ip(&self, vm: &ManagedObjectRef) -> Result<IpAddr>;
}

/// Reference to the kubeconfig secret of a managed cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KubeConfigRef {
    pub organization_id: OrganizationId,
    pub secret_id: String,
}

/// Kubernetes node as seen by the control plane
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KubernetesNode {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// Capabilities consumed from the Kubernetes API of a managed cluster
#[async_trait]
pub trait KubernetesApi: Send + Sync {
    async fn get_node(&self, kubeconfig: &KubeConfigRef, name: &str) -> Result<KubernetesNode>;

    async fn delete_node(&self, kubeconfig: &KubeConfigRef, name: &str) -> Result<()>;

    /// Merge `labels` into the labels of the node
    async fn label_node(
        &self,
        kubeconfig: &KubeConfigRef,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()>;

    async fn ensure_namespace(&self, kubeconfig: &KubeConfigRef, namespace: &str) -> Result<()>;

    /// Bind the cluster-admin role to `user`
    async fn ensure_cluster_admin_binding(&self, kubeconfig: &KubeConfigRef, user: &str) -> Result<()>;

    async fn list_namespaces(&self, kubeconfig: &KubeConfigRef) -> Result<Vec<String>>;

    async fn delete_namespace(&self, kubeconfig: &KubeConfigRef, namespace: &str) -> Result<()>;
}

/// Kind of a stored secret, checked by the preparer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecretKind {
    /// Virtualization backend credentials
    Vsphere,
    Ssh,
    Kubernetes,
    ClusterCa,
    Password,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretItem {
    pub id: String,
    pub name: String,
    pub kind: SecretKind,
    pub values: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

/// Request to store a secret.
///
/// For `Ssh` and `ClusterCa` kinds with empty `values` the backend issues
/// the key material itself.
#[derive(Debug, Clone)]
pub struct NewSecret {
    pub name: String,
    pub kind: SecretKind,
    pub values: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

/// Key of the kubeconfig payload in a `Kubernetes` secret
pub const KUBECONFIG_SECRET_KEY: &str = "K8SConfig";
/// Key of the public key in an `Ssh` secret
pub const SSH_PUBLIC_KEY_SECRET_KEY: &str = "public_key_data";
pub const PROXY_USERNAME_SECRET_KEY: &str = "username";
pub const PROXY_PASSWORD_SECRET_KEY: &str = "password";

/// Tag attached to every secret issued for a cluster
pub fn cluster_secret_tag(cluster_uid: &str) -> String {
    format!("clusterUID:{}", cluster_uid)
}

/// Credential and secret storage
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, organization_id: OrganizationId, secret_id: &str) -> Result<SecretItem>;

    async fn get_by_name(&self, organization_id: OrganizationId, name: &str) -> Result<SecretItem>;

    /// Store a secret, replacing one with the same name; returns its id
    async fn create(&self, organization_id: OrganizationId, secret: NewSecret) -> Result<String>;

    async fn delete(&self, organization_id: OrganizationId, secret_id: &str) -> Result<()>;

    async fn list_by_tag(&self, organization_id: OrganizationId, tag: &str) -> Result<Vec<SecretItem>>;

    /// Issue a one-time token a node presents when joining the cluster
    async fn issue_join_token(
        &self,
        organization_id: OrganizationId,
        cluster_id: ClusterId,
    ) -> Result<String>;
}

/// A deployed chart release
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub namespace: String,
}

/// Chart/release deployment subsystem
#[async_trait]
pub trait ChartDeployer: Send + Sync {
    async fn list_releases(&self, kubeconfig: &KubeConfigRef) -> Result<Vec<Release>>;

    async fn delete_release(&self, kubeconfig: &KubeConfigRef, release: &Release) -> Result<()>;
}

/// Issuer of OIDC clients for clusters with OIDC enabled
#[async_trait]
pub trait OidcClientManager: Send + Sync {
    async fn delete_client(&self, organization_id: OrganizationId, cluster_uid: &str) -> Result<()>;
}
