//! Validation and defaulting of cluster and node pool requests.
//!
//! Runs before any side effect. Every failure is an
//! `AppError::ValidationError`, which the engine never retries.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

use crate::core::traits::{SecretKind, SecretStore};
use crate::domain::entities::{
    Cluster, CreateClusterParams, NodePool, NodePoolRole, OrganizationId, UpdateClusterParams, UserId,
};
use crate::error::{AppError, Result};

pub const MIN_RAM_MIB: u32 = 4;
const MAX_CLUSTER_NAME_LEN: usize = 40;
const MAX_NODE_POOL_NAME_LEN: usize = 20;

/// Prepares node pools of create and update requests
#[derive(Debug, Clone)]
pub struct NodePoolPreparer {
    max_ram_mib: u32,
}

impl NodePoolPreparer {
    pub fn new(max_ram_mib: u32) -> Self {
        Self { max_ram_mib }
    }

    /// Prepare every pool of a request against the persisted pools.
    ///
    /// `user_id` becomes the creator of pools that do not exist yet.
    pub fn prepare_all(&self, pools: &mut [NodePool], existing: &[NodePool], user_id: UserId) -> Result<()> {
        let mut seen = HashSet::new();
        for pool in pools.iter() {
            if !seen.insert(pool.name.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate node pool name {:?}",
                    pool.name
                )));
            }
        }

        for pool in pools.iter_mut() {
            let persisted = existing.iter().find(|p| p.name == pool.name);
            self.prepare(pool, persisted, user_id)?;
        }
        Ok(())
    }

    pub fn prepare(&self, pool: &mut NodePool, existing: Option<&NodePool>, user_id: UserId) -> Result<()> {
        validate_name("node pool", &pool.name, MAX_NODE_POOL_NAME_LEN)?;

        // Zero RAM on an existing pool means "keep what is persisted"
        if !(existing.is_some() && pool.ram_mib == 0) {
            self.validate_ram(&pool.name, pool.ram_mib)?;
        }

        match existing {
            None => {
                if pool.roles.is_empty() {
                    pool.roles = vec![NodePoolRole::Worker];
                }
                if pool.created_by == 0 {
                    pool.created_by = user_id;
                }
                if pool.vcpu == 0 {
                    return Err(AppError::validation(format!(
                        "node pool {}: vcpu must be greater than 0",
                        pool.name
                    )));
                }
                if pool.template_name.is_empty() {
                    return Err(AppError::validation(format!(
                        "node pool {}: template name must not be empty",
                        pool.name
                    )));
                }
            }
            Some(existing) => {
                let name = pool.name.clone();
                keep_existing(&name, "created_by", &mut pool.created_by, &existing.created_by, |v| *v == 0);
                keep_existing(&name, "roles", &mut pool.roles, &existing.roles, Vec::is_empty);
                keep_existing(&name, "ram_mib", &mut pool.ram_mib, &existing.ram_mib, |v| *v == 0);
                keep_existing(&name, "vcpu", &mut pool.vcpu, &existing.vcpu, |v| *v == 0);
                keep_existing(
                    &name,
                    "template_name",
                    &mut pool.template_name,
                    &existing.template_name,
                    String::is_empty,
                );
                keep_existing(
                    &name,
                    "admin_username",
                    &mut pool.admin_username,
                    &existing.admin_username,
                    String::is_empty,
                );
                if pool.labels.is_empty() {
                    pool.labels = existing.labels.clone();
                }
            }
        }

        // Roles are final only once the persisted ones have been restored
        if pool.is_master() && pool.size == 0 {
            pool.size = 1;
        }
        Ok(())
    }

    fn validate_ram(&self, pool_name: &str, ram_mib: u32) -> Result<()> {
        if ram_mib < MIN_RAM_MIB || ram_mib > self.max_ram_mib {
            return Err(AppError::validation(format!(
                "node pool {}: ram must be between {} and {} MiB, got {}",
                pool_name, MIN_RAM_MIB, self.max_ram_mib, ram_mib
            )));
        }
        if ram_mib % 4 != 0 {
            return Err(AppError::validation(format!(
                "node pool {}: ram must be a multiple of 4 MiB, got {}",
                pool_name, ram_mib
            )));
        }
        Ok(())
    }
}

/// Existing value wins; an unspecified incoming value is filled in, a
/// differing one is logged and overwritten.
fn keep_existing<T>(pool: &str, field: &str, incoming: &mut T, existing: &T, unspecified: impl Fn(&T) -> bool)
where
    T: Clone + PartialEq + Debug,
{
    if !unspecified(incoming) && incoming != existing {
        warn!(
            node_pool = pool,
            field = field,
            incoming = ?incoming,
            existing = ?existing,
            "Node pool field differs from the persisted value, keeping the persisted value"
        );
    }
    *incoming = existing.clone();
}

/// Prepares cluster create and update requests
pub struct ClusterPreparer {
    secrets: Arc<dyn SecretStore>,
    node_pools: NodePoolPreparer,
}

impl ClusterPreparer {
    pub fn new(secrets: Arc<dyn SecretStore>, max_ram_mib: u32) -> Self {
        Self {
            secrets,
            node_pools: NodePoolPreparer::new(max_ram_mib),
        }
    }

    pub async fn prepare_create(&self, params: &mut CreateClusterParams) -> Result<()> {
        validate_cluster_name(&params.name)?;
        if params.organization_id == 0 {
            return Err(AppError::validation("organization id must be set"));
        }
        if params.kubernetes.version.is_empty() {
            return Err(AppError::validation("kubernetes version must be set"));
        }

        if params.secret_id.is_empty() {
            return Err(AppError::validation("compute secret id must be set"));
        }
        self.check_secret(params.organization_id, &params.secret_id, &[SecretKind::Vsphere])
            .await?;
        if !params.ssh_secret_id.is_empty() {
            self.check_secret(params.organization_id, &params.ssh_secret_id, &[SecretKind::Ssh])
                .await?;
        }
        for endpoint in [&params.http_proxy.http, &params.http_proxy.https].into_iter().flatten() {
            if endpoint.host.is_empty() {
                return Err(AppError::validation("proxy host must not be empty"));
            }
            if let Some(secret_id) = endpoint.secret_id.as_deref().filter(|id| !id.is_empty()) {
                self.check_secret(params.organization_id, secret_id, &[SecretKind::Password])
                    .await?;
            }
        }

        if params.node_pools.is_empty() {
            return Err(AppError::validation("at least one node pool is required"));
        }
        self.node_pools
            .prepare_all(&mut params.node_pools, &[], params.created_by)?;
        if !params.node_pools.iter().any(NodePool::is_master) {
            return Err(AppError::validation("a cluster needs at least one master node pool"));
        }

        Ok(())
    }

    pub fn prepare_update(&self, cluster: &Cluster, params: &mut UpdateClusterParams) -> Result<()> {
        self.node_pools
            .prepare_all(&mut params.node_pools, &cluster.node_pools, params.updated_by)?;

        for master in cluster.master_node_pools() {
            if !params.node_pools.iter().any(|pool| pool.name == master.name) {
                return Err(AppError::validation(format!(
                    "master node pool {} cannot be removed",
                    master.name
                )));
            }
        }
        Ok(())
    }

    async fn check_secret(&self, organization_id: OrganizationId, secret_id: &str, kinds: &[SecretKind]) -> Result<()> {
        let secret = match self.secrets.get(organization_id, secret_id).await {
            Ok(secret) => secret,
            Err(err) if err.is_not_found() => {
                return Err(AppError::validation(format!("secret {} does not exist", secret_id)));
            }
            Err(err) => return Err(err),
        };

        if !kinds.contains(&secret.kind) {
            return Err(AppError::validation(format!(
                "secret {} has type {:?}, expected one of {:?}",
                secret_id, secret.kind, kinds
            )));
        }
        Ok(())
    }
}

/// Cluster and node pool names become VM and host name parts
fn validate_name(kind: &str, name: &str, max_len: usize) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= max_len
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');

    if valid {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "invalid {} name {:?}: use up to {} lowercase letters, digits and dashes",
            kind, name, max_len
        )))
    }
}

fn validate_cluster_name(name: &str) -> Result<()> {
    validate_name("cluster", name, MAX_CLUSTER_NAME_LEN)
}

/// Labels that will be applied to a pool's nodes
pub fn node_pool_labels(pool: &NodePool) -> BTreeMap<String, String> {
    let mut labels = pool.labels.clone();
    labels.insert("nodepool.vmkube.io/name".to_string(), pool.name.clone());
    labels
}
