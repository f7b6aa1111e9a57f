//! Node template factory: turns a node pool into per-VM bootstrap scripts
//! and placement requests.

use base64ct::{Base64, Encoding};
use flate2::{write::GzEncoder, Compression};
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::ops::RangeInclusive;
use std::sync::Arc;
use url::Url;

use crate::core::traits::{
    SecretStore, PROXY_PASSWORD_SECRET_KEY, PROXY_USERNAME_SECRET_KEY, SSH_PUBLIC_KEY_SECRET_KEY,
};
use crate::domain::entities::{vm_name, Cluster, HttpProxy, NodePool, OrganizationId, ProxyEndpoint};
use crate::error::{AppError, Result};

pub const MASTER_TAINT: &str = "node-role.kubernetes.io/master:NoSchedule";

const MASTER_SCRIPT_TEMPLATE: &str = r#"#!/bin/sh
set -e
export HTTP_PROXY="{{ common.proxy.http_proxy }}"
export HTTPS_PROXY="{{ common.proxy.https_proxy }}"
export NO_PROXY="{{ common.proxy.no_proxy }}"

curl -fsSL "{{ common.pipeline_url }}/api/bootstrap/kubeadm.sh" -o /usr/local/bin/vmkube-bootstrap
chmod +x /usr/local/bin/vmkube-bootstrap

vmkube-bootstrap install master \
  --pipeline-url "{{ common.pipeline_url }}" \
  --token "{{ common.token }}" \
  --org-id "{{ common.organization_id }}" \
  --cluster-id "{{ common.cluster_id }}" \
  --cluster-name "{{ common.cluster_name }}" \
  --nodepool "{{ common.node_pool_name }}" \
  --kubernetes-version "{{ common.kubernetes_version }}" \
  --kubernetes-master-mode "{{ master_mode }}" \
  --kubernetes-network-provider "{{ network_provider }}" \
  --kubernetes-service-cidr "{{ service_cidr }}" \
  --kubernetes-pod-cidr "{{ pod_cidr }}" \
  --kubernetes-api-server-address "{{ api_server_address }}" \
  --kubernetes-rbac "{{ rbac_enabled }}" \
  --kubernetes-oidc "{{ oidc_enabled }}" \
  --taints "{{ common.taints }}" \
  --labels "{{ common.labels|items|map('join', '=')|join(',') }}"
"#;

const WORKER_SCRIPT_TEMPLATE: &str = r#"#!/bin/sh
set -e
export HTTP_PROXY="{{ common.proxy.http_proxy }}"
export HTTPS_PROXY="{{ common.proxy.https_proxy }}"
export NO_PROXY="{{ common.proxy.no_proxy }}"

curl -fsSL "{{ common.pipeline_url }}/api/bootstrap/kubeadm.sh" -o /usr/local/bin/vmkube-bootstrap
chmod +x /usr/local/bin/vmkube-bootstrap

vmkube-bootstrap install worker \
  --pipeline-url "{{ common.pipeline_url }}" \
  --token "{{ common.token }}" \
  --org-id "{{ common.organization_id }}" \
  --cluster-id "{{ common.cluster_id }}" \
  --cluster-name "{{ common.cluster_name }}" \
  --nodepool "{{ common.node_pool_name }}" \
  --kubernetes-version "{{ common.kubernetes_version }}" \
  --kubernetes-master-address "{{ public_address }}" \
  --taints "{{ common.taints }}" \
  --labels "{{ common.labels|items|map('join', '=')|join(',') }}"
"#;

/// Proxy settings with credentials resolved, ready for the environment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedProxy {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MasterMode {
    Default,
    Ha,
}

impl MasterMode {
    pub fn for_master_count(count: u32) -> Self {
        if count > 1 {
            MasterMode::Ha
        } else {
            MasterMode::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MasterMode::Default => "default",
            MasterMode::Ha => "ha",
        }
    }
}

/// Parameters shared by master and worker scripts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptCommon {
    pub pipeline_url: String,
    pub organization_id: OrganizationId,
    pub cluster_id: String,
    pub cluster_name: String,
    pub node_pool_name: String,
    /// One-time join token
    pub token: String,
    pub kubernetes_version: String,
    pub proxy: ResolvedProxy,
    pub taints: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MasterScriptParams {
    pub common: ScriptCommon,
    pub master_mode: MasterMode,
    pub network_provider: String,
    pub service_cidr: String,
    pub pod_cidr: String,
    pub api_server_address: String,
    pub rbac_enabled: bool,
    pub oidc_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerScriptParams {
    pub common: ScriptCommon,
    /// Address of the master the worker joins, empty when the worker
    /// discovers it through the pipeline
    pub public_address: String,
}

/// Bootstrap script of one node, by role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BootstrapScript {
    Master(MasterScriptParams),
    Worker(WorkerScriptParams),
}

impl BootstrapScript {
    pub fn common(&self) -> &ScriptCommon {
        match self {
            BootstrapScript::Master(params) => &params.common,
            BootstrapScript::Worker(params) => &params.common,
        }
    }

    fn common_mut(&mut self) -> &mut ScriptCommon {
        match self {
            BootstrapScript::Master(params) => &mut params.common,
            BootstrapScript::Worker(params) => &mut params.common,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, BootstrapScript::Master(_))
    }

    pub fn render(&self) -> Result<String> {
        match self {
            BootstrapScript::Master(params) => render_script(MASTER_SCRIPT_TEMPLATE, params),
            BootstrapScript::Worker(params) => render_script(WORKER_SCRIPT_TEMPLATE, params),
        }
    }
}

/// Render a bootstrap script. Undefined values render as an empty string.
pub fn render_script<S: Serialize>(template: &str, params: &S) -> Result<String> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.render_str(template, params)
        .map_err(|e| AppError::InternalServerError(format!("cannot render bootstrap script: {}", e)))
}

/// gzip, then base64: the encoding of the `guestinfo.userdata` metadata
pub fn encode_guest_data(data: &str) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(Base64::encode_string(&compressed))
}

/// Everything needed to create the VM of one node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub node_pool_name: String,
    pub admin_username: String,
    pub vcpu: u32,
    pub ram_mib: u32,
    pub template_name: String,
    pub ssh_public_key: String,
    pub script: BootstrapScript,
}

impl NodeSpec {
    pub fn is_master(&self) -> bool {
        self.script.is_master()
    }

    pub fn set_proxy(&mut self, proxy: &ResolvedProxy) {
        self.script.common_mut().proxy = proxy.clone();
    }

    /// Point a worker at the master it joins; no-op for masters
    pub fn set_master_address(&mut self, address: &str) {
        if let BootstrapScript::Worker(params) = &mut self.script {
            params.public_address = address.to_string();
        }
    }
}

/// Per-request inputs shared by every node spec
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub token: String,
    pub ssh_public_key: String,
    pub proxy: ResolvedProxy,
}

pub struct NodeTemplateFactory {
    pipeline_url: String,
    secrets: Arc<dyn SecretStore>,
}

impl NodeTemplateFactory {
    pub fn new(pipeline_url: impl Into<String>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            pipeline_url: pipeline_url.into(),
            secrets,
        }
    }

    /// Issue a join token and resolve the SSH key and proxy of a cluster
    pub async fn context(&self, cluster: &Cluster) -> Result<TemplateContext> {
        let token = self
            .secrets
            .issue_join_token(cluster.organization_id, cluster.id)
            .await?;

        let ssh_public_key = if cluster.ssh_secret_id.is_empty() {
            String::new()
        } else {
            let secret = self
                .secrets
                .get(cluster.organization_id, &cluster.ssh_secret_id)
                .await?;
            secret
                .values
                .get(SSH_PUBLIC_KEY_SECRET_KEY)
                .cloned()
                .unwrap_or_default()
        };

        let proxy = resolve_proxy(self.secrets.as_ref(), cluster.organization_id, &cluster.http_proxy).await?;

        Ok(TemplateContext {
            token,
            ssh_public_key,
            proxy,
        })
    }

    pub fn node_spec(&self, cluster: &Cluster, pool: &NodePool, index: u32, ctx: &TemplateContext) -> NodeSpec {
        let taints = if pool.is_master() && cluster.node_pools.len() > 1 {
            MASTER_TAINT.to_string()
        } else {
            String::new()
        };

        let common = ScriptCommon {
            pipeline_url: self.pipeline_url.clone(),
            organization_id: cluster.organization_id,
            cluster_id: cluster.id.to_string(),
            cluster_name: cluster.name.clone(),
            node_pool_name: pool.name.clone(),
            token: ctx.token.clone(),
            kubernetes_version: cluster.kubernetes.version.clone(),
            proxy: ctx.proxy.clone(),
            taints,
            labels: crate::core::preparer::node_pool_labels(pool),
        };

        let script = if pool.is_master() {
            let network = &cluster.kubernetes.network;
            BootstrapScript::Master(MasterScriptParams {
                common,
                master_mode: MasterMode::for_master_count(cluster.master_count()),
                network_provider: network.provider.clone(),
                service_cidr: network.service_cidr.clone(),
                pod_cidr: network.pod_cidr.clone(),
                api_server_address: network.api_server_address.clone(),
                rbac_enabled: cluster.kubernetes.rbac_enabled,
                oidc_enabled: cluster.kubernetes.oidc_enabled,
            })
        } else {
            BootstrapScript::Worker(WorkerScriptParams {
                common,
                public_address: String::new(),
            })
        };

        NodeSpec {
            name: vm_name(&cluster.name, &pool.name, index),
            node_pool_name: pool.name.clone(),
            admin_username: pool.admin_username.clone(),
            vcpu: pool.vcpu,
            ram_mib: pool.ram_mib,
            template_name: pool.template_name.clone(),
            ssh_public_key: ctx.ssh_public_key.clone(),
            script,
        }
    }

    pub fn node_specs(
        &self,
        cluster: &Cluster,
        pool: &NodePool,
        indices: RangeInclusive<u32>,
        ctx: &TemplateContext,
    ) -> Vec<NodeSpec> {
        indices
            .map(|index| self.node_spec(cluster, pool, index, ctx))
            .collect()
    }
}

/// Resolve the proxy URLs of a cluster, reading credentials from secrets
pub async fn resolve_proxy(
    secrets: &dyn SecretStore,
    organization_id: OrganizationId,
    proxy: &HttpProxy,
) -> Result<ResolvedProxy> {
    let mut resolved = ResolvedProxy {
        no_proxy: proxy.exceptions.join(","),
        ..Default::default()
    };
    if let Some(endpoint) = &proxy.http {
        resolved.http_proxy = proxy_url(secrets, organization_id, endpoint).await?;
    }
    if let Some(endpoint) = &proxy.https {
        resolved.https_proxy = proxy_url(secrets, organization_id, endpoint).await?;
    }
    Ok(resolved)
}

async fn proxy_url(secrets: &dyn SecretStore, organization_id: OrganizationId, endpoint: &ProxyEndpoint) -> Result<String> {
    let scheme = if endpoint.scheme.is_empty() {
        "http"
    } else {
        endpoint.scheme.as_str()
    };
    let mut url = Url::parse(&format!("{}://{}", scheme, endpoint.host))
        .map_err(|e| AppError::validation(format!("invalid proxy host {:?}: {}", endpoint.host, e)))?;

    let invalid = |_| AppError::validation(format!("proxy {} cannot carry a port or credentials", endpoint.host));
    url.set_port(endpoint.port).map_err(invalid)?;

    if let Some(secret_id) = endpoint.secret_id.as_deref().filter(|id| !id.is_empty()) {
        let secret = secrets.get(organization_id, secret_id).await?;
        if let Some(username) = secret.values.get(PROXY_USERNAME_SECRET_KEY) {
            url.set_username(username).map_err(invalid)?;
            if let Some(password) = secret.values.get(PROXY_PASSWORD_SECRET_KEY) {
                url.set_password(Some(password)).map_err(invalid)?;
            }
        }
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ClusterStatus, KubernetesSettings, NodePoolRole};
    use crate::infrastructure::sandbox::SandboxSecretStore;
    use chrono::Utc;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use uuid::Uuid;

    fn pool(name: &str, role: NodePoolRole, size: u32) -> NodePool {
        NodePool {
            name: name.into(),
            roles: vec![role],
            size,
            vcpu: 2,
            ram_mib: 4096,
            template_name: "ubuntu-22.04".into(),
            ..Default::default()
        }
    }

    fn cluster(node_pools: Vec<NodePool>) -> Cluster {
        let now = Utc::now();
        Cluster {
            id: Uuid::new_v4(),
            uid: Uuid::new_v4().to_string(),
            organization_id: 1,
            name: "demo".into(),
            created_by: 1,
            status: ClusterStatus::Creating,
            status_message: String::new(),
            secret_id: "vsphere".into(),
            config_secret_id: String::new(),
            ssh_secret_id: String::new(),
            kubernetes: KubernetesSettings::default(),
            http_proxy: HttpProxy::default(),
            folder: String::new(),
            resource_pool: String::new(),
            datastore: String::new(),
            active_workflow_id: String::new(),
            node_pools,
            created_at: now,
            updated_at: now,
        }
    }

    fn factory() -> NodeTemplateFactory {
        NodeTemplateFactory::new("https://pipeline.example.com", Arc::new(SandboxSecretStore::new()))
    }

    fn spec_of(cluster: &Cluster, pool_name: &str) -> NodeSpec {
        let pool = cluster.node_pool(pool_name).unwrap();
        factory().node_spec(cluster, pool, 1, &TemplateContext::default())
    }

    #[test]
    fn test_sole_master_pool_is_not_tainted() {
        let cluster = cluster(vec![pool("master", NodePoolRole::Master, 1)]);
        let spec = spec_of(&cluster, "master");

        assert!(spec.is_master());
        assert_eq!(spec.script.common().taints, "");
    }

    #[test]
    fn test_master_is_tainted_when_workers_exist() {
        let cluster = cluster(vec![
            pool("master", NodePoolRole::Master, 1),
            pool("workers", NodePoolRole::Worker, 2),
        ]);

        let master = spec_of(&cluster, "master");
        assert_eq!(master.script.common().taints, MASTER_TAINT);
        assert!(master.script.render().unwrap().contains(MASTER_TAINT));

        let worker = spec_of(&cluster, "workers");
        assert!(!worker.is_master());
        assert_eq!(worker.script.common().taints, "");
        assert_eq!(worker.name, "demo-workers-01");
    }

    #[test]
    fn test_master_mode_follows_master_count() {
        let single = cluster(vec![pool("master", NodePoolRole::Master, 1)]);
        let ha = cluster(vec![pool("master", NodePoolRole::Master, 3)]);

        let render = |cluster: &Cluster| spec_of(cluster, "master").script.render().unwrap();
        assert!(render(&single).contains(r#"--kubernetes-master-mode "default""#));
        assert!(render(&ha).contains(r#"--kubernetes-master-mode "ha""#));
    }

    #[test]
    fn test_labels_render_as_comma_separated_pairs() {
        let mut workers = pool("workers", NodePoolRole::Worker, 1);
        workers.labels.insert("tier".into(), "backend".into());
        let cluster = cluster(vec![pool("master", NodePoolRole::Master, 1), workers]);

        let script = spec_of(&cluster, "workers").script.render().unwrap();
        assert!(script.contains(r#"--labels "nodepool.vmkube.io/name=workers,tier=backend""#));
        assert!(script.ends_with('\n'));
    }

    #[test]
    fn test_undefined_values_render_empty() {
        let params = serde_json::json!({ "name": "demo" });
        assert_eq!(
            render_script("cluster={{ name }} addr={{ public_address }}!", &params).unwrap(),
            "cluster=demo addr=!"
        );
        assert!(render_script("open {{ name", &params).is_err());
    }

    #[test]
    fn test_master_mode() {
        assert_eq!(MasterMode::for_master_count(1), MasterMode::Default);
        assert_eq!(MasterMode::for_master_count(3), MasterMode::Ha);
    }

    #[test]
    fn test_guest_data_is_gzip_then_base64() {
        let encoded = encode_guest_data("#!/bin/sh\necho hi\n").unwrap();
        let compressed = Base64::decode_vec(&encoded).unwrap();
        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "#!/bin/sh\necho hi\n");
    }

    #[test]
    fn test_worker_script_carries_master_address() {
        let mut spec = NodeSpec {
            name: "c-workers-01".into(),
            node_pool_name: "workers".into(),
            admin_username: String::new(),
            vcpu: 2,
            ram_mib: 4096,
            template_name: "ubuntu".into(),
            ssh_public_key: String::new(),
            script: BootstrapScript::Worker(WorkerScriptParams {
                common: ScriptCommon {
                    cluster_name: "c".into(),
                    ..Default::default()
                },
                public_address: String::new(),
            }),
        };
        spec.set_master_address("10.0.0.5");

        let script = spec.script.render().unwrap();
        assert!(script.contains("install worker"));
        assert!(script.contains(r#"--kubernetes-master-address "10.0.0.5""#));
    }
}
