//! Virtual machine activities: create, delete and address a node VM.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::engine::Activity;
use crate::core::node_template::{encode_guest_data, NodeSpec};
use crate::core::traits::{CloneSpec, ManagedObjectRef, PowerState, VirtualizationBackend};
use crate::domain::entities::ClusterId;
use crate::error::{AppError, Result};

pub const CREATE_NODE: &str = "create-node";
pub const DELETE_NODE: &str = "delete-node";
pub const GET_PUBLIC_ADDRESS: &str = "get-public-address";

pub const GUESTINFO_USERDATA: &str = "guestinfo.userdata";
pub const GUESTINFO_USERDATA_ENCODING: &str = "guestinfo.userdata.encoding";
pub const GUESTINFO_CLUSTER: &str = "guestinfo.vmkube.cluster";
pub const GUESTINFO_NODE_POOL: &str = "guestinfo.vmkube.nodepool";
const GUESTINFO_CLUSTER_ID: &str = "guestinfo.vmkube.cluster-id";
const GUESTINFO_SSH_KEY: &str = "guestinfo.vmkube.ssh-public-key";
const GUESTINFO_ADMIN_USERNAME: &str = "guestinfo.vmkube.admin-username";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeInput {
    pub cluster_id: ClusterId,
    pub cluster_name: String,
    pub folder: String,
    pub resource_pool: String,
    /// Datastore or datastore cluster name
    pub datastore: String,
    pub node: NodeSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateNodeOutput {
    pub vm: ManagedObjectRef,
    /// A VM with the target name was already present and was not cloned again
    pub already_existed: bool,
}

pub struct CreateNodeActivity {
    backend: Arc<dyn VirtualizationBackend>,
}

impl CreateNodeActivity {
    pub fn new(backend: Arc<dyn VirtualizationBackend>) -> Self {
        Self { backend }
    }

    fn guest_metadata(input: &CreateNodeInput) -> Result<BTreeMap<String, String>> {
        let script = input.node.script.render()?;
        let mut extra_config = BTreeMap::from([
            (GUESTINFO_USERDATA.to_string(), encode_guest_data(&script)?),
            (GUESTINFO_USERDATA_ENCODING.to_string(), "gzip+base64".to_string()),
            (GUESTINFO_CLUSTER.to_string(), input.cluster_name.clone()),
            (GUESTINFO_CLUSTER_ID.to_string(), input.cluster_id.to_string()),
            (GUESTINFO_NODE_POOL.to_string(), input.node.node_pool_name.clone()),
        ]);
        if !input.node.ssh_public_key.is_empty() {
            extra_config.insert(GUESTINFO_SSH_KEY.to_string(), input.node.ssh_public_key.clone());
        }
        if !input.node.admin_username.is_empty() {
            extra_config.insert(GUESTINFO_ADMIN_USERNAME.to_string(), input.node.admin_username.clone());
        }
        Ok(extra_config)
    }

    async fn resolve_datastore(&self, name: &str, spec: &CloneSpec) -> Result<ManagedObjectRef> {
        match self.backend.find_datastore(name).await {
            Ok(datastore) => Ok(datastore),
            Err(err) if err.is_not_found() => {
                let datastore_cluster = self.backend.find_datastore_cluster(name).await?;
                let recommended = self
                    .backend
                    .recommend_datastore(&datastore_cluster, spec)
                    .await?;
                info!(
                    vm_name = %spec.name,
                    datastore_cluster = name,
                    datastore = %recommended.value,
                    "Using recommended datastore of datastore cluster"
                );
                Ok(recommended)
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Activity for CreateNodeActivity {
    type Input = CreateNodeInput;
    type Output = CreateNodeOutput;

    fn name(&self) -> &'static str {
        CREATE_NODE
    }

    async fn execute(&self, input: CreateNodeInput) -> Result<CreateNodeOutput> {
        let vm_name = input.node.name.clone();

        let mut existing = self.backend.find_vms_by_name(&vm_name).await?;
        match existing.len() {
            0 => {}
            1 => {
                let vm = existing.remove(0);
                if self.backend.power_state(&vm).await? != PowerState::PoweredOn {
                    let task = self.backend.power_on_vm(&vm).await?;
                    self.backend.wait_for_task(&task).await?;
                }
                info!(vm_name = %vm_name, "VM already exists, not cloning again");
                return Ok(CreateNodeOutput {
                    vm,
                    already_existed: true,
                });
            }
            count => {
                return Err(AppError::Conflict(format!(
                    "{} virtual machines are named {}",
                    count, vm_name
                )));
            }
        }

        let extra_config = Self::guest_metadata(&input)?;
        let folder = self.backend.find_folder(&input.folder).await?;
        let resource_pool = self.backend.find_resource_pool(&input.resource_pool).await?;
        let template = self.backend.find_template(&input.node.template_name).await?;

        let mut spec = CloneSpec {
            name: vm_name.clone(),
            folder,
            resource_pool,
            datastore: ManagedObjectRef::new("Datastore", ""),
            num_cpus: input.node.vcpu,
            memory_mib: input.node.ram_mib,
            power_on: true,
            extra_config,
        };
        spec.datastore = self.resolve_datastore(&input.datastore, &spec).await?;

        info!(
            vm_name = %vm_name,
            template = %input.node.template_name,
            vcpu = spec.num_cpus,
            ram_mib = spec.memory_mib,
            "Cloning node VM"
        );
        let task = self.backend.clone_vm(&template, &spec).await?;
        let outcome = self.backend.wait_for_task(&task).await?;
        let vm = outcome.result.ok_or_else(|| {
            AppError::VirtualizationError(format!("clone of {} returned no VM reference", vm_name))
        })?;

        Ok(CreateNodeOutput {
            vm,
            already_existed: false,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteNodeInput {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteNodeOutput {
    pub existed: bool,
}

pub struct DeleteNodeActivity {
    backend: Arc<dyn VirtualizationBackend>,
}

impl DeleteNodeActivity {
    pub fn new(backend: Arc<dyn VirtualizationBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Activity for DeleteNodeActivity {
    type Input = DeleteNodeInput;
    type Output = DeleteNodeOutput;

    fn name(&self) -> &'static str {
        DELETE_NODE
    }

    async fn execute(&self, input: DeleteNodeInput) -> Result<DeleteNodeOutput> {
        let mut vms = self.backend.find_vms_by_name(&input.name).await?;
        if vms.len() != 1 {
            warn!(
                vm_name = %input.name,
                matches = vms.len(),
                "Expected exactly one VM, treating node as already deleted"
            );
            return Ok(DeleteNodeOutput { existed: false });
        }
        let vm = vms.remove(0);

        if self.backend.power_state(&vm).await? == PowerState::PoweredOn {
            let task = self.backend.power_off_vm(&vm).await?;
            self.backend.wait_for_task(&task).await?;
        }

        let task = self.backend.destroy_vm(&vm).await?;
        self.backend.wait_for_task(&task).await?;

        info!(vm_name = %input.name, "Node VM deleted");
        Ok(DeleteNodeOutput { existed: true })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPublicAddressInput {
    pub name: String,
}

pub struct GetPublicAddressActivity {
    backend: Arc<dyn VirtualizationBackend>,
}

impl GetPublicAddressActivity {
    pub fn new(backend: Arc<dyn VirtualizationBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Activity for GetPublicAddressActivity {
    type Input = GetPublicAddressInput;
    type Output = String;

    fn name(&self) -> &'static str {
        GET_PUBLIC_ADDRESS
    }

    async fn execute(&self, input: GetPublicAddressInput) -> Result<String> {
        let mut vms = self.backend.find_vms_by_name(&input.name).await?;
        let vm = match vms.len() {
            0 => return Err(AppError::not_found("virtual machine", input.name)),
            1 => vms.remove(0),
            count => {
                return Err(AppError::Conflict(format!(
                    "{} virtual machines are named {}",
                    count, input.name
                )))
            }
        };

        let address = self.backend.wait_for_ip(&vm).await?;
        Ok(address.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sandbox::SandboxVirtualization;

    fn delete_node(backend: &Arc<SandboxVirtualization>) -> DeleteNodeActivity {
        DeleteNodeActivity::new(backend.clone())
    }

    fn input(name: &str) -> DeleteNodeInput {
        DeleteNodeInput { name: name.to_string() }
    }

    #[tokio::test]
    async fn test_delete_node_without_vm_reports_absent() {
        let backend = Arc::new(SandboxVirtualization::new());

        let output = delete_node(&backend).execute(input("demo-workers-01")).await.unwrap();
        assert!(!output.existed);
    }

    #[tokio::test]
    async fn test_delete_node_powers_off_then_destroys() {
        let backend = Arc::new(SandboxVirtualization::new());
        let vm = backend.add_vm("demo-workers-01", PowerState::PoweredOn).await;
        backend.add_vm("demo-workers-02", PowerState::PoweredOn).await;

        // Destroying is never reached while powering off fails
        backend.failures().fail("power_off_vm", &vm.value, 1).await;
        let err = delete_node(&backend)
            .execute(input("demo-workers-01"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(backend.vm_names().await, vec!["demo-workers-01", "demo-workers-02"]);

        let output = delete_node(&backend).execute(input("demo-workers-01")).await.unwrap();
        assert!(output.existed);
        assert_eq!(backend.vm_names().await, vec!["demo-workers-02"]);
    }

    #[tokio::test]
    async fn test_delete_node_skips_power_off_when_already_off() {
        let backend = Arc::new(SandboxVirtualization::new());
        let vm = backend.add_vm("demo-workers-01", PowerState::PoweredOff).await;
        backend.failures().fail_always("power_off_vm", &vm.value).await;

        let output = delete_node(&backend).execute(input("demo-workers-01")).await.unwrap();
        assert!(output.existed);
        assert!(backend.vm_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_node_with_ambiguous_name_touches_nothing() {
        let backend = Arc::new(SandboxVirtualization::new());
        backend.add_vm("demo-workers-01", PowerState::PoweredOn).await;
        backend.add_vm("demo-workers-01", PowerState::PoweredOn).await;

        let output = delete_node(&backend).execute(input("demo-workers-01")).await.unwrap();
        assert!(!output.existed);
        assert_eq!(backend.vm_names().await.len(), 2);
    }

    #[tokio::test]
    async fn test_public_address_of_missing_vm_is_not_found() {
        let backend = Arc::new(SandboxVirtualization::new());
        let activity = GetPublicAddressActivity::new(backend.clone());

        let err = activity
            .execute(GetPublicAddressInput { name: "demo-master-01".into() })
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        backend.add_vm("demo-master-01", PowerState::PoweredOn).await;
        let address = activity
            .execute(GetPublicAddressInput { name: "demo-master-01".into() })
            .await
            .unwrap();
        assert!(address.starts_with("10.0."));
    }
}
