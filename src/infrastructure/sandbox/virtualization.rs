use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use tokio::sync::Mutex;
use tracing::debug;

use super::FailureInjector;
use crate::core::traits::{
    CloneSpec, ManagedObjectRef, PowerState, TaskOutcome, TaskRef, VirtualizationBackend,
};
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct SandboxVm {
    pub moref: ManagedObjectRef,
    pub name: String,
    pub power_state: PowerState,
    pub num_cpus: u32,
    pub memory_mib: u32,
    pub datastore: String,
    pub extra_config: BTreeMap<String, String>,
    pub address: IpAddr,
}

#[derive(Default)]
struct Inventory {
    vms: BTreeMap<String, SandboxVm>,
    tasks: HashMap<String, Option<ManagedObjectRef>>,
    /// Names `find_*` reports as missing
    missing: HashSet<String>,
    next_id: u32,
    clone_calls: u32,
}

impl Inventory {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn task(&mut self, result: Option<ManagedObjectRef>) -> TaskRef {
        let id = format!("task-{}", self.next_id());
        self.tasks.insert(id.clone(), result);
        TaskRef(id)
    }

    fn vm_mut(&mut self, vm: &ManagedObjectRef) -> Result<&mut SandboxVm> {
        self.vms
            .get_mut(&vm.value)
            .ok_or_else(|| AppError::not_found("virtual machine", vm.value.clone()))
    }
}

/// Virtualization backend keeping its inventory in memory
#[derive(Default)]
pub struct SandboxVirtualization {
    inventory: Mutex<Inventory>,
    failures: FailureInjector,
}

impl SandboxVirtualization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> &FailureInjector {
        &self.failures
    }

    /// Make lookups of `name` (folder, pool, template or datastore) fail
    pub async fn set_missing(&self, name: &str) {
        self.inventory.lock().await.missing.insert(name.to_string());
    }

    /// Register a VM as if created outside the control plane
    pub async fn add_vm(&self, name: &str, power_state: PowerState) -> ManagedObjectRef {
        let mut inventory = self.inventory.lock().await;
        let id = inventory.next_id();
        let vm = SandboxVm {
            moref: ManagedObjectRef::new("VirtualMachine", format!("vm-{}", id)),
            name: name.to_string(),
            power_state,
            num_cpus: 0,
            memory_mib: 0,
            datastore: String::new(),
            extra_config: BTreeMap::new(),
            address: address_for(id),
        };
        let moref = vm.moref.clone();
        inventory.vms.insert(moref.value.clone(), vm);
        moref
    }

    pub async fn vm(&self, name: &str) -> Option<SandboxVm> {
        self.inventory
            .lock()
            .await
            .vms
            .values()
            .find(|vm| vm.name == name)
            .cloned()
    }

    /// Sorted names of every VM
    pub async fn vm_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inventory
            .lock()
            .await
            .vms
            .values()
            .map(|vm| vm.name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn clone_calls(&self) -> u32 {
        self.inventory.lock().await.clone_calls
    }

    async fn find(&self, kind: &'static str, object_type: &str, name: &str) -> Result<ManagedObjectRef> {
        if self.inventory.lock().await.missing.contains(name) {
            return Err(AppError::not_found(kind, name));
        }
        Ok(ManagedObjectRef::new(object_type, name))
    }

    async fn injected(&self, operation: &str, target: &str) -> Result<()> {
        if self.failures.should_fail(operation, target).await {
            return Err(AppError::VirtualizationError(format!(
                "{} failed for {}",
                operation, target
            )));
        }
        Ok(())
    }
}

fn address_for(id: u32) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, (id / 250) as u8, (id % 250 + 2) as u8))
}

#[async_trait]
impl VirtualizationBackend for SandboxVirtualization {
    async fn find_folder(&self, name: &str) -> Result<ManagedObjectRef> {
        self.find("folder", "Folder", name).await
    }

    async fn find_resource_pool(&self, name: &str) -> Result<ManagedObjectRef> {
        self.find("resource pool", "ResourcePool", name).await
    }

    async fn find_template(&self, name: &str) -> Result<ManagedObjectRef> {
        self.find("template", "VirtualMachine", name).await
    }

    async fn find_datastore(&self, name: &str) -> Result<ManagedObjectRef> {
        self.find("datastore", "Datastore", name).await
    }

    /// Missing only when `"{name}-cluster"` was marked missing
    async fn find_datastore_cluster(&self, name: &str) -> Result<ManagedObjectRef> {
        self.find("datastore cluster", "StoragePod", &format!("{}-cluster", name))
            .await
            .map(|_| ManagedObjectRef::new("StoragePod", name))
    }

    async fn recommend_datastore(
        &self,
        datastore_cluster: &ManagedObjectRef,
        _spec: &CloneSpec,
    ) -> Result<ManagedObjectRef> {
        Ok(ManagedObjectRef::new(
            "Datastore",
            format!("{}-member-1", datastore_cluster.value),
        ))
    }

    async fn find_vms_by_name(&self, name: &str) -> Result<Vec<ManagedObjectRef>> {
        self.injected("find_vms_by_name", name).await?;
        Ok(self
            .inventory
            .lock()
            .await
            .vms
            .values()
            .filter(|vm| vm.name == name)
            .map(|vm| vm.moref.clone())
            .collect())
    }

    async fn clone_vm(&self, _template: &ManagedObjectRef, spec: &CloneSpec) -> Result<TaskRef> {
        self.inventory.lock().await.clone_calls += 1;
        self.injected("clone_vm", &spec.name).await?;

        let mut inventory = self.inventory.lock().await;
        let id = inventory.next_id();
        let vm = SandboxVm {
            moref: ManagedObjectRef::new("VirtualMachine", format!("vm-{}", id)),
            name: spec.name.clone(),
            power_state: if spec.power_on {
                PowerState::PoweredOn
            } else {
                PowerState::PoweredOff
            },
            num_cpus: spec.num_cpus,
            memory_mib: spec.memory_mib,
            datastore: spec.datastore.value.clone(),
            extra_config: spec.extra_config.clone(),
            address: address_for(id),
        };
        let moref = vm.moref.clone();
        inventory.vms.insert(moref.value.clone(), vm);
        debug!(vm = %spec.name, moref = %moref.value, "Sandbox VM cloned");
        Ok(inventory.task(Some(moref)))
    }

    async fn power_state(&self, vm: &ManagedObjectRef) -> Result<PowerState> {
        Ok(self.inventory.lock().await.vm_mut(vm)?.power_state)
    }

    async fn power_on_vm(&self, vm: &ManagedObjectRef) -> Result<TaskRef> {
        self.injected("power_on_vm", &vm.value).await?;
        let mut inventory = self.inventory.lock().await;
        inventory.vm_mut(vm)?.power_state = PowerState::PoweredOn;
        Ok(inventory.task(None))
    }

    async fn power_off_vm(&self, vm: &ManagedObjectRef) -> Result<TaskRef> {
        self.injected("power_off_vm", &vm.value).await?;
        let mut inventory = self.inventory.lock().await;
        inventory.vm_mut(vm)?.power_state = PowerState::PoweredOff;
        Ok(inventory.task(None))
    }

    async fn destroy_vm(&self, vm: &ManagedObjectRef) -> Result<TaskRef> {
        let name = self.inventory.lock().await.vm_mut(vm)?.name.clone();
        self.injected("destroy_vm", &name).await?;

        let mut inventory = self.inventory.lock().await;
        inventory.vms.remove(&vm.value);
        debug!(vm = %name, "Sandbox VM destroyed");
        Ok(inventory.task(None))
    }

    async fn wait_for_task(&self, task: &TaskRef) -> Result<TaskOutcome> {
        let result = self
            .inventory
            .lock()
            .await
            .tasks
            .remove(&task.0)
            .ok_or_else(|| AppError::not_found("task", task.0.clone()))?;
        Ok(TaskOutcome { result })
    }

    async fn wait_for_ip(&self, vm: &ManagedObjectRef) -> Result<IpAddr> {
        let name = self.inventory.lock().await.vm_mut(vm)?.name.clone();
        self.injected("wait_for_ip", &name).await?;

        let mut inventory = self.inventory.lock().await;
        let vm = inventory.vm_mut(vm)?;
        if vm.power_state != PowerState::PoweredOn {
            return Err(AppError::Timeout(format!("{} is not powered on", vm.name)));
        }
        Ok(vm.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clone_spec(name: &str) -> CloneSpec {
        CloneSpec {
            name: name.to_string(),
            folder: ManagedObjectRef::new("Folder", "vms"),
            resource_pool: ManagedObjectRef::new("ResourcePool", "pool"),
            datastore: ManagedObjectRef::new("Datastore", "ds"),
            num_cpus: 2,
            memory_mib: 4096,
            power_on: true,
            extra_config: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_clone_then_destroy() {
        let backend = SandboxVirtualization::new();
        let template = backend.find_template("ubuntu").await.unwrap();

        let task = backend.clone_vm(&template, &clone_spec("demo-pool1-1")).await.unwrap();
        let vm = backend.wait_for_task(&task).await.unwrap().result.unwrap();
        assert_eq!(backend.power_state(&vm).await.unwrap(), PowerState::PoweredOn);
        assert!(backend.wait_for_ip(&vm).await.is_ok());

        let task = backend.destroy_vm(&vm).await.unwrap();
        backend.wait_for_task(&task).await.unwrap();
        assert!(backend.vm_names().await.is_empty());
        assert!(backend.power_state(&vm).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_missing_datastore_resolves_through_cluster() {
        let backend = SandboxVirtualization::new();
        backend.set_missing("shared").await;

        assert!(backend.find_datastore("shared").await.unwrap_err().is_not_found());
        let pod = backend.find_datastore_cluster("shared").await.unwrap();
        let ds = backend.recommend_datastore(&pod, &clone_spec("x")).await.unwrap();
        assert_eq!(ds.value, "shared-member-1");
    }

    #[tokio::test]
    async fn test_injected_clone_failure() {
        let backend = SandboxVirtualization::new();
        backend.failures().fail("clone_vm", "demo-pool1-1", 1).await;
        let template = backend.find_template("ubuntu").await.unwrap();

        assert!(backend.clone_vm(&template, &clone_spec("demo-pool1-1")).await.is_err());
        assert!(backend.clone_vm(&template, &clone_spec("demo-pool1-1")).await.is_ok());
        assert_eq!(backend.clone_calls().await, 2);
    }
}
