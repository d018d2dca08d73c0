use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::{HashMap, HashSet};
use std::future::pending;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::session::{ControlPlane, Datastore, Inventory, ManagedObjectRef, RemoteTask, SessionConfig};
use crate::core::vm::{PowerState, VmConfiguration};
use crate::errors::ControlPlaneError;

/// Control-plane calls the simulator can be told to fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Login,
    VmFolder,
    ClusterHosts,
    CreateVm,
    FindVm,
    PowerOn,
}

#[derive(Debug, Clone)]
pub struct SimulatedVm {
    pub reference: ManagedObjectRef,
    pub host: ManagedObjectRef,
    pub folder: ManagedObjectRef,
    pub config: VmConfiguration,
    pub power: PowerState,
}

#[derive(Default)]
struct SimState {
    hosts: Vec<ManagedObjectRef>,
    vms: HashMap<String, SimulatedVm>,
    failures: HashMap<Operation, String>,
    stalled: HashSet<Operation>,
    calls: HashMap<Operation, usize>,
    next_vm: u64,
}

impl SimState {
    fn enter(&mut self, op: Operation) -> Result<(), ControlPlaneError> {
        *self.calls.entry(op).or_default() += 1;
        match (op, self.failures.get(&op)) {
            // task-based calls fail in the task, not at submission
            (Operation::CreateVm | Operation::PowerOn, _) | (_, None) => Ok(()),
            (Operation::Login, Some(msg)) => Err(ControlPlaneError::Connection(msg.clone())),
            (_, Some(msg)) => Err(ControlPlaneError::Rejected(msg.clone())),
        }
    }
}

/// In-process stand-in for the hypervisor control plane.
///
/// Used by the development server and by tests. Every call is counted,
/// and individual operations can be made to fail or never complete.
#[derive(Clone)]
pub struct SimulatedControlPlane {
    inventory: Inventory,
    folder: ManagedObjectRef,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedControlPlane {
    pub fn new(datastore_name: &str, network_ref: &str, hosts: Vec<String>) -> Self {
        let inventory = Inventory {
            datacenter: ManagedObjectRef::new("Datacenter", "datacenter-2"),
            cluster: ManagedObjectRef::new("ClusterComputeResource", "domain-c7"),
            datastore: Datastore {
                reference: ManagedObjectRef::new("Datastore", "datastore-11"),
                name: datastore_name.to_string(),
            },
            pool: ManagedObjectRef::new("ResourcePool", "resgroup-8"),
            network: ManagedObjectRef::new("Network", network_ref),
        };
        let state = SimState {
            hosts: hosts
                .into_iter()
                .map(|h| ManagedObjectRef::new("HostSystem", h))
                .collect(),
            ..Default::default()
        };
        Self {
            inventory,
            folder: ManagedObjectRef::new("Folder", "group-v3"),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub async fn set_hosts(&self, hosts: Vec<String>) {
        self.state.lock().await.hosts = hosts
            .into_iter()
            .map(|h| ManagedObjectRef::new("HostSystem", h))
            .collect();
    }

    /// Makes every later `op` fail with `message`.
    pub async fn fail(&self, op: Operation, message: &str) {
        self.state.lock().await.failures.insert(op, message.to_string());
    }

    /// Makes every later `op` stay pending forever. For create and power-on
    /// the task is submitted and then never finishes.
    pub async fn stall(&self, op: Operation) {
        self.state.lock().await.stalled.insert(op);
    }

    pub async fn reset_faults(&self) {
        let mut state = self.state.lock().await;
        state.failures.clear();
        state.stalled.clear();
    }

    pub async fn calls(&self, op: Operation) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    pub async fn vm(&self, id: &str) -> Option<SimulatedVm> {
        self.state.lock().await.vms.get(id).cloned()
    }

    pub async fn vm_count(&self) -> usize {
        self.state.lock().await.vms.len()
    }

    /// Counts a lookup and applies injected faults to it.
    async fn lookup(&self, op: Operation) -> Result<(), ControlPlaneError> {
        let stalled = {
            let mut state = self.state.lock().await;
            state.enter(op)?;
            state.stalled.contains(&op)
        };
        if stalled {
            debug!(operation = ?op, "Simulated lookup stalled");
            pending::<()>().await;
        }
        Ok(())
    }

    fn task_ref() -> ManagedObjectRef {
        ManagedObjectRef::new("Task", format!("task-{}", Uuid::new_v4().simple()))
    }

    fn failed_task(message: String) -> RemoteTask {
        RemoteTask::new(
            Self::task_ref(),
            async move { Err(ControlPlaneError::TaskFailed(message)) }.boxed(),
        )
    }

    fn stalled_task() -> RemoteTask {
        RemoteTask::new(Self::task_ref(), pending().boxed())
    }
}

#[async_trait]
impl ControlPlane for SimulatedControlPlane {
    async fn login(&self, config: &SessionConfig) -> Result<Inventory, ControlPlaneError> {
        self.lookup(Operation::Login).await?;
        info!(service = %config.service, insecure = config.insecure, "Simulated control plane login");
        Ok(self.inventory.clone())
    }

    async fn vm_folder(&self, datacenter: &ManagedObjectRef) -> Result<ManagedObjectRef, ControlPlaneError> {
        self.lookup(Operation::VmFolder).await?;
        if *datacenter != self.inventory.datacenter {
            return Err(ControlPlaneError::NotFound(datacenter.to_string()));
        }
        Ok(self.folder.clone())
    }

    async fn attached_cluster_hosts(
        &self,
        datastore: &Datastore,
        cluster: &ManagedObjectRef,
    ) -> Result<Vec<ManagedObjectRef>, ControlPlaneError> {
        self.lookup(Operation::ClusterHosts).await?;
        if *cluster != self.inventory.cluster || *datastore != self.inventory.datastore {
            return Ok(Vec::new());
        }
        Ok(self.state.lock().await.hosts.clone())
    }

    async fn create_vm(
        &self,
        folder: &ManagedObjectRef,
        config: &VmConfiguration,
        _pool: &ManagedObjectRef,
        host: &ManagedObjectRef,
    ) -> Result<RemoteTask, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::CreateVm)?;

        if state.stalled.contains(&Operation::CreateVm) {
            return Ok(Self::stalled_task());
        }
        if let Some(message) = state.failures.get(&Operation::CreateVm) {
            return Ok(Self::failed_task(message.clone()));
        }
        if state.vms.contains_key(&config.id) {
            return Ok(Self::failed_task(format!("vm {} already exists", config.id)));
        }
        if !state.hosts.contains(host) {
            return Ok(Self::failed_task(format!("host {} is not available", host)));
        }

        state.next_vm += 1;
        let reference = ManagedObjectRef::new("VirtualMachine", format!("vm-{}", state.next_vm));
        let vm = SimulatedVm {
            reference: reference.clone(),
            host: host.clone(),
            folder: folder.clone(),
            config: config.clone(),
            power: PowerState::PoweredOff,
        };

        let shared = self.state.clone();
        let id = config.id.clone();
        let outcome = async move {
            shared.lock().await.vms.insert(id, vm);
            debug!(vm = %reference, "Simulated vm created");
            Ok::<_, ControlPlaneError>(Some(reference))
        };
        Ok(RemoteTask::new(Self::task_ref(), outcome.boxed()))
    }

    async fn find_vm(&self, id: &str) -> Result<ManagedObjectRef, ControlPlaneError> {
        self.lookup(Operation::FindVm).await?;
        self.state
            .lock()
            .await
            .vms
            .get(id)
            .map(|vm| vm.reference.clone())
            .ok_or_else(|| ControlPlaneError::NotFound(format!("vm {}", id)))
    }

    async fn power_on(&self, vm: &ManagedObjectRef) -> Result<RemoteTask, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.enter(Operation::PowerOn)?;

        if state.stalled.contains(&Operation::PowerOn) {
            return Ok(Self::stalled_task());
        }
        if let Some(message) = state.failures.get(&Operation::PowerOn) {
            return Ok(Self::failed_task(message.clone()));
        }

        let shared = self.state.clone();
        let target = vm.clone();
        let outcome = async move {
            let mut state = shared.lock().await;
            let Some(vm) = state.vms.values_mut().find(|v| v.reference == target) else {
                return Err(ControlPlaneError::TaskFailed(format!("{} has been deleted", target)));
            };
            if vm.power == PowerState::PoweredOn {
                return Err(ControlPlaneError::TaskFailed(
                    "the attempted operation cannot be performed in the current state (Powered on)".to_string(),
                ));
            }
            vm.power = PowerState::PoweredOn;
            debug!(vm = %target, "Simulated vm powered on");
            Ok::<_, ControlPlaneError>(None)
        };
        Ok(RemoteTask::new(Self::task_ref(), outcome.boxed()))
    }
}
