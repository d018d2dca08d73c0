use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::core::vm::VmConfiguration;
use crate::errors::ControlPlaneError;

/// Reference to an object held by the control plane, e.g. `HostSystem:host-21`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
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

impl fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Connection parameters for the control plane.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub service: String,
    pub username: String,
    pub password: String,
    pub insecure: bool,
    pub keepalive_secs: u64,
    pub datacenter_path: String,
    pub cluster_path: String,
    pub datastore_path: String,
    pub network_path: String,
    pub pool_path: String,
}

impl SessionConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("service", &self.service)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("datacenter_path", &self.datacenter_path)
            .field("cluster_path", &self.cluster_path)
            .field("datastore_path", &self.datastore_path)
            .field("network_path", &self.network_path)
            .field("pool_path", &self.pool_path)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datastore {
    pub reference: ManagedObjectRef,
    pub name: String,
}

impl Datastore {
    /// Datastore path in `[name] relative/path` form.
    pub fn path(&self, relative: &str) -> String {
        format!("[{}] {}", self.name, relative)
    }

    pub fn root(&self) -> String {
        format!("[{}]", self.name)
    }
}

/// Inventory objects resolved from the configured paths at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub datacenter: ManagedObjectRef,
    pub cluster: ManagedObjectRef,
    pub datastore: Datastore,
    pub pool: ManagedObjectRef,
    pub network: ManagedObjectRef,
}

/// Result reported by a finished remote task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub task: ManagedObjectRef,
    pub result: Option<ManagedObjectRef>,
}

/// Handle to an in-flight control-plane task. The outcome resolves once.
pub struct RemoteTask {
    pub reference: ManagedObjectRef,
    outcome: BoxFuture<'static, Result<Option<ManagedObjectRef>, ControlPlaneError>>,
}

impl RemoteTask {
    pub fn new(
        reference: ManagedObjectRef,
        outcome: BoxFuture<'static, Result<Option<ManagedObjectRef>, ControlPlaneError>>,
    ) -> Self {
        Self { reference, outcome }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        ManagedObjectRef,
        BoxFuture<'static, Result<Option<ManagedObjectRef>, ControlPlaneError>>,
    ) {
        (self.reference, self.outcome)
    }
}

impl fmt::Debug for RemoteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTask").field("reference", &self.reference).finish()
    }
}

/// The hypervisor control-plane client.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Authenticates and resolves the configured inventory paths.
    async fn login(&self, config: &SessionConfig) -> Result<Inventory, ControlPlaneError>;

    async fn vm_folder(&self, datacenter: &ManagedObjectRef) -> Result<ManagedObjectRef, ControlPlaneError>;

    /// Hosts in `cluster` that can see `datastore`.
    async fn attached_cluster_hosts(
        &self,
        datastore: &Datastore,
        cluster: &ManagedObjectRef,
    ) -> Result<Vec<ManagedObjectRef>, ControlPlaneError>;

    async fn create_vm(
        &self,
        folder: &ManagedObjectRef,
        config: &VmConfiguration,
        pool: &ManagedObjectRef,
        host: &ManagedObjectRef,
    ) -> Result<RemoteTask, ControlPlaneError>;

    /// Finds a VM by container id.
    async fn find_vm(&self, id: &str) -> Result<ManagedObjectRef, ControlPlaneError>;

    async fn power_on(&self, vm: &ManagedObjectRef) -> Result<RemoteTask, ControlPlaneError>;
}

/// Process-wide control-plane session. Built once at startup and shared
/// read-only by every request.
pub struct Session {
    config: SessionConfig,
    inventory: Inventory,
    client: Arc<dyn ControlPlane>,
}

impl Session {
    pub async fn create(config: SessionConfig, client: Arc<dyn ControlPlane>) -> Result<Self, ControlPlaneError> {
        let inventory = client.login(&config).await?;
        info!(
            service = %config.service,
            datacenter = %inventory.datacenter,
            cluster = %inventory.cluster,
            datastore = %inventory.datastore.name,
            "Control plane session established"
        );
        Ok(Self {
            config,
            inventory,
            client,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn datacenter(&self) -> &ManagedObjectRef {
        &self.inventory.datacenter
    }

    pub fn cluster(&self) -> &ManagedObjectRef {
        &self.inventory.cluster
    }

    pub fn datastore(&self) -> &Datastore {
        &self.inventory.datastore
    }

    pub fn pool(&self) -> &ManagedObjectRef {
        &self.inventory.pool
    }

    pub fn network(&self) -> &ManagedObjectRef {
        &self.inventory.network
    }

    /// Client used for lookups and remote operations.
    pub fn finder(&self) -> &Arc<dyn ControlPlane> {
        &self.client
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("inventory", &self.inventory)
            .finish()
    }
}
