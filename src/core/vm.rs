use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::core::session::ManagedObjectRef;

pub const DEFAULT_NETWORK: &str = "default";

fn default_image_store() -> String {
    "default".to_string()
}

/// Network attachment requested for a new container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkRequest {
    pub network_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl NetworkRequest {
    pub fn default_network() -> Self {
        Self {
            network_name: DEFAULT_NETWORK.to_string(),
            address: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.network_name == DEFAULT_NETWORK
    }
}

/// What the client asked for, as sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default = "default_image_store")]
    pub image_store: String,
    #[serde(default)]
    pub network_settings: Option<NetworkRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub create_config: CreateConfig,
}

/// A container as the orchestrator sees it: identity plus the immutable
/// request it was created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub id: String,
    pub name: String,
    pub path: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub image: String,
    pub image_store: String,
    pub network: Option<NetworkRequest>,
}

impl ContainerSpec {
    pub fn from_request(id: String, name: String, config: CreateConfig) -> Self {
        Self {
            id,
            name,
            path: config.path,
            args: config.args,
            env: config.env,
            working_dir: config.working_dir.unwrap_or_default(),
            image: config.image,
            image_store: config.image_store,
            network: config.network_settings,
        }
    }
}

/// Network identity handed to one container by a scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkEndpoint {
    pub ip: IpAddr,
    pub subnet_mask: IpAddr,
    pub gateway: IpAddr,
    /// Logical network name; the key under which the endpoint is embedded.
    pub network_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Common {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cmd {
    pub env: Vec<String>,
    pub dir: String,
    pub path: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecSession {
    pub common: Common,
    pub tty: bool,
    pub attach: bool,
    pub cmd: Cmd,
}

/// Metadata embedded in the VM for the in-guest executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub common: Common,
    pub sessions: HashMap<String, ExecSession>,
    pub networks: HashMap<String, NetworkEndpoint>,
}

/// Immutable description of the VM to create.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmConfiguration {
    pub id: String,
    pub name: String,
    pub num_cpus: u32,
    pub memory_mb: u64,
    pub connector_uri: String,
    pub parent_image_id: String,
    pub boot_media_path: String,
    pub vm_path_name: String,
    pub network_id: String,
    pub image_store_name: String,
    pub metadata: ExecutorConfig,
}

/// Where a new VM goes. Taken as one snapshot per creation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementTarget {
    pub folder: ManagedObjectRef,
    pub host: ManagedObjectRef,
}

/// Successful create payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerCreated {
    pub container_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PowerState {
    PoweredOff,
    PoweredOn,
}
