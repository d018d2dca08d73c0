use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::core::session::Session;
use crate::core::vm::{Cmd, Common, ContainerSpec, ExecSession, ExecutorConfig, NetworkEndpoint, VmConfiguration};
use crate::errors::{ProvisionError, ProvisionResult};

/// Fixed sizing and naming applied to every container VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSizing {
    pub num_cpus: u32,
    pub memory_mb: u64,
    /// Appliance directory on the datastore holding the boot media.
    pub vch_name: String,
    pub connector_host: String,
    pub serial_over_lan_port: u16,
}

impl Default for VmSizing {
    fn default() -> Self {
        Self {
            num_cpus: 2,
            memory_mb: 2048,
            vch_name: "vch".to_string(),
            connector_host: "127.0.0.1".to_string(),
            serial_over_lan_port: 2377,
        }
    }
}

pub struct VmConfigBuilder {
    sizing: VmSizing,
}

impl VmConfigBuilder {
    pub fn new(sizing: VmSizing) -> Self {
        Self { sizing }
    }

    pub fn sizing(&self) -> &VmSizing {
        &self.sizing
    }

    /// Assembles the complete VM configuration for `spec`. Makes no remote
    /// calls; fails only on missing required fields.
    pub fn build(
        &self,
        spec: &ContainerSpec,
        endpoint: Option<&NetworkEndpoint>,
        session: &Session,
    ) -> ProvisionResult<VmConfiguration> {
        if spec.image.trim().is_empty() {
            return Err(ProvisionError::validation("image reference is required"));
        }
        if spec.path.trim().is_empty() {
            return Err(ProvisionError::validation("command path is required"));
        }
        if spec.image_store.trim().is_empty() {
            return Err(ProvisionError::validation("image store is required"));
        }

        let metadata = executor_config(spec, endpoint);
        debug!(metadata = ?metadata, "Container metadata");

        let datastore = session.datastore();
        let config = VmConfiguration {
            id: spec.id.clone(),
            name: spec.name.clone(),
            num_cpus: self.sizing.num_cpus,
            memory_mb: self.sizing.memory_mb,
            connector_uri: format!(
                "tcp://{}:{}",
                self.sizing.connector_host, self.sizing.serial_over_lan_port
            ),
            parent_image_id: spec.image.clone(),
            boot_media_path: datastore.path(&format!("{}/bootstrap.iso", self.sizing.vch_name)),
            vm_path_name: datastore.root(),
            network_id: network_id(&session.network().value),
            image_store_name: spec.image_store.clone(),
            metadata,
        };
        debug!(config = ?config, "VM configuration");

        Ok(config)
    }
}

/// Second `-` separated field of the reference: `network-12` → `12`,
/// `dvportgroup-4-5` → `4`. References without a kind prefix are used as-is.
fn network_id(reference: &str) -> String {
    match reference.split('-').nth(1) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => reference.to_string(),
    }
}

fn executor_config(spec: &ContainerSpec, endpoint: Option<&NetworkEndpoint>) -> ExecutorConfig {
    let mut args = Vec::with_capacity(spec.args.len() + 1);
    args.push(spec.path.clone());
    args.extend(spec.args.iter().cloned());

    let session = ExecSession {
        common: Common {
            id: spec.id.clone(),
            name: String::new(),
        },
        tty: false,
        attach: true,
        cmd: Cmd {
            env: spec.env.clone(),
            dir: spec.working_dir.clone(),
            path: spec.path.clone(),
            args,
        },
    };

    let networks = endpoint
        .map(|e| (e.network_name.clone(), e.clone()))
        .into_iter()
        .collect::<HashMap<_, _>>();

    ExecutorConfig {
        common: Common {
            id: spec.id.clone(),
            name: spec.name.clone(),
        },
        sessions: HashMap::from([(spec.id.clone(), session)]),
        networks,
    }
}
