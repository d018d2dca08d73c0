/*
* Container VM Manager Configuration
* ----------------------------------
*
* Configuration Hierarchy (from lowest to highest priority):
* -----------------------------------------------------
* 1. Hardcoded defaults (generate_default_config)
* 2. <CONFIG_PATH>/default.toml
* 3. <CONFIG_PATH>/local.toml (machine-specific overrides)
* 4. Environment variables, APP_ prefix, `__` between levels
*    (APP_SESSION__PASSWORD, APP_SERVER__PORT, ...)
*
* Sections:
* --------
* 1. server: where the API listens
* 2. session: control-plane endpoint, credentials and inventory paths.
*    The session is created once at startup; a bad value here is fatal.
* 3. vm: sizing and naming applied to every container VM
* 4. operations: per-request deadline for remote operations
* 5. simulator: inventory of the in-process control plane used when no
*    hypervisor client is wired in
*
* Keep credentials out of the files, set APP_SESSION__PASSWORD instead.
*/

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::core::session::SessionConfig;
use crate::core::vm_config::VmSizing;

#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub session: SessionConfig,
    pub vm: VmSizing,
    pub operations: OperationSettings,
    pub simulator: SimulatorSettings,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OperationSettings {
    pub timeout_secs: u64,
}

impl OperationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeSettings {
    pub name: String,
    pub subnet: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimulatorSettings {
    pub datastore: String,
    pub network_ref: String,
    pub hosts: Vec<String>,
    pub default_scope: ScopeSettings,
    pub scopes: Vec<ScopeSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());

        info!("Loading configuration from path: {}", config_path);

        Config::builder()
            // Start with default settings
            .add_source(Config::try_from(&generate_default_config())?)
            // Add configuration from files
            .add_source(File::with_name(&format!("{}/default", config_path)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_path)).required(false))
            // Add environment variables with prefix "APP"
            .add_source(Environment::with_prefix("APP").prefix_separator("_").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn new_from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from file: {}", path.display());

        Config::builder()
            .add_source(Config::try_from(&generate_default_config())?)
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("APP").prefix_separator("_").separator("__"))
            .build()?
            .try_deserialize()
    }
}

pub fn generate_default_config() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 2380,
            api_prefix: "/api/v1".to_string(),
        },
        session: SessionConfig {
            service: "https://127.0.0.1/sdk".to_string(),
            username: "administrator@vsphere.local".to_string(),
            password: String::new(),
            insecure: false,
            keepalive_secs: 300,
            datacenter_path: "/ha-datacenter".to_string(),
            cluster_path: "/ha-datacenter/host/cluster".to_string(),
            datastore_path: "/ha-datacenter/datastore/datastore1".to_string(),
            network_path: "/ha-datacenter/network/VM Network".to_string(),
            pool_path: "/ha-datacenter/host/cluster/Resources".to_string(),
        },
        vm: VmSizing::default(),
        operations: OperationSettings { timeout_secs: 300 },
        simulator: SimulatorSettings {
            datastore: "datastore1".to_string(),
            network_ref: "network-12".to_string(),
            hosts: vec!["host-21".to_string(), "host-22".to_string()],
            default_scope: ScopeSettings {
                name: "bridge".to_string(),
                subnet: "172.16.0.0/16".to_string(),
            },
            scopes: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_config() {
        let settings: Settings = Config::builder()
            .add_source(Config::try_from(&generate_default_config()).unwrap())
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.server.port, 2380);
        assert_eq!(settings.vm.num_cpus, 2);
        assert_eq!(settings.vm.memory_mb, 2048);
        assert_eq!(settings.vm.serial_over_lan_port, 2377);
        assert_eq!(settings.operations.timeout(), Duration::from_secs(300));
        assert_eq!(settings.simulator.default_scope.name, "bridge");
    }

    #[test]
    fn test_defaults_render_as_toml() {
        let rendered = toml::to_string_pretty(&generate_default_config()).unwrap();
        assert!(rendered.contains("[session]"));
        assert!(rendered.contains("serial_over_lan_port = 2377"));
    }
}
