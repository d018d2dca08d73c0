// Shared fixtures: a simulated control plane plus scopes that count mutations.

#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use container_vm_manager::backend::{MemoryScope, MemoryScopeProvider, SimulatedControlPlane};
use container_vm_manager::config::generate_default_config;
use container_vm_manager::core::network::{Ipv4Subnet, Scope, ScopeEndpoint, ScopeProvider};
use container_vm_manager::core::vm::{CreateConfig, CreateRequest, NetworkRequest};
use container_vm_manager::core::vm_config::VmSizing;
use container_vm_manager::core::{Orchestrator, Session};
use container_vm_manager::errors::ScopeError;

/// Scope wrapper that counts calls and can refuse removals.
pub struct CountingScope {
    pub inner: MemoryScope,
    pub adds: AtomicUsize,
    pub removes: AtomicUsize,
    pub refuse_removal: AtomicBool,
}

impl CountingScope {
    pub fn new(name: &str, cidr: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryScope::from_cidr(name, cidr).unwrap(),
            adds: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            refuse_removal: AtomicBool::new(false),
        })
    }

    pub fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn allocated(&self) -> usize {
        self.inner.allocated()
    }
}

impl Scope for CountingScope {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn subnet(&self) -> Ipv4Subnet {
        self.inner.subnet()
    }

    fn gateway(&self) -> IpAddr {
        self.inner.gateway()
    }

    fn add_container(&self, container: &str, ip: Option<IpAddr>) -> Result<ScopeEndpoint, ScopeError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add_container(container, ip)
    }

    fn remove_container(&self, container: &str) -> Result<(), ScopeError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if self.refuse_removal.load(Ordering::SeqCst) {
            return Err(ScopeError::Unavailable(self.name().to_string()));
        }
        self.inner.remove_container(container)
    }
}

pub struct Harness {
    pub sim: SimulatedControlPlane,
    pub bridge: Arc<CountingScope>,
    pub custom: Arc<CountingScope>,
    pub scopes: Arc<dyn ScopeProvider>,
    pub orchestrator: Arc<Orchestrator>,
}

pub const HOSTS: [&str; 3] = ["host-21", "host-22", "host-23"];

pub async fn harness() -> Harness {
    harness_with(Vec::new()).await
}

/// `extra` scopes are registered next to `bridge` (default) and `custom`.
pub async fn harness_with(extra: Vec<Arc<dyn Scope>>) -> Harness {
    let sim = SimulatedControlPlane::new(
        "datastore1",
        "network-12",
        HOSTS.iter().map(|h| h.to_string()).collect(),
    );
    let bridge = CountingScope::new("bridge", "172.16.0.0/16");
    let custom = CountingScope::new("custom", "10.20.0.0/24");

    let mut others: Vec<Arc<dyn Scope>> = Vec::new();
    others.push(custom.clone());
    others.extend(extra);
    let scopes: Arc<dyn ScopeProvider> = Arc::new(MemoryScopeProvider::new(bridge.clone(), others));

    let session = Session::create(generate_default_config().session, Arc::new(sim.clone()))
        .await
        .unwrap();
    let orchestrator = Orchestrator::new(Arc::new(session), scopes.clone(), VmSizing::default());

    Harness {
        sim,
        bridge,
        custom,
        scopes,
        orchestrator: Arc::new(orchestrator),
    }
}

pub fn request(image: &str, path: &str, network: Option<NetworkRequest>) -> CreateRequest {
    CreateRequest {
        name: None,
        create_config: CreateConfig {
            path: path.to_string(),
            args: vec!["-c".to_string(), "echo hello".to_string()],
            env: vec!["PATH=/usr/bin:/bin".to_string()],
            working_dir: Some("/".to_string()),
            image: image.to_string(),
            image_store: "default".to_string(),
            network_settings: network,
        },
    }
}

pub fn named(mut request: CreateRequest, name: &str) -> CreateRequest {
    request.name = Some(name.to_string());
    request
}

pub fn network(name: &str, address: Option<&str>) -> Option<NetworkRequest> {
    Some(NetworkRequest {
        network_name: name.to_string(),
        address: address.map(str::to_string),
    })
}
