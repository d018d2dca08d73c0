use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::core::network::{Ipv4Subnet, Scope, ScopeEndpoint, ScopeProvider};
use crate::errors::ScopeError;

/// In-process scope with a sequential IPv4 pool.
///
/// The network address, the gateway (first host address) and the broadcast
/// address are never handed out.
pub struct MemoryScope {
    name: String,
    subnet: Ipv4Subnet,
    gateway: Ipv4Addr,
    endpoints: Mutex<HashMap<String, Ipv4Addr>>,
}

impl MemoryScope {
    pub fn new(name: impl Into<String>, subnet: Ipv4Subnet) -> Self {
        let gateway = subnet.nth(1).unwrap_or(subnet.network);
        Self {
            name: name.into(),
            subnet,
            gateway,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_cidr(name: impl Into<String>, cidr: &str) -> Result<Self, ScopeError> {
        Ok(Self::new(name, Ipv4Subnet::from_cidr(cidr)?))
    }

    fn endpoints(&self) -> Result<MutexGuard<'_, HashMap<String, Ipv4Addr>>, ScopeError> {
        self.endpoints
            .lock()
            .map_err(|_| ScopeError::Unavailable(self.name.clone()))
    }

    pub fn address_of(&self, container: &str) -> Option<Ipv4Addr> {
        self.endpoints().ok()?.get(container).copied()
    }

    pub fn allocated(&self) -> usize {
        self.endpoints().map(|e| e.len()).unwrap_or(0)
    }

    fn reserved(&self, addr: Ipv4Addr) -> bool {
        addr == self.subnet.network || addr == self.gateway || addr == self.subnet.broadcast()
    }

    fn endpoint(&self, ip: Ipv4Addr) -> ScopeEndpoint {
        ScopeEndpoint {
            ip: IpAddr::V4(ip),
            subnet: self.subnet,
            gateway: IpAddr::V4(self.gateway),
            scope_name: self.name.clone(),
        }
    }
}

impl Scope for MemoryScope {
    fn name(&self) -> &str {
        &self.name
    }

    fn subnet(&self) -> Ipv4Subnet {
        self.subnet
    }

    fn gateway(&self) -> IpAddr {
        IpAddr::V4(self.gateway)
    }

    fn add_container(&self, container: &str, ip: Option<IpAddr>) -> Result<ScopeEndpoint, ScopeError> {
        let mut endpoints = self.endpoints()?;
        if endpoints.contains_key(container) {
            return Err(ScopeError::AlreadyAttached {
                container: container.to_string(),
                scope: self.name.clone(),
            });
        }

        let addr = match ip {
            Some(IpAddr::V4(addr)) => {
                if !self.subnet.contains(addr) || self.reserved(addr) {
                    return Err(ScopeError::OutOfRange {
                        address: addr.to_string(),
                        subnet: self.subnet.to_string(),
                    });
                }
                if endpoints.values().any(|used| *used == addr) {
                    return Err(ScopeError::AddressInUse(addr.to_string()));
                }
                addr
            }
            Some(other) => {
                return Err(ScopeError::OutOfRange {
                    address: other.to_string(),
                    subnet: self.subnet.to_string(),
                })
            }
            None => (1..self.subnet.size())
                .filter_map(|offset| self.subnet.nth(offset))
                .find(|addr| !self.reserved(*addr) && !endpoints.values().any(|used| used == addr))
                .ok_or_else(|| ScopeError::PoolExhausted(self.subnet.to_string()))?,
        };

        endpoints.insert(container.to_string(), addr);
        debug!(scope = %self.name, container, ip = %addr, "Address reserved");
        Ok(self.endpoint(addr))
    }

    fn remove_container(&self, container: &str) -> Result<(), ScopeError> {
        let mut endpoints = self.endpoints()?;
        match endpoints.remove(container) {
            Some(addr) => {
                debug!(scope = %self.name, container, ip = %addr, "Address returned");
                Ok(())
            }
            None => Err(ScopeError::ContainerNotFound {
                container: container.to_string(),
                scope: self.name.clone(),
            }),
        }
    }
}

/// Fixed set of in-process scopes.
pub struct MemoryScopeProvider {
    default: Arc<dyn Scope>,
    scopes: Vec<Arc<dyn Scope>>,
}

impl MemoryScopeProvider {
    /// `default` is also reachable by name through [`ScopeProvider::scopes`].
    pub fn new(default: Arc<dyn Scope>, others: Vec<Arc<dyn Scope>>) -> Self {
        let mut scopes = vec![default.clone()];
        scopes.extend(others);
        Self { default, scopes }
    }
}

impl ScopeProvider for MemoryScopeProvider {
    fn default_scope(&self) -> Arc<dyn Scope> {
        self.default.clone()
    }

    fn scopes(&self, name: Option<&str>) -> Result<Vec<Arc<dyn Scope>>, ScopeError> {
        Ok(self
            .scopes
            .iter()
            .filter(|s| name.map_or(true, |n| s.name() == n))
            .cloned()
            .collect())
    }
}
