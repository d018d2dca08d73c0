//! Network endpoint allocation for new containers.
//!
//! A container asks for an attachment to a named scope (or the default
//! scope). The allocator resolves exactly one scope, reserves an address in
//! it and hands back the endpoint metadata that gets embedded in the VM.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::vm::{NetworkEndpoint, NetworkRequest};
use crate::errors::{ProvisionError, RollbackWarning, ScopeError};

/// IPv4 subnet, stored with the host bits cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Subnet {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Subnet {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, ScopeError> {
        if prefix_len > 32 {
            return Err(ScopeError::OutOfRange {
                address: address.to_string(),
                subnet: format!("/{}", prefix_len),
            });
        }
        Ok(Self {
            network: Ipv4Addr::from(u32::from(address) & mask_bits(prefix_len)),
            prefix_len,
        })
    }

    /// Parses CIDR notation, e.g. `172.16.0.0/16`.
    pub fn from_cidr(s: &str) -> Result<Self, ScopeError> {
        let invalid = || ScopeError::OutOfRange {
            address: s.to_string(),
            subnet: "CIDR".to_string(),
        };
        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let address = Ipv4Addr::from_str(addr).map_err(|_| invalid())?;
        let prefix_len = prefix.parse::<u8>().map_err(|_| invalid())?;
        Self::new(address, prefix_len)
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(mask_bits(self.prefix_len))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask_bits(self.prefix_len) == u32::from(self.network)
    }

    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// Address at `offset` from the network address.
    pub fn nth(&self, offset: u64) -> Option<Ipv4Addr> {
        if offset >= self.size() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.network) + offset as u32))
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !mask_bits(self.prefix_len))
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

fn mask_bits(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

/// An address reserved for one container in a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeEndpoint {
    pub ip: IpAddr,
    pub subnet: Ipv4Subnet,
    pub gateway: IpAddr,
    pub scope_name: String,
}

/// A named logical network with its own address pool.
pub trait Scope: Send + Sync {
    fn name(&self) -> &str;

    fn subnet(&self) -> Ipv4Subnet;

    fn gateway(&self) -> IpAddr;

    /// Reserves an address for `container`, pinned to `ip` when given.
    fn add_container(&self, container: &str, ip: Option<IpAddr>) -> Result<ScopeEndpoint, ScopeError>;

    fn remove_container(&self, container: &str) -> Result<(), ScopeError>;
}

/// Lookup of scopes by name.
pub trait ScopeProvider: Send + Sync {
    fn default_scope(&self) -> Arc<dyn Scope>;

    /// All scopes whose name matches `name`; every scope when `None`.
    fn scopes(&self, name: Option<&str>) -> Result<Vec<Arc<dyn Scope>>, ScopeError>;
}

/// A successful attachment: the endpoint plus the scope that owns it.
#[derive(Clone)]
pub struct Attachment {
    pub endpoint: NetworkEndpoint,
    pub scope: Arc<dyn Scope>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("endpoint", &self.endpoint)
            .field("scope", &self.scope.name())
            .finish()
    }
}

pub struct NetworkAllocator {
    scopes: Arc<dyn ScopeProvider>,
}

impl NetworkAllocator {
    pub fn new(scopes: Arc<dyn ScopeProvider>) -> Self {
        Self { scopes }
    }

    fn resolve_scope(&self, request: &NetworkRequest) -> Result<Arc<dyn Scope>, ProvisionError> {
        if request.is_default() {
            return Ok(self.scopes.default_scope());
        }

        let mut scopes = self
            .scopes
            .scopes(Some(&request.network_name))
            .map_err(|e| ProvisionError::resolution(format!("network {}: {}", request.network_name, e)))?;

        match scopes.len() {
            1 => Ok(scopes.remove(0)),
            0 => Err(ProvisionError::resolution(format!(
                "network {} not found",
                request.network_name
            ))),
            n => Err(ProvisionError::resolution(format!(
                "network {} is ambiguous: {} scopes match",
                request.network_name, n
            ))),
        }
    }

    /// Attaches `container` to the requested network.
    ///
    /// Returns `Ok(None)` without touching any scope when no network was
    /// requested. A static address is validated before the scope is
    /// resolved, so a malformed address never mutates a pool.
    pub fn attach(
        &self,
        container: &str,
        request: Option<&NetworkRequest>,
    ) -> Result<Option<Attachment>, ProvisionError> {
        let Some(request) = request else {
            debug!(container, "No network requested");
            return Ok(None);
        };

        let ip = match &request.address {
            Some(address) => Some(IpAddr::from_str(address).map_err(|_| {
                ProvisionError::validation(format!("invalid ip address: {}", address))
            })?),
            None => None,
        };

        let scope = self.resolve_scope(request)?;

        let reserved = scope
            .add_container(container, ip)
            .map_err(|e| ProvisionError::Allocation {
                message: e.to_string(),
                scope: scope.name().to_string(),
            })?;

        let endpoint = NetworkEndpoint {
            ip: reserved.ip,
            subnet_mask: IpAddr::V4(reserved.subnet.mask()),
            gateway: reserved.gateway,
            network_name: reserved.scope_name,
        };

        info!(
            container,
            scope = scope.name(),
            ip = %endpoint.ip,
            "Network endpoint allocated"
        );

        Ok(Some(Attachment { endpoint, scope }))
    }

    /// Removes `container` from `scope`.
    ///
    /// Releasing something that is no longer attached is a no-op. Other
    /// failures come back as a warning for the caller to record; they are
    /// never raised as errors.
    pub fn release(&self, scope: &dyn Scope, container: &str) -> Option<RollbackWarning> {
        match scope.remove_container(container) {
            Ok(()) => {
                info!(container, scope = scope.name(), "Network endpoint released");
                None
            }
            Err(ScopeError::ContainerNotFound { .. }) => {
                debug!(container, scope = scope.name(), "Endpoint already released");
                None
            }
            Err(e) => {
                let warning = RollbackWarning {
                    container: container.to_string(),
                    scope: scope.name().to_string(),
                    message: e.to_string(),
                };
                warning.log();
                Some(warning)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_parsing_masks_host_bits() {
        let subnet = Ipv4Subnet::from_cidr("172.16.4.9/16").unwrap();
        assert_eq!(subnet.network, Ipv4Addr::new(172, 16, 0, 0));
        assert_eq!(subnet.mask(), Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(subnet.broadcast(), Ipv4Addr::new(172, 16, 255, 255));
        assert_eq!(subnet.to_string(), "172.16.0.0/16");
    }

    #[test]
    fn test_subnet_membership() {
        let subnet = Ipv4Subnet::from_cidr("10.0.0.0/24").unwrap();
        assert!(subnet.contains(Ipv4Addr::new(10, 0, 0, 200)));
        assert!(!subnet.contains(Ipv4Addr::new(10, 0, 1, 1)));
        assert_eq!(subnet.size(), 256);
        assert_eq!(subnet.nth(1), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(subnet.nth(256), None);
    }

    #[test]
    fn test_invalid_cidr() {
        assert!(Ipv4Subnet::from_cidr("10.0.0.0").is_err());
        assert!(Ipv4Subnet::from_cidr("10.0.0.0/33").is_err());
        assert!(Ipv4Subnet::from_cidr("nope/8").is_err());
    }
}
