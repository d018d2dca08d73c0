//! In-process control plane and network scopes.
//!
//! The development server runs against these; a real hypervisor client
//! plugs in through [`crate::core::session::ControlPlane`] and
//! [`crate::core::network::ScopeProvider`].

pub mod scopes;
pub mod simulator;

pub use scopes::{MemoryScope, MemoryScopeProvider};
pub use simulator::{Operation, SimulatedControlPlane, SimulatedVm};
