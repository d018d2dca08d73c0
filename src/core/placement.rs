use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::debug;

use crate::core::session::{ManagedObjectRef, Session};
use crate::core::tasks::Cancellation;
use crate::core::vm::PlacementTarget;
use crate::errors::{ProvisionError, ProvisionResult};

/// Picks a host for a new VM from the candidates that can see the datastore.
pub trait HostChooser: Send + Sync {
    fn choose(&self, hosts: &[ManagedObjectRef]) -> Option<ManagedObjectRef>;
}

/// Uniform random choice. Stands in until a real scheduler is plugged in.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomHostChooser;

impl HostChooser for RandomHostChooser {
    fn choose(&self, hosts: &[ManagedObjectRef]) -> Option<ManagedObjectRef> {
        hosts.choose(&mut rand::thread_rng()).cloned()
    }
}

pub struct PlacementSelector {
    chooser: Arc<dyn HostChooser>,
}

impl Default for PlacementSelector {
    fn default() -> Self {
        Self::new(Arc::new(RandomHostChooser))
    }
}

impl PlacementSelector {
    pub fn new(chooser: Arc<dyn HostChooser>) -> Self {
        Self { chooser }
    }

    /// Resolves the VM folder and a host in one pass; the pair is the
    /// snapshot used for the creation call. Both lookups give up when
    /// `cancel` fires.
    pub async fn select(&self, session: &Session, cancel: &Cancellation) -> ProvisionResult<PlacementTarget> {
        let client = session.finder();

        let folder = cancel
            .guard(client.vm_folder(session.datacenter()))
            .await
            .map_err(|kind| ProvisionError::RemoteOperation { kind })?
            .map_err(|e| ProvisionError::placement(format!("vm folder lookup failed: {}", e)))?;

        let hosts = cancel
            .guard(client.attached_cluster_hosts(session.datastore(), session.cluster()))
            .await
            .map_err(|kind| ProvisionError::RemoteOperation { kind })?
            .map_err(|e| ProvisionError::placement(format!("host lookup failed: {}", e)))?;

        if hosts.is_empty() {
            return Err(ProvisionError::placement(format!(
                "no hosts in {} can reach datastore {}",
                session.cluster(),
                session.datastore().name
            )));
        }

        let host = self
            .chooser
            .choose(&hosts)
            .ok_or_else(|| ProvisionError::placement("host chooser declined every candidate"))?;

        debug!(folder = %folder, host = %host, candidates = hosts.len(), "Placement selected");
        Ok(PlacementTarget { folder, host })
    }
}
