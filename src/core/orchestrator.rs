use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument, Span};

use crate::core::identity::{generate_id, resolve_name, short_id};
use crate::core::network::{NetworkAllocator, Scope, ScopeProvider};
use crate::core::placement::PlacementSelector;
use crate::core::session::Session;
use crate::core::tasks::{wait_for_result, Cancellation};
use crate::core::vm::{ContainerCreated, ContainerSpec, CreateRequest};
use crate::core::vm_config::{VmConfigBuilder, VmSizing};
use crate::errors::{ControlPlaneError, PipelineError, ProvisionError, RollbackWarning};
use crate::with_context;

/// Lifecycle of a container as driven by the create/start pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Requested,
    NetworkAllocated,
    ConfigBuilt,
    Placed,
    Created,
    PoweredOn,
    RolledBack,
}

/// The step that was running when a pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NetworkAttach,
    ConfigBuild,
    Placement,
    Create,
    Lookup,
    PowerOn,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::NetworkAttach => write!(f, "network attach"),
            Phase::ConfigBuild => write!(f, "config build"),
            Phase::Placement => write!(f, "placement"),
            Phase::Create => write!(f, "create"),
            Phase::Lookup => write!(f, "lookup"),
            Phase::PowerOn => write!(f, "power on"),
        }
    }
}

/// Forward progress of one create attempt together with the compensating
/// actions owed if it has to be unwound.
struct CreatePipeline<'a> {
    allocator: &'a NetworkAllocator,
    container: &'a str,
    state: ContainerState,
    releases: Vec<Arc<dyn Scope>>,
}

impl<'a> CreatePipeline<'a> {
    fn new(allocator: &'a NetworkAllocator, container: &'a str) -> Self {
        Self {
            allocator,
            container,
            state: ContainerState::Requested,
            releases: Vec::new(),
        }
    }

    fn advance(&mut self, next: ContainerState) {
        debug!(from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    fn owe_release(&mut self, scope: Arc<dyn Scope>) {
        self.releases.push(scope);
    }

    /// Runs every owed compensation, newest first, and reports `err`.
    fn fail(&mut self, phase: Phase, err: ProvisionError) -> PipelineError {
        debug!(phase = %phase, state = ?self.state, owed = self.releases.len(), "Unwinding create pipeline");

        let warnings: Vec<RollbackWarning> = self
            .releases
            .drain(..)
            .rev()
            .filter_map(|scope| self.allocator.release(scope.as_ref(), self.container))
            .collect();

        self.advance(ContainerState::RolledBack);
        PipelineError {
            phase,
            state: self.state,
            error: err,
            rollback_warnings: warnings,
        }
    }

    /// The VM exists now and owns its network reservation.
    fn commit(mut self) {
        self.releases.clear();
        self.advance(ContainerState::Created);
    }
}

/// A container name held for one create attempt. Dropping it without
/// [`NameReservation::keep`] frees the name again, unless someone else
/// already held it.
struct NameReservation<'a> {
    names: &'a Mutex<HashSet<String>>,
    name: String,
    fresh: bool,
}

impl<'a> NameReservation<'a> {
    fn claim(names: &'a Mutex<HashSet<String>>, requested: Option<&str>) -> Self {
        let (name, fresh) = match names.lock() {
            Ok(mut taken) => {
                let name = resolve_name(requested, |candidate| taken.contains(candidate));
                let fresh = taken.insert(name.clone());
                (name, fresh)
            }
            Err(_) => (resolve_name(requested, |_| false), false),
        };
        Self { names, name, fresh }
    }

    fn keep(mut self) {
        self.fresh = false;
    }
}

impl Drop for NameReservation<'_> {
    fn drop(&mut self) {
        if !self.fresh {
            return;
        }
        if let Ok(mut taken) = self.names.lock() {
            taken.remove(&self.name);
        }
    }
}

/// Sequences network attachment, configuration, placement and creation for
/// new containers, and powers existing ones on.
pub struct Orchestrator {
    session: Arc<Session>,
    network: NetworkAllocator,
    builder: VmConfigBuilder,
    placement: PlacementSelector,
    // names of containers created, or being created, by this process
    names: Mutex<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(session: Arc<Session>, scopes: Arc<dyn ScopeProvider>, sizing: VmSizing) -> Self {
        Self {
            session,
            network: NetworkAllocator::new(scopes),
            builder: VmConfigBuilder::new(sizing),
            placement: PlacementSelector::default(),
            names: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_placement(mut self, placement: PlacementSelector) -> Self {
        self.placement = placement;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Creates the VM backing a new container and returns its id.
    ///
    /// Any failure after the network endpoint was allocated releases it
    /// again before the error is returned.
    #[instrument(name = "create_container", skip_all, fields(container_id, name))]
    pub async fn create(&self, request: CreateRequest, cancel: &Cancellation) -> Result<ContainerCreated, PipelineError> {
        let id = generate_id();
        let reservation = NameReservation::claim(&self.names, request.name.as_deref());
        let name = reservation.name.clone();
        Span::current().record("container_id", short_id(&id));
        Span::current().record("name", name.as_str());

        let spec = ContainerSpec::from_request(id, name, request.create_config);
        debug!(
            path = ?spec.path,
            args = ?spec.args,
            env = ?spec.env,
            working_dir = ?spec.working_dir,
            "Create request"
        );

        let mut pipeline = CreatePipeline::new(&self.network, &spec.name);

        let attachment = with_context!(
            self.network.attach(&spec.name, spec.network.as_ref()),
            "attach network",
            spec.id
        )
        .map_err(|e| pipeline.fail(Phase::NetworkAttach, e))?;
        if let Some(attachment) = &attachment {
            pipeline.owe_release(attachment.scope.clone());
        }
        pipeline.advance(ContainerState::NetworkAllocated);

        let endpoint = attachment.as_ref().map(|a| &a.endpoint);
        let config = with_context!(
            self.builder.build(&spec, endpoint, &self.session),
            "build vm configuration",
            spec.id
        )
        .map_err(|e| pipeline.fail(Phase::ConfigBuild, e))?;
        pipeline.advance(ContainerState::ConfigBuilt);

        let target = with_context!(
            self.placement.select(&self.session, cancel).await,
            "select placement",
            spec.id
        )
        .map_err(|e| pipeline.fail(Phase::Placement, e))?;
        pipeline.advance(ContainerState::Placed);

        let client = self.session.finder();
        let pool = self.session.pool();
        let (folder, host, config) = (&target.folder, &target.host, &config);
        let created = wait_for_result(cancel, move || client.create_vm(folder, config, pool, host)).await;
        with_context!(created, "create vm", spec.id).map_err(|e| pipeline.fail(Phase::Create, e))?;

        pipeline.commit();
        reservation.keep();
        info!(host = %target.host, "Container VM created");

        Ok(ContainerCreated { container_id: spec.id })
    }

    /// Powers on the VM of an existing container.
    ///
    /// Failures leave the container created; its network reservation
    /// belongs to the VM and is not touched.
    #[instrument(name = "start_container", skip_all, fields(container_id = %short_id(id)))]
    pub async fn start(&self, id: &str, cancel: &Cancellation) -> Result<(), PipelineError> {
        let failed = |phase: Phase, err: ProvisionError| {
            error!(phase = %phase, error = %err, "Start failed");
            PipelineError {
                phase,
                state: ContainerState::Created,
                error: err,
                rollback_warnings: Vec::new(),
            }
        };

        let vm = cancel
            .guard(self.session.finder().find_vm(id))
            .await
            .map_err(|kind| failed(Phase::Lookup, ProvisionError::RemoteOperation { kind }))?
            .map_err(|e| {
                let err = match e {
                    ControlPlaneError::NotFound(_) => {
                        ProvisionError::resolution(format!("container {} not found", id))
                    }
                    other => ProvisionError::remote(other.to_string()),
                };
                failed(Phase::Lookup, err)
            })?;

        let client = self.session.finder();
        let vm = &vm;
        wait_for_result(cancel, move || client.power_on(vm))
            .await
            .map_err(|e| failed(Phase::PowerOn, e))?;

        debug!(to = ?ContainerState::PoweredOn, "State transition");
        info!(vm = %vm, "Container powered on");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(names: &Mutex<HashSet<String>>, name: &str) -> bool {
        names.lock().unwrap().contains(name)
    }

    #[test]
    fn test_name_held_while_create_in_flight() {
        let names = Mutex::new(HashSet::new());
        let first = NameReservation::claim(&names, None);
        assert!(held(&names, &first.name));

        // a concurrent attempt cannot draw the same generated name
        let second = NameReservation::claim(&names, None);
        assert_ne!(first.name, second.name);
    }

    #[test]
    fn test_failed_create_frees_name() {
        let names = Mutex::new(HashSet::new());
        let reservation = NameReservation::claim(&names, Some("web"));
        drop(reservation);
        assert!(!held(&names, "web"));
    }

    #[test]
    fn test_kept_name_survives_a_failed_duplicate() {
        let names = Mutex::new(HashSet::new());
        NameReservation::claim(&names, Some("web")).keep();

        let duplicate = NameReservation::claim(&names, Some("web"));
        assert_eq!(duplicate.name, "web");
        drop(duplicate);
        assert!(held(&names, "web"));
    }
}
