use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::api::{create_router, AppState};
use crate::backend::{MemoryScope, MemoryScopeProvider, SimulatedControlPlane};
use crate::config::{Settings, SimulatorSettings};
use crate::core::network::{Scope, ScopeProvider};
use crate::core::{Orchestrator, Session};

pub fn build_scopes(settings: &SimulatorSettings) -> anyhow::Result<Arc<dyn ScopeProvider>> {
    let default: Arc<dyn Scope> = Arc::new(
        MemoryScope::from_cidr(&settings.default_scope.name, &settings.default_scope.subnet)
            .with_context(|| format!("default scope {}", settings.default_scope.name))?,
    );

    let others = settings
        .scopes
        .iter()
        .map(|s| {
            MemoryScope::from_cidr(&s.name, &s.subnet)
                .map(|scope| Arc::new(scope) as Arc<dyn Scope>)
                .with_context(|| format!("scope {}", s.name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Arc::new(MemoryScopeProvider::new(default, others)))
}

/// Creates the process-wide session and everything that hangs off it.
pub async fn build_state(settings: &Settings) -> anyhow::Result<Arc<AppState>> {
    let sim = &settings.simulator;
    let client = Arc::new(SimulatedControlPlane::new(&sim.datastore, &sim.network_ref, sim.hosts.clone()));

    let session = Session::create(settings.session.clone(), client)
        .await
        .context("failed to create control plane session")?;
    let scopes = build_scopes(sim)?;

    let orchestrator = Orchestrator::new(Arc::new(session), scopes, settings.vm.clone());
    Ok(Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        request_timeout: settings.operations.timeout(),
    }))
}

pub async fn run_server(settings: Settings, port: u16) -> anyhow::Result<()> {
    let state = match build_state(&settings).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Startup failed");
            return Err(e);
        }
    };

    let app = create_router(state, &settings.server.api_prefix);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => {
                    error!("Cannot listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await
                }
            }
        })
        .await?;

    Ok(())
}
