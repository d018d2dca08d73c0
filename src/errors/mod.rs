use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::core::orchestrator::{ContainerState, Phase};

/// Failure of a single provisioning phase.
///
/// The variants follow the classification reported to clients: malformed
/// input, unresolvable references, network allocation, placement and the
/// remote control-plane operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Resolution error: {message}")]
    Resolution { message: String },

    #[error("Allocation error: {message}")]
    Allocation { message: String, scope: String },

    #[error("Placement error: {message}")]
    Placement { message: String },

    #[error("Remote operation error: {kind}")]
    RemoteOperation { kind: RemoteFailure },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    Failed(String),
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteFailure::Failed(message) => write!(f, "{}", message),
            RemoteFailure::Cancelled => write!(f, "operation cancelled"),
            RemoteFailure::DeadlineExceeded => write!(f, "operation deadline exceeded"),
        }
    }
}

impl ProvisionError {
    pub fn validation(message: impl Into<String>) -> Self {
        ProvisionError::Validation { message: message.into() }
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        ProvisionError::Resolution { message: message.into() }
    }

    pub fn placement(message: impl Into<String>) -> Self {
        ProvisionError::Placement { message: message.into() }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        ProvisionError::RemoteOperation {
            kind: RemoteFailure::Failed(message.into()),
        }
    }

    /// Stable classification string, suitable for API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::Validation { .. } => "validation",
            ProvisionError::Resolution { .. } => "resolution",
            ProvisionError::Allocation { .. } => "allocation",
            ProvisionError::Placement { .. } => "placement",
            ProvisionError::RemoteOperation { kind: RemoteFailure::Failed(_) } => "remote_operation",
            ProvisionError::RemoteOperation { kind: RemoteFailure::Cancelled } => "cancelled",
            ProvisionError::RemoteOperation { kind: RemoteFailure::DeadlineExceeded } => "deadline_exceeded",
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ProvisionError::RemoteOperation {
                kind: RemoteFailure::Cancelled | RemoteFailure::DeadlineExceeded
            }
        )
    }
}

/// Errors reported by the hypervisor control-plane client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Errors reported by a network scope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Scope not found: {0}")]
    NotFound(String),

    #[error("Container {container} is not attached to scope {scope}")]
    ContainerNotFound { container: String, scope: String },

    #[error("Container {container} is already attached to scope {scope}")]
    AlreadyAttached { container: String, scope: String },

    #[error("Address {address} is not in subnet {subnet}")]
    OutOfRange { address: String, subnet: String },

    #[error("Address {0} is already in use")]
    AddressInUse(String),

    #[error("Address pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Scope state unavailable: {0}")]
    Unavailable(String),
}

/// A compensating action that did not complete.
///
/// Warnings are logged and handed back alongside the original error; they
/// never replace it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Rollback of {container} in scope {scope} failed: {message}")]
pub struct RollbackWarning {
    pub container: String,
    pub scope: String,
    pub message: String,
}

impl RollbackWarning {
    pub fn log(&self) {
        warn!(
            container = %self.container,
            scope = %self.scope,
            error = %self.message,
            "Compensating network release failed"
        );
    }
}

/// Structured error returned by the create/start pipeline.
#[derive(Error, Debug, Clone)]
#[error("{phase} failed: {error}")]
pub struct PipelineError {
    pub phase: Phase,
    /// State the container was left in.
    pub state: ContainerState,
    #[source]
    pub error: ProvisionError,
    pub rollback_warnings: Vec<RollbackWarning>,
}

impl PipelineError {
    pub fn new(phase: Phase, state: ContainerState, error: ProvisionError) -> Self {
        Self {
            phase,
            state,
            error,
            rollback_warnings: Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

// Error context for tracking where a phase failed
#[derive(Debug)]
pub struct ErrorContext {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source_location: &'static str,
    pub operation: String,
    pub container_id: Option<String>,
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

// Helper macro for context addition
#[macro_export]
macro_rules! with_context {
    ($result:expr, $operation:expr, $container_id:expr) => {
        $result.map_err(|e| {
            let context = $crate::errors::ErrorContext {
                timestamp: chrono::Utc::now(),
                source_location: std::file!(),
                operation: $operation.to_string(),
                container_id: Some($container_id.to_string()),
            };
            tracing::error!(
                error = %e,
                context = ?context,
                "Operation failed"
            );
            e
        })
    };
}
