pub mod identity;
pub mod network;
pub mod orchestrator;
pub mod placement;
pub mod session;
pub mod tasks;
pub mod vm;
pub mod vm_config;

// exports for the api and cli layers
pub use orchestrator::{ContainerState, Orchestrator, Phase};
pub use session::{ControlPlane, Session, SessionConfig};
pub use tasks::Cancellation;
pub use vm::{ContainerCreated, CreateConfig, CreateRequest, NetworkRequest};
