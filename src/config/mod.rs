pub mod settings;

pub use settings::{generate_default_config, OperationSettings, ScopeSettings, ServerSettings, Settings, SimulatorSettings};
