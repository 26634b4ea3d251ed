//! bf-core: Core abstractions and configuration for baas-fleet
//!
//! This crate provides the shared types, configuration structures, error
//! taxonomy and collaborator traits used by the orchestrator and the CLI.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    ConfigError, FleetError, ProvisionError, ReadinessError, RegistrationError, SpawnError,
};
pub use types::{InstanceId, LifecycleState, PortPair, StreamKind};
