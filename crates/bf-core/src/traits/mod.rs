//! Collaborator traits for the fleet orchestrator

mod registrar;
mod tunnel;

pub use registrar::{streaming_url, RegistrationId, RegistrationRequest, Registrar};
pub use tunnel::{Tunnel, TunnelProvisioner};
