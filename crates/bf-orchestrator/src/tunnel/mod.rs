//! Tunnel provisioning

mod ngrok;

pub use ngrok::{parse_public_url, InspectResponse, NgrokProvisioner, NgrokTunnel};
