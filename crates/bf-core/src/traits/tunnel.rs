//! Tunnel traits

use async_trait::async_trait;

use crate::error::ProvisionError;

/// A public URL forwarding to a local port
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Local port the tunnel forwards to
    fn local_port(&self) -> u16;

    /// Public `https://` URL
    fn public_url(&self) -> &str;

    /// Tear the tunnel down. Calling this on a closed tunnel is a no-op.
    async fn close(&mut self) -> Result<(), ProvisionError>;
}

/// Opens tunnels with an external service
#[async_trait]
pub trait TunnelProvisioner: Send + Sync {
    /// Open a tunnel to `local_port` and wait until its public URL is known
    async fn open(&self, local_port: u16) -> Result<Box<dyn Tunnel>, ProvisionError>;
}
