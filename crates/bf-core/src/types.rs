//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Number of ports reserved per pipeline instance (worker + relay)
pub const PORT_PAIR_WIDTH: u16 = 2;

/// Ordinal identity of a pipeline instance, starting at 1 in launch order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub usize);

impl InstanceId {
    /// Create an instance ID from its ordinal
    pub fn new(ordinal: usize) -> Self {
        Self(ordinal)
    }

    /// Name of a process belonging to this instance, e.g. `relay-3`
    pub fn process_name(&self, role: &str) -> String {
        format!("{}-{}", role, self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline-{}", self.0)
    }
}

/// The two local ports owned by one pipeline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortPair {
    /// Port the worker listens on
    pub worker: u16,
    /// Port the relay listens on (and the tunnel exposes)
    pub relay: u16,
}

impl PortPair {
    /// Port pair for the zero-based `index`-th instance of a fleet starting at `start_port`
    pub fn allocate(start_port: u16, index: usize) -> Result<Self, ConfigError> {
        if start_port == 0 {
            return Err(ConfigError::Invalid("start port must be non-zero".into()));
        }

        let worker = index
            .checked_mul(PORT_PAIR_WIDTH as usize)
            .and_then(|offset| offset.checked_add(start_port as usize))
            .filter(|port| *port < u16::MAX as usize)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "port range for instance {} starting at {} exceeds 65535",
                    index + 1,
                    start_port
                ))
            })?;

        Ok(Self {
            worker: worker as u16,
            relay: worker as u16 + 1,
        })
    }

    /// Port pairs for a whole fleet of `count` instances
    pub fn allocate_range(start_port: u16, count: usize) -> Result<Vec<Self>, ConfigError> {
        (0..count)
            .map(|index| Self::allocate(start_port, index))
            .collect()
    }

    /// WebSocket URL the relay uses to reach the worker
    pub fn upstream_url(&self) -> String {
        format!("ws://localhost:{}", self.worker)
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.worker, self.relay)
    }
}

/// Which output stream a line of child output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Lifecycle of a pipeline instance
///
/// Startup walks the states in declaration order up to `Running`. Any state
/// may fall to `Failed`; `Running` leaves through `Terminating` to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Pending,
    WorkerStarting,
    WorkerReady,
    RelayStarting,
    RelayReady,
    TunnelProvisioning,
    TunnelReady,
    Registering,
    Running,
    Terminating,
    Stopped,
    Failed,
}

impl LifecycleState {
    /// `Stopped` and `Failed` are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }

    /// Whether the instance is part of the monitored fleet
    pub fn is_running(&self) -> bool {
        matches!(self, LifecycleState::Running)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Pending => "pending",
            LifecycleState::WorkerStarting => "worker-starting",
            LifecycleState::WorkerReady => "worker-ready",
            LifecycleState::RelayStarting => "relay-starting",
            LifecycleState::RelayReady => "relay-ready",
            LifecycleState::TunnelProvisioning => "tunnel-provisioning",
            LifecycleState::TunnelReady => "tunnel-ready",
            LifecycleState::Registering => "registering",
            LifecycleState::Running => "running",
            LifecycleState::Terminating => "terminating",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}
