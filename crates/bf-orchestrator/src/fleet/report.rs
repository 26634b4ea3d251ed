//! Fleet status and reports

use std::time::Duration;

use serde::Serialize;

use bf_core::traits::RegistrationId;
use bf_core::types::{InstanceId, LifecycleState, PortPair};

/// Point-in-time view of one instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub label: Option<String>,
    pub ports: PortPair,
    pub state: LifecycleState,
    pub worker_pid: Option<u32>,
    pub relay_pid: Option<u32>,
    /// Public URL while the tunnel is open
    pub tunnel_url: Option<String>,
    pub registration: Option<RegistrationId>,
    pub last_error: Option<String>,
}

/// Result of `launch_fleet`
#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    /// Number of instances asked for
    pub requested: usize,
    /// Every instance that was attempted, as it stood when its startup ended
    pub instances: Vec<InstanceSnapshot>,
    /// Launch stopped early because shutdown was requested
    pub interrupted: bool,
}

impl LaunchReport {
    pub fn running(&self) -> usize {
        self.count(LifecycleState::Running)
    }

    pub fn failed(&self) -> usize {
        self.count(LifecycleState::Failed)
    }

    /// Instances never attempted
    pub fn not_started(&self) -> usize {
        self.requested.saturating_sub(self.instances.len())
    }

    fn count(&self, state: LifecycleState) -> usize {
        self.instances.iter().filter(|i| i.state == state).count()
    }
}

/// Result of `shutdown`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// Instances that ended in `Stopped`
    pub stopped: usize,
    /// Instances that ended in `Failed`
    pub failed: usize,
    /// Processes that ignored the stop signal and were killed
    pub forced_kills: usize,
    pub deregistration_failures: usize,
    #[serde(with = "bf_core::config::serde_utils::duration_millis")]
    pub elapsed: Duration,
}
