//! What to launch

use serde::{Deserialize, Serialize};

use bf_core::error::ConfigError;
use bf_core::types::PortPair;

/// Per-instance adjustments, e.g. from a batch file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceOverrides {
    /// Free-form label shown in snapshots
    pub id: Option<String>,
    /// Appended to the worker's templated arguments
    pub worker_args: Vec<String>,
    /// Appended to the relay's templated arguments
    pub relay_args: Vec<String>,
    pub bot_name: Option<String>,
    pub bot_image: Option<String>,
    pub entry_message: Option<String>,
}

/// A fleet launch request
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    /// Meeting every bot joins
    pub meeting_url: String,
    /// First port of the first instance's pair
    pub start_port: u16,
    /// One entry per instance, in launch order
    pub instances: Vec<InstanceOverrides>,
}

impl LaunchPlan {
    /// `count` instances with no per-instance overrides
    pub fn uniform(meeting_url: impl Into<String>, start_port: u16, count: usize) -> Self {
        Self {
            meeting_url: meeting_url.into(),
            start_port,
            instances: vec![InstanceOverrides::default(); count],
        }
    }

    pub fn count(&self) -> usize {
        self.instances.len()
    }

    /// Check the plan and allocate its port pairs
    ///
    /// Each instance's tunnel agent takes one inspect API port counting up
    /// from `inspect_base_port`; no pair may land on one of those.
    pub fn allocate_ports(&self, inspect_base_port: u16) -> Result<Vec<PortPair>, ConfigError> {
        if self.instances.is_empty() {
            return Err(ConfigError::Invalid("instance count must be at least 1".into()));
        }
        if !self.meeting_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "meeting URL must start with https:// (got {:?})",
                self.meeting_url
            )));
        }
        let pairs = PortPair::allocate_range(self.start_port, self.instances.len())?;

        let inspect_last = u16::try_from(self.instances.len() - 1)
            .ok()
            .and_then(|offset| inspect_base_port.checked_add(offset))
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{} inspect API ports from {} run past 65535",
                    self.instances.len(),
                    inspect_base_port
                ))
            })?;
        let inspect = inspect_base_port..=inspect_last;
        if let Some(pair) = pairs
            .iter()
            .find(|p| inspect.contains(&p.worker) || inspect.contains(&p.relay))
        {
            return Err(ConfigError::Invalid(format!(
                "port pair {} collides with tunnel inspect API ports {}-{}",
                pair, inspect_base_port, inspect_last
            )));
        }

        Ok(pairs)
    }
}
