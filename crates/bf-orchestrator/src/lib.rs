//! bf-orchestrator: Launches and supervises a fleet of pipeline instances
//!
//! Each pipeline instance is a worker process, a relay process in front of
//! it, a public tunnel to the relay, and a Meeting BaaS bot registered
//! against that tunnel. The fleet manager starts instances one at a time,
//! watches them while they run, and tears the whole fleet down in a fixed
//! order when asked to stop.

pub mod backoff;
pub mod events;
pub mod fleet;
pub mod instance;
pub mod process;
pub mod readiness;
pub mod registration;
pub mod tunnel;

pub use events::FleetEvent;
pub use fleet::{
    FleetManager, InstanceOverrides, InstanceSnapshot, LaunchPlan, LaunchReport, ShutdownReport,
};
pub use process::{ChildProcessHandle, LogLine, LogSink, ProcessSpec};
pub use registration::MeetingBaasClient;
pub use tunnel::NgrokProvisioner;
