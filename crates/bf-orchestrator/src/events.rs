//! Fleet lifecycle events

use bf_core::types::{InstanceId, LifecycleState};
use tokio::sync::mpsc;

/// Something observable happened to an instance
#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    /// An instance moved between lifecycle states
    StateChanged {
        id: InstanceId,
        from: LifecycleState,
        to: LifecycleState,
    },

    /// An instance's registration was removed (or the attempt gave up)
    Deregistered { id: InstanceId, ok: bool },

    /// An instance's tunnel finished closing
    TunnelClosed { id: InstanceId },

    /// A process is about to be sent its stop signal
    ProcessTerminating { id: InstanceId, process: String },

    /// A child of a running instance died on its own
    UnexpectedExit {
        id: InstanceId,
        process: String,
        code: Option<i32>,
    },
}

/// Optional event publisher; sending never fails the caller
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<FleetEvent>>,
}

impl EventSender {
    pub fn new(tx: mpsc::UnboundedSender<FleetEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sender that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: FleetEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening any more
            let _ = tx.send(event);
        }
    }
}
