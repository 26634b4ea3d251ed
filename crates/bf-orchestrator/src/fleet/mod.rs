//! Fleet manager
//!
//! Owns every pipeline instance. Instances are started one at a time, then
//! watched on a fixed interval until shutdown is requested. Shutdown runs
//! once no matter how many callers ask for it:
//!
//! 1. In launch order, each live instance is deregistered and its tunnel
//!    closed, so no new external traffic arrives anywhere in the fleet.
//! 2. All instances then stop their relay and worker concurrently.

mod plan;
mod report;

pub use plan::{InstanceOverrides, LaunchPlan};
pub use report::{InstanceSnapshot, LaunchReport, ShutdownReport};

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Mutex, OnceCell};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use bf_core::config::FleetConfig;
use bf_core::error::{ConfigError, FleetError};
use bf_core::traits::{Registrar, TunnelProvisioner};
use bf_core::types::{InstanceId, LifecycleState};

use crate::events::{EventSender, FleetEvent};
use crate::instance::{PipelineInstance, StartContext};
use crate::process::LogSink;

struct InstanceSlot {
    instance: Arc<Mutex<PipelineInstance>>,
    status: watch::Receiver<InstanceSnapshot>,
}

#[derive(Default)]
struct FleetState {
    /// Launch order
    slots: Vec<InstanceSlot>,
    launched: bool,
}

/// Launches, monitors and shuts down a fleet of pipeline instances
pub struct FleetManager {
    config: FleetConfig,
    provisioner: Arc<dyn TunnelProvisioner>,
    registrar: Arc<dyn Registrar>,
    sink: LogSink,
    events: EventSender,
    state: Mutex<FleetState>,
    cancel: CancellationToken,
    shutdown: OnceCell<ShutdownReport>,
}

impl FleetManager {
    pub fn new(
        config: FleetConfig,
        provisioner: Arc<dyn TunnelProvisioner>,
        registrar: Arc<dyn Registrar>,
        sink: LogSink,
    ) -> Self {
        Self {
            config,
            provisioner,
            registrar,
            sink,
            events: EventSender::disabled(),
            state: Mutex::new(FleetState::default()),
            cancel: CancellationToken::new(),
            shutdown: OnceCell::new(),
        }
    }

    /// Publish lifecycle events on `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<FleetEvent>) -> Self {
        self.events = EventSender::new(tx);
        self
    }

    /// Token that, once cancelled, stops launching and monitoring
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Start every instance in `plan`, one after another
    ///
    /// Configuration problems are returned before any process is started.
    /// A failing instance is reported and the next one is still attempted.
    /// Once shutdown is requested no further instance is started; an
    /// instance already starting finishes its sequence first.
    pub async fn launch_fleet(&self, plan: &LaunchPlan) -> Result<LaunchReport, FleetError> {
        self.config.validate()?;
        let ports = plan.allocate_ports(self.config.tunnel.inspect_base_port)?;

        {
            let mut state = self.state.lock().await;
            if state.launched {
                return Err(ConfigError::Invalid("fleet has already been launched".into()).into());
            }
            state.launched = true;
        }

        tracing::info!(
            "Launching {} pipeline instance(s) from port {}",
            plan.count(),
            plan.start_port
        );

        let ctx = StartContext {
            config: &self.config,
            provisioner: self.provisioner.as_ref(),
            registrar: self.registrar.as_ref(),
            sink: &self.sink,
            meeting_url: &plan.meeting_url,
        };
        let stagger = self.config.timing.stagger_delay;
        let mut attempted = Vec::with_capacity(plan.count());
        let mut interrupted = false;

        for (index, (ports, overrides)) in ports.into_iter().zip(&plan.instances).enumerate() {
            if index > 0 && !stagger.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(stagger) => {}
                }
            }

            let id = InstanceId::new(index + 1);
            let (instance, status) =
                PipelineInstance::new(id, ports, overrides.clone(), self.events.clone());
            let instance = Arc::new(Mutex::new(instance));

            // Register and lock under the fleet lock so shutdown either never
            // sees this instance or waits for its startup to finish
            let mut guard = {
                let mut state = self.state.lock().await;
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                let guard = instance.clone().lock_owned().await;
                state.slots.push(InstanceSlot { instance, status });
                guard
            };

            // Errors are already logged and recorded on the instance
            let _ = guard.start(&ctx).await;
            attempted.push(guard.snapshot());
        }

        let report = LaunchReport {
            requested: plan.count(),
            instances: attempted,
            interrupted,
        };
        tracing::info!(
            "{} of {} pipeline instance(s) running, {} failed",
            report.running(),
            report.requested,
            report.failed()
        );
        if report.interrupted {
            tracing::warn!("Launch interrupted, {} instance(s) not started", report.not_started());
        }
        Ok(report)
    }

    /// Check running instances on every monitor interval until shutdown
    pub async fn monitor(&self) {
        let mut ticker = tokio::time::interval(self.config.timing.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.check_instances().await;
        }

        tracing::debug!("Monitoring stopped");
    }

    /// One monitoring pass; returns the number of unexpected exits found
    pub async fn check_instances(&self) -> usize {
        let running: Vec<_> = {
            let state = self.state.lock().await;
            state
                .slots
                .iter()
                .filter(|slot| slot.status.borrow().state.is_running())
                .map(|slot| slot.instance.clone())
                .collect()
        };

        let grace = self.config.timing.grace_timeout;
        let mut exits = 0;
        for instance in running {
            if self.cancel.is_cancelled() {
                break;
            }
            let mut instance = instance.lock().await;
            if instance.check_liveness(self.registrar.as_ref(), grace).await {
                exits += 1;
            }
        }
        exits
    }

    /// Tear the fleet down; concurrent and repeated calls share one teardown
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown.get_or_init(|| self.teardown()).await.clone()
    }

    async fn teardown(&self) -> ShutdownReport {
        let started = Instant::now();
        self.cancel.cancel();

        let instances: Vec<_> = {
            let state = self.state.lock().await;
            state.slots.iter().map(|slot| slot.instance.clone()).collect()
        };
        tracing::info!("Shutting down {} pipeline instance(s)", instances.len());

        let mut deregistration_failures = 0;
        for instance in &instances {
            let mut instance = instance.lock().await;
            if !instance.release_for_shutdown(self.registrar.as_ref()).await {
                deregistration_failures += 1;
            }
        }

        let grace = self.config.timing.grace_timeout;
        let forced = futures::future::join_all(
            instances
                .iter()
                .map(|instance| async move { instance.lock().await.finish_shutdown(grace).await }),
        )
        .await;

        let mut report = ShutdownReport {
            forced_kills: forced.into_iter().sum(),
            deregistration_failures,
            ..ShutdownReport::default()
        };
        for instance in &instances {
            match instance.lock().await.state() {
                LifecycleState::Stopped => report.stopped += 1,
                LifecycleState::Failed => report.failed += 1,
                _ => {}
            }
        }
        report.elapsed = started.elapsed();

        tracing::info!(
            stopped = report.stopped,
            failed = report.failed,
            forced_kills = report.forced_kills,
            "Shutdown complete in {:?}",
            report.elapsed
        );
        report
    }

    /// Current status of every instance, in launch order
    pub async fn snapshot(&self) -> Vec<InstanceSnapshot> {
        let state = self.state.lock().await;
        state
            .slots
            .iter()
            .map(|slot| slot.status.borrow().clone())
            .collect()
    }
}
