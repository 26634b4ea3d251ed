//! Pipeline instance state machine
//!
//! An instance owns its worker, its relay, the tunnel in front of the relay
//! and the registration pointing at that tunnel. Startup brings these up
//! strictly in that order; teardown releases them in reverse.

use std::time::Duration;

use tokio::sync::watch;

use bf_core::config::FleetConfig;
use bf_core::error::FleetError;
use bf_core::traits::{RegistrationId, RegistrationRequest, Registrar, Tunnel, TunnelProvisioner};
use bf_core::types::{InstanceId, LifecycleState, PortPair};

use crate::events::{EventSender, FleetEvent};
use crate::fleet::{InstanceOverrides, InstanceSnapshot};
use crate::process::{ChildProcessHandle, LogSink, ProcessSpec, Termination};
use crate::readiness;

/// Shared inputs for starting an instance
pub struct StartContext<'a> {
    pub config: &'a FleetConfig,
    pub provisioner: &'a dyn TunnelProvisioner,
    pub registrar: &'a dyn Registrar,
    pub sink: &'a LogSink,
    pub meeting_url: &'a str,
}

/// One worker + relay + tunnel + registration unit
pub struct PipelineInstance {
    id: InstanceId,
    ports: PortPair,
    overrides: InstanceOverrides,
    state: LifecycleState,
    worker: Option<ChildProcessHandle>,
    relay: Option<ChildProcessHandle>,
    tunnel: Option<Box<dyn Tunnel>>,
    registration: Option<RegistrationId>,
    last_error: Option<String>,
    events: EventSender,
    status: watch::Sender<InstanceSnapshot>,
}

impl PipelineInstance {
    /// Create a pending instance and a receiver that tracks its status
    pub fn new(
        id: InstanceId,
        ports: PortPair,
        overrides: InstanceOverrides,
        events: EventSender,
    ) -> (Self, watch::Receiver<InstanceSnapshot>) {
        let initial = InstanceSnapshot {
            id,
            label: overrides.id.clone(),
            ports,
            state: LifecycleState::Pending,
            worker_pid: None,
            relay_pid: None,
            tunnel_url: None,
            registration: None,
            last_error: None,
        };
        let (status, rx) = watch::channel(initial);

        let instance = Self {
            id,
            ports,
            overrides,
            state: LifecycleState::Pending,
            worker: None,
            relay: None,
            tunnel: None,
            registration: None,
            last_error: None,
            events,
            status,
        };
        (instance, rx)
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Current status
    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id,
            label: self.overrides.id.clone(),
            ports: self.ports,
            state: self.state,
            worker_pid: self.worker.as_ref().and_then(|p| p.pid()),
            relay_pid: self.relay.as_ref().and_then(|p| p.pid()),
            tunnel_url: self.tunnel.as_ref().map(|t| t.public_url().to_string()),
            registration: self.registration.clone(),
            last_error: self.last_error.clone(),
        }
    }

    /// Run the startup sequence through to `Running`
    ///
    /// On failure everything already started is released again and the
    /// instance ends in `Failed`.
    pub async fn start(&mut self, ctx: &StartContext<'_>) -> Result<(), FleetError> {
        tracing::info!(
            instance = %self.id,
            "Starting on ports worker={} relay={}",
            self.ports.worker,
            self.ports.relay
        );

        match self.run_startup(ctx).await {
            Ok(()) => {
                self.transition(LifecycleState::Running);
                tracing::info!(
                    instance = %self.id,
                    url = self.tunnel.as_ref().map(|t| t.public_url()).unwrap_or_default(),
                    "Running"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(instance = %self.id, "Startup failed: {}", e);
                self.last_error = Some(e.to_string());
                self.release_remote(ctx.registrar).await;
                self.stop_processes(ctx.config.timing.grace_timeout).await;
                self.transition(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    async fn run_startup(&mut self, ctx: &StartContext<'_>) -> Result<(), FleetError> {
        let timing = &ctx.config.timing;

        self.transition(LifecycleState::WorkerStarting);
        let spec = ProcessSpec::new(
            self.id.process_name("worker"),
            &ctx.config.worker.program,
            self.worker_args(ctx.config),
        );
        self.worker = Some(ChildProcessHandle::spawn(spec, ctx.sink)?);
        self.publish();
        if let Some(worker) = self.worker.as_mut() {
            readiness::wait_ready(worker, self.ports.worker, timing).await?;
        }
        self.transition(LifecycleState::WorkerReady);

        self.transition(LifecycleState::RelayStarting);
        let spec = ProcessSpec::new(
            self.id.process_name("relay"),
            &ctx.config.relay.program,
            self.relay_args(ctx.config),
        );
        self.relay = Some(ChildProcessHandle::spawn(spec, ctx.sink)?);
        self.publish();
        if let Some(relay) = self.relay.as_mut() {
            readiness::wait_ready(relay, self.ports.relay, timing).await?;
        }
        self.transition(LifecycleState::RelayReady);

        self.transition(LifecycleState::TunnelProvisioning);
        let tunnel = ctx.provisioner.open(self.ports.relay).await?;
        let public_url = tunnel.public_url().to_string();
        self.tunnel = Some(tunnel);
        self.transition(LifecycleState::TunnelReady);

        self.transition(LifecycleState::Registering);
        let request = self.registration_request(ctx, public_url);
        let registration = ctx.registrar.register(&request).await?;
        tracing::info!(instance = %self.id, registration = %registration, "Registered");
        self.registration = Some(registration);

        Ok(())
    }

    fn worker_args(&self, config: &FleetConfig) -> Vec<String> {
        let mut args = config
            .worker
            .render_args(&[("port", self.ports.worker.to_string())]);
        args.extend(self.overrides.worker_args.iter().cloned());
        args
    }

    fn relay_args(&self, config: &FleetConfig) -> Vec<String> {
        let mut args = config.relay.render_args(&[
            ("port", self.ports.relay.to_string()),
            ("upstream", self.ports.upstream_url()),
        ]);
        args.extend(self.overrides.relay_args.iter().cloned());
        args
    }

    fn registration_request(&self, ctx: &StartContext<'_>, public_url: String) -> RegistrationRequest {
        let defaults = &ctx.config.registration;
        let pick = |value: &Option<String>, fallback: &String| {
            value.clone().unwrap_or_else(|| fallback.clone())
        };

        RegistrationRequest {
            meeting_url: ctx.meeting_url.to_string(),
            public_url,
            bot_name: pick(&self.overrides.bot_name, &defaults.bot_name),
            bot_image: pick(&self.overrides.bot_image, &defaults.bot_image),
            entry_message: pick(&self.overrides.entry_message, &defaults.entry_message),
        }
    }

    /// Check a running instance's processes; tear it down if one has died
    ///
    /// Returns true if an unexpected exit was found.
    pub async fn check_liveness(&mut self, registrar: &dyn Registrar, grace: Duration) -> bool {
        if !self.state.is_running() {
            return false;
        }

        let mut dead = None;
        for process in [self.worker.as_mut(), self.relay.as_mut()].into_iter().flatten() {
            if !process.is_alive() {
                dead = Some((process.name().to_string(), process.exit_code()));
                break;
            }
        }
        let Some((process, code)) = dead else {
            return false;
        };

        tracing::warn!(instance = %self.id, "{} exited unexpectedly (code: {:?})", process, code);
        self.events.emit(FleetEvent::UnexpectedExit {
            id: self.id,
            process: process.clone(),
            code,
        });
        self.last_error = Some(FleetError::UnexpectedExit { process, code }.to_string());

        self.transition(LifecycleState::Terminating);
        self.release_remote(registrar).await;
        self.stop_processes(grace).await;
        self.transition(LifecycleState::Stopped);
        true
    }

    /// First half of fleet shutdown: deregister and close the tunnel
    ///
    /// Returns false if deregistration failed.
    pub async fn release_for_shutdown(&mut self, registrar: &dyn Registrar) -> bool {
        if self.state.is_terminal() {
            return true;
        }
        self.transition(LifecycleState::Terminating);
        self.release_remote(registrar).await
    }

    /// Second half of fleet shutdown: stop relay, then worker
    ///
    /// Returns how many processes had to be killed.
    pub async fn finish_shutdown(&mut self, grace: Duration) -> usize {
        if self.state.is_terminal() {
            return 0;
        }
        let forced = self.stop_processes(grace).await;
        self.transition(LifecycleState::Stopped);
        forced
    }

    /// Deregister, then close the tunnel
    async fn release_remote(&mut self, registrar: &dyn Registrar) -> bool {
        let mut clean = true;

        if let Some(registration) = self.registration.take() {
            let ok = match registrar.deregister(&registration).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        instance = %self.id,
                        registration = %registration,
                        "Failed to deregister: {}",
                        e
                    );
                    false
                }
            };
            clean &= ok;
            self.events.emit(FleetEvent::Deregistered { id: self.id, ok });
        }

        if let Some(mut tunnel) = self.tunnel.take() {
            if let Err(e) = tunnel.close().await {
                tracing::warn!(instance = %self.id, "Error closing tunnel: {}", e);
            }
            self.events.emit(FleetEvent::TunnelClosed { id: self.id });
        }

        self.publish();
        clean
    }

    /// Terminate relay, then worker
    async fn stop_processes(&mut self, grace: Duration) -> usize {
        let mut forced = 0;

        for slot in [&mut self.relay, &mut self.worker] {
            let Some(mut process) = slot.take() else {
                continue;
            };
            self.events.emit(FleetEvent::ProcessTerminating {
                id: self.id,
                process: process.name().to_string(),
            });
            if process.terminate(grace).await == Termination::Forced {
                forced += 1;
            }
        }

        self.publish();
        forced
    }

    fn transition(&mut self, to: LifecycleState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::debug!(instance = %self.id, "{} -> {}", from, to);
        self.events.emit(FleetEvent::StateChanged { id: self.id, from, to });
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot());
    }
}
