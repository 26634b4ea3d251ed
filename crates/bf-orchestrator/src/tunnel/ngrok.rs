//! ngrok tunnel adapter
//!
//! Each tunnel is its own `ngrok` agent process with a private inspect API
//! port. The public URL is read back from the agent's `/api/tunnels`
//! endpoint once the agent has established its session.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;

use bf_core::config::{TunnelConfig, AUTHTOKEN_ENV};
use bf_core::error::{ConfigError, ProvisionError};
use bf_core::traits::{Tunnel, TunnelProvisioner};

use crate::backoff::ExponentialBackoff;
use crate::process::{ChildProcessHandle, LogLine, LogSink, ProcessSpec};

/// Per-request timeout against the agent's inspect API
const INSPECT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Body of `GET /api/tunnels`
#[derive(Debug, Clone, Deserialize)]
pub struct InspectResponse {
    #[serde(default)]
    pub tunnels: Vec<InspectTunnel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InspectTunnel {
    pub public_url: String,
    #[serde(default)]
    pub config: Option<InspectTunnelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InspectTunnelConfig {
    pub addr: String,
}

/// Pick the `https` URL forwarding to `local_port` out of an inspect response
pub fn parse_public_url(response: &InspectResponse, local_port: u16) -> Option<String> {
    let suffix = format!(":{}", local_port);
    response
        .tunnels
        .iter()
        .filter(|t| t.public_url.starts_with("https://"))
        .find(|t| match &t.config {
            Some(config) => config.addr.ends_with(&suffix),
            None => true,
        })
        .map(|t| t.public_url.clone())
}

/// Session failure reported by the agent, if `line` is one
///
/// ngrok tags these with an `ERR_NGROK_<code>` reference, either in a
/// logfmt `err="..."` field or on an `ERROR:` line.
pub fn agent_error_message(line: &str) -> Option<String> {
    if !line.contains("ERR_NGROK_") {
        return None;
    }

    let message = match line.find("err=\"") {
        Some(start) => {
            let rest = &line[start + "err=\"".len()..];
            rest.split('"').next().unwrap_or(rest)
        }
        None => line.trim_start().trim_start_matches("ERROR:"),
    };
    let message = message.replace("\\n", " ");
    Some(message.trim().to_string())
}

/// Opens tunnels by running one ngrok agent per local port
pub struct NgrokProvisioner {
    config: TunnelConfig,
    authtoken: String,
    grace: Duration,
    next_web_port: AtomicU16,
    http: reqwest::Client,
    sink: LogSink,
}

impl NgrokProvisioner {
    /// Create a provisioner; fails if no authtoken is configured
    pub fn new(config: &TunnelConfig, grace: Duration, sink: LogSink) -> Result<Self, ConfigError> {
        let authtoken = config
            .authtoken
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::MissingField(AUTHTOKEN_ENV.into()))?;

        let http = reqwest::Client::builder()
            .timeout(INSPECT_REQUEST_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            next_web_port: AtomicU16::new(config.inspect_base_port),
            config: config.clone(),
            authtoken,
            grace,
            http,
            sink,
        })
    }

    fn agent_spec(&self, local_port: u16, web_port: u16) -> ProcessSpec {
        let args = self.config.command().render_args(&[
            ("port", local_port.to_string()),
            ("web_port", web_port.to_string()),
        ]);
        ProcessSpec::new(format!("tunnel-{}", local_port), &self.config.program, args)
            .env(AUTHTOKEN_ENV, self.authtoken.clone())
    }

    async fn fetch_tunnels(&self, web_port: u16) -> Result<InspectResponse, reqwest::Error> {
        self.http
            .get(format!("http://127.0.0.1:{}/api/tunnels", web_port))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Poll the agent's inspect API until a public URL shows up
    async fn await_public_url(
        &self,
        agent: &mut ChildProcessHandle,
        local_port: u16,
        web_port: u16,
    ) -> Result<String, ProvisionError> {
        let timeout = self.config.open_timeout;
        let deadline = Instant::now() + timeout;
        let mut backoff = ExponentialBackoff::tunnel_poll();

        loop {
            if !agent.is_alive() {
                return Err(ProvisionError::AgentExited {
                    code: agent.exit_code(),
                });
            }

            match self.fetch_tunnels(web_port).await {
                Ok(response) => {
                    if let Some(url) = parse_public_url(&response, local_port) {
                        return Ok(url);
                    }
                }
                Err(e) => {
                    tracing::trace!(port = local_port, "Inspect API not ready: {}", e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ProvisionError::Timeout {
                    port: local_port,
                    waited: timeout,
                });
            }
            tokio::time::sleep(backoff.next_delay_within(deadline - now)).await;
        }
    }
}

#[async_trait]
impl TunnelProvisioner for NgrokProvisioner {
    async fn open(&self, local_port: u16) -> Result<Box<dyn Tunnel>, ProvisionError> {
        let web_port = self
            .next_web_port
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |port| port.checked_add(1))
            .map_err(|_| ProvisionError::Rejected("no inspect API ports left".into()))?;
        tracing::info!(port = local_port, web_port, "Opening tunnel");

        let reported = Arc::new(Mutex::new(None::<String>));
        let sink = self.sink.observed({
            let reported = reported.clone();
            move |line: &LogLine| {
                if let Some(message) = agent_error_message(&line.text) {
                    if let Ok(mut slot) = reported.lock() {
                        *slot = Some(message);
                    }
                }
            }
        });

        let mut agent = ChildProcessHandle::spawn(self.agent_spec(local_port, web_port), &sink)?;

        match self.await_public_url(&mut agent, local_port, web_port).await {
            Ok(public_url) => {
                tracing::info!(port = local_port, "Tunnel ready: {}", public_url);
                Ok(Box::new(NgrokTunnel {
                    local_port,
                    public_url,
                    agent: Some(agent),
                    grace: self.grace,
                }))
            }
            Err(e) => {
                // Terminating drains the agent's output, so its last error is in
                agent.terminate(self.grace).await;
                let reported = reported.lock().ok().and_then(|mut slot| slot.take());
                match reported {
                    Some(message) => {
                        tracing::debug!(port = local_port, "Agent reported a session error ({})", e);
                        Err(ProvisionError::Rejected(message))
                    }
                    None => Err(e),
                }
            }
        }
    }
}

/// An open ngrok tunnel, owning its agent process
pub struct NgrokTunnel {
    local_port: u16,
    public_url: String,
    /// `None` once closed
    agent: Option<ChildProcessHandle>,
    grace: Duration,
}

#[async_trait]
impl Tunnel for NgrokTunnel {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    fn public_url(&self) -> &str {
        &self.public_url
    }

    async fn close(&mut self) -> Result<(), ProvisionError> {
        let Some(mut agent) = self.agent.take() else {
            return Ok(());
        };

        tracing::info!(port = self.local_port, "Closing tunnel {}", self.public_url);
        agent.terminate(self.grace).await;
        Ok(())
    }
}
