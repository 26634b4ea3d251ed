//! Fleet configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::error::ConfigError;

/// Environment variable carrying the tunnel service token
pub const AUTHTOKEN_ENV: &str = "NGROK_AUTHTOKEN";

/// Environment variable carrying the Meeting BaaS API key
pub const API_KEY_ENV: &str = "MEETING_BAAS_API_KEY";

/// Configuration for a fleet launch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Command that starts a worker
    pub worker: CommandConfig,

    /// Command that starts a relay
    pub relay: CommandConfig,

    /// Tunnel agent settings
    pub tunnel: TunnelConfig,

    /// Remote registration settings
    pub registration: RegistrationConfig,

    /// Timeouts and delays
    pub timing: TimingConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            worker: CommandConfig::default(),
            relay: default_relay(),
            tunnel: TunnelConfig::default(),
            registration: RegistrationConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Override secrets from an environment lookup
    ///
    /// Blank values are ignored, so a file setting survives an empty variable.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(AUTHTOKEN_ENV) {
            self.tunnel.authtoken = Some(token);
        }
        if let Some(key) = non_empty(API_KEY_ENV) {
            self.registration.api_key = Some(key);
        }
    }

    /// Check everything that must hold before any process is started
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tunnel.authtoken.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingField(AUTHTOKEN_ENV.into()));
        }
        if self.registration.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingField(API_KEY_ENV.into()));
        }

        for (section, program) in [
            ("worker", &self.worker.program),
            ("relay", &self.relay.program),
            ("tunnel", &self.tunnel.program),
        ] {
            if program.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{}.program is empty", section)));
            }
        }

        if self.timing.grace_timeout.is_zero() {
            return Err(ConfigError::Invalid("timing.grace_timeout must be > 0".into()));
        }
        if self.timing.monitor_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "timing.monitor_interval must be > 0".into(),
            ));
        }
        if self.registration.api_base.trim().is_empty() {
            return Err(ConfigError::Invalid("registration.api_base is empty".into()));
        }

        Ok(())
    }
}

/// A program plus an argument template
///
/// Arguments may contain `{name}` placeholders which are substituted
/// per instance, e.g. `{port}` and `{upstream}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Executable name or path
    pub program: String,

    /// Argument template
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Substitute placeholders into the argument template
    pub fn render_args(&self, vars: &[(&str, String)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{}}}", name), value)
                })
            })
            .collect()
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self::new("poetry", &["run", "bot", "-p", "{port}"])
    }
}

/// Tunnel agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Agent executable
    pub program: String,

    /// Agent arguments; `{port}` is the local port, `{web_port}` the inspect API port
    pub args: Vec<String>,

    /// First port used for agents' local inspect APIs
    pub inspect_base_port: u16,

    /// Service token, passed to the agent through its environment
    #[serde(skip_serializing)]
    pub authtoken: Option<String>,

    /// How long to wait for a public URL
    #[serde(with = "duration_millis")]
    pub open_timeout: Duration,
}

impl TunnelConfig {
    /// Agent program and argument template as a command
    pub fn command(&self) -> CommandConfig {
        CommandConfig {
            program: self.program.clone(),
            args: self.args.clone(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        let args = [
            "http",
            "{port}",
            "--web-addr",
            "127.0.0.1:{web_port}",
            "--log",
            "stdout",
        ];
        Self {
            program: "ngrok".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            inspect_base_port: 4040,
            authtoken: None,
            open_timeout: Duration::from_secs(20),
        }
    }
}

/// Meeting BaaS registration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// API base URL, without trailing slash
    pub api_base: String,

    /// API key, sent as `x-meeting-baas-api-key`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Display name of the bot in the meeting
    pub bot_name: String,

    /// Avatar shown for the bot
    pub bot_image: String,

    /// Chat message the bot posts when it joins
    pub entry_message: String,

    /// Per-request timeout
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.meetingbaas.com".to_string(),
            api_key: None,
            bot_name: "Speaking MeetingBaas Bot".to_string(),
            bot_image: "https://utfs.io/f/N2K2zOxB65Cx6UOeGHsoI9OHcetbNxLZB2ErqhAzDfFlMXYK"
                .to_string(),
            entry_message: "I'm ready, you can talk to start chatting!".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// How the orchestrator decides a freshly spawned process is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessMode {
    /// Poll the process's port until it accepts a TCP connection
    Probe,
    /// Wait a fixed delay, then check the process is still alive
    Settle,
}

/// Timeouts and delays
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Readiness strategy
    pub readiness: ReadinessMode,

    /// Upper bound on a readiness probe
    #[serde(with = "duration_millis")]
    pub probe_timeout: Duration,

    /// Delay used in `settle` mode
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,

    /// Time a process gets between SIGTERM and SIGKILL
    #[serde(with = "duration_millis")]
    pub grace_timeout: Duration,

    /// Liveness check period
    #[serde(with = "duration_millis")]
    pub monitor_interval: Duration,

    /// Pause between starting consecutive instances
    #[serde(with = "duration_millis")]
    pub stagger_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            readiness: ReadinessMode::Probe,
            probe_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_secs(1),
            grace_timeout: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(1),
            stagger_delay: Duration::from_secs(1),
        }
    }
}

/// Default relay command
fn default_relay() -> CommandConfig {
    CommandConfig::new(
        "poetry",
        &["run", "proxy", "-p", "{port}", "--websocket-url", "{upstream}"],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.tunnel.authtoken = Some("tok".into());
        config.registration.api_key = Some("key".into());
        config
    }

    #[test]
    fn test_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.worker.program, "poetry");
        assert_eq!(config.relay.args[1], "proxy");
        assert_eq!(config.tunnel.program, "ngrok");
        assert_eq!(config.timing.readiness, ReadinessMode::Probe);
        assert_eq!(config.timing.grace_timeout, Duration::from_secs(5));
        assert!(config.tunnel.authtoken.is_none());
    }

    #[test]
    fn test_render_args() {
        let relay = default_relay();
        let args = relay.render_args(&[
            ("port", "8766".to_string()),
            ("upstream", "ws://localhost:8765".to_string()),
        ]);
        assert_eq!(
            args,
            vec!["run", "proxy", "-p", "8766", "--websocket-url", "ws://localhost:8765"]
        );
    }

    #[test]
    fn test_render_args_unknown_placeholder_kept() {
        let cmd = CommandConfig::new("x", &["{nope}", "{port}"]);
        assert_eq!(cmd.render_args(&[("port", "9".into())]), vec!["{nope}", "9"]);
    }

    #[test]
    fn test_validate_missing_authtoken() {
        let mut config = valid_config();
        config.tunnel.authtoken = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(f)) if f == AUTHTOKEN_ENV
        ));
    }

    #[test]
    fn test_validate_missing_api_key() {
        let mut config = valid_config();
        config.registration.api_key = Some(String::new());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(f)) if f == API_KEY_ENV
        ));
    }

    #[test]
    fn test_validate_rejects_zero_durations_and_empty_program() {
        let mut config = valid_config();
        config.timing.grace_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = valid_config();
        config.timing.monitor_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = valid_config();
        config.relay.program = "  ".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_apply_env_overrides_file() {
        let mut config = FleetConfig::default();
        config.tunnel.authtoken = Some("from-file".into());
        config.apply_env(|key| match key {
            AUTHTOKEN_ENV => Some("from-env".into()),
            API_KEY_ENV => Some("key-env".into()),
            _ => None,
        });
        assert_eq!(config.tunnel.authtoken.as_deref(), Some("from-env"));
        assert_eq!(config.registration.api_key.as_deref(), Some("key-env"));
    }

    #[test]
    fn test_apply_env_ignores_blank_values() {
        let mut config = FleetConfig::default();
        config.apply_env(|_| Some("   ".into()));
        assert!(config.tunnel.authtoken.is_none());
        assert!(config.registration.api_key.is_none());

        config.registration.api_key = Some("from-file".into());
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.registration.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_secrets_not_serialized() {
        let config = valid_config();
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("authtoken"));
        assert!(!text.contains("api_key"));
        assert!(text.contains("grace_timeout = 5000"));
    }
}
