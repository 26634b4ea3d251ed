//! Error taxonomy for baas-fleet
//!
//! Per-instance failures (`SpawnError`, `ReadinessError`, `ProvisionError`,
//! `RegistrationError`, unexpected exits) are contained within the instance
//! that raised them. `ConfigError` is the only class that stops the fleet
//! from launching at all.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for fleet operations
#[derive(Error, Debug)]
pub enum FleetError {
    /// A child process could not be launched
    #[error("Spawn error: {0}")]
    Spawn(#[from] SpawnError),

    /// A child process never became ready
    #[error("Readiness error: {0}")]
    Readiness(#[from] ReadinessError),

    /// The tunnel service rejected or failed the request
    #[error("Tunnel error: {0}")]
    Provision(#[from] ProvisionError),

    /// The remote registration call failed
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// A child died while its instance was running
    #[error("Process {process} exited unexpectedly (code: {code:?})")]
    UnexpectedExit { process: String, code: Option<i32> },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors launching a child process
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The executable does not exist or is not on PATH
    #[error("Executable not found: {program}")]
    NotFound { program: String },

    /// The executable exists but may not be run
    #[error("Permission denied launching {program}")]
    PermissionDenied { program: String },

    /// Any other launch failure
    #[error("Failed to launch {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    /// Classify an I/O error returned by `spawn`
    pub fn from_io(program: &str, source: io::Error) -> Self {
        let program = program.to_string();
        match source.kind() {
            io::ErrorKind::NotFound => SpawnError::NotFound { program },
            io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied { program },
            _ => SpawnError::Io { program, source },
        }
    }
}

/// Errors waiting for a child process to accept connections
#[derive(Error, Debug)]
pub enum ReadinessError {
    /// Nothing accepted connections before the probe timeout
    #[error("{name} did not accept connections on port {port} within {waited:?}")]
    Timeout {
        name: String,
        port: u16,
        waited: Duration,
    },

    /// The process died while we were waiting for it
    #[error("{name} exited before becoming ready (code: {code:?})")]
    Exited { name: String, code: Option<i32> },
}

/// Tunnel provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The tunnel agent could not be launched
    #[error("Tunnel agent failed to start: {0}")]
    Agent(#[from] SpawnError),

    /// The tunnel agent died before publishing a URL
    #[error("Tunnel agent exited before the tunnel was ready (code: {code:?})")]
    AgentExited { code: Option<i32> },

    /// No public URL appeared in time
    #[error("Tunnel for port {port} not ready within {waited:?}")]
    Timeout { port: u16, waited: Duration },

    /// The provisioning service refused the tunnel (quota, auth, ...)
    #[error("Tunnel service rejected the request: {0}")]
    Rejected(String),
}

/// Remote registration errors
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// The request never got a response (DNS, TLS, timeout, ...)
    #[error("Registration request failed: {0}")]
    Request(String),

    /// The service answered with a non-success status
    #[error("Registration service returned {status}: {body}")]
    Service { status: u16, body: String },

    /// The service answered 200 but the body made no sense
    #[error("Malformed registration response: {0}")]
    MalformedResponse(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required setting has no value
    #[error("Missing required setting: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_classification() {
        let err = SpawnError::from_io("bot", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, SpawnError::NotFound { ref program } if program == "bot"));

        let err = SpawnError::from_io("bot", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, SpawnError::PermissionDenied { .. }));

        let err = SpawnError::from_io("bot", io::Error::from(io::ErrorKind::Interrupted));
        assert!(matches!(err, SpawnError::Io { .. }));
    }

    #[test]
    fn test_fleet_error_wraps_sources() {
        let err: FleetError = ProvisionError::Rejected("quota exceeded".into()).into();
        let display = err.to_string();
        assert!(display.contains("Tunnel error"));
        assert!(display.contains("quota exceeded"));

        let err: FleetError = ConfigError::MissingField("NGROK_AUTHTOKEN".into()).into();
        assert!(err.to_string().contains("NGROK_AUTHTOKEN"));
    }

    #[test]
    fn test_unexpected_exit_display() {
        let err = FleetError::UnexpectedExit {
            process: "worker-2".into(),
            code: Some(137),
        };
        let display = err.to_string();
        assert!(display.contains("worker-2"));
        assert!(display.contains("137"));
    }
}
