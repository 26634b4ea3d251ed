//! Configuration management for baas-fleet

mod fleet;
pub mod serde_utils;

pub use fleet::{
    CommandConfig, FleetConfig, ReadinessMode, RegistrationConfig, TimingConfig, TunnelConfig,
    API_KEY_ENV, AUTHTOKEN_ENV,
};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("baas-fleet")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let result: Result<FleetConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::NotFound(p)) if p == path));
    }

    #[test]
    fn test_load_config_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[worker]
program = "python"
args = ["-m", "bot", "--port", "{port}"]

[timing]
grace_timeout = 2500
readiness = "settle"
"#,
        )
        .unwrap();

        let config: FleetConfig = load_config(&path).unwrap();
        assert_eq!(config.worker.program, "python");
        assert_eq!(config.timing.grace_timeout, Duration::from_millis(2500));
        assert_eq!(config.timing.readiness, ReadinessMode::Settle);
        // Untouched sections keep their defaults
        assert_eq!(config.relay.program, "poetry");
        assert_eq!(config.tunnel.inspect_base_port, 4040);
    }

    #[test]
    fn test_load_config_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[worker\nprogram = ").unwrap();
        let result: Result<FleetConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
