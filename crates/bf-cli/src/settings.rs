//! Configuration layering: defaults, then file, then environment

use std::path::Path;

use bf_core::config::{default_config_path, load_config, FleetConfig};
use bf_core::error::ConfigError;

/// Build the effective configuration
///
/// An explicit `path` must exist. Without one, the default config file is
/// used if present. Secrets set in `env` override the file.
pub fn resolve_config<F>(path: Option<&Path>, env: F) -> Result<FleetConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: FleetConfig = match path {
        Some(path) => load_config(path)?,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                tracing::debug!("Using config file {}", default_path.display());
                load_config(&default_path)?
            } else {
                FleetConfig::default()
            }
        }
    };

    config.apply_env(env);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bf_core::config::{API_KEY_ENV, AUTHTOKEN_ENV};

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_config(Some(&dir.path().join("nope.toml")), env(&[]));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(
            &path,
            "[registration]\nbot_name = \"Night Shift\"\napi_key = \"from-file\"\n",
        )
        .unwrap();

        let config = resolve_config(
            Some(&path),
            env(&[(AUTHTOKEN_ENV, "tok"), (API_KEY_ENV, "from-env")]),
        )
        .unwrap();

        assert_eq!(config.registration.bot_name, "Night Shift");
        assert_eq!(config.registration.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.tunnel.authtoken.as_deref(), Some("tok"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_kept_without_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(
            &path,
            "[tunnel]\nauthtoken = \"file-token\"\n[registration]\napi_key = \"file-key\"\n",
        )
        .unwrap();

        let config = resolve_config(Some(&path), env(&[])).unwrap();
        assert_eq!(config.tunnel.authtoken.as_deref(), Some("file-token"));
        assert_eq!(config.registration.api_key.as_deref(), Some("file-key"));
    }
}
