//! Batch files: per-pipeline overrides

use std::path::Path;

use bf_core::error::ConfigError;
use bf_orchestrator::InstanceOverrides;

/// Read a JSON array of overrides
pub fn load_batch(path: &Path) -> Result<Vec<InstanceOverrides>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read batch file: {}", e)))?;
    parse_batch(&content)
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))
}

fn parse_batch(content: &str) -> Result<Vec<InstanceOverrides>, String> {
    let entries: Vec<InstanceOverrides> =
        serde_json::from_str(content).map_err(|e| format!("invalid batch file: {}", e))?;
    if entries.is_empty() {
        return Err("batch file has no entries".into());
    }
    Ok(entries)
}

/// One override per pipeline, from `--count` and/or a batch file
pub fn instance_overrides(
    count: Option<usize>,
    batch: Option<Vec<InstanceOverrides>>,
) -> Result<Vec<InstanceOverrides>, ConfigError> {
    match (count, batch) {
        (Some(count), Some(batch)) if count != batch.len() => Err(ConfigError::Invalid(format!(
            "--count {} conflicts with {} batch entries",
            count,
            batch.len()
        ))),
        (_, Some(batch)) => Ok(batch),
        (Some(count), None) => Ok(vec![InstanceOverrides::default(); count]),
        (None, None) => Err(ConfigError::MissingField("--count or --batch".into())),
    }
}
