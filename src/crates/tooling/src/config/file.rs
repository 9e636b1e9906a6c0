//! Config file loading

use crate::{Result, ToolingError};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a configuration file, picking the format from its extension
///
/// Supports `.yaml`/`.yml`, `.json` and `.toml`. Fields missing from the file
/// fall back to the struct's serde defaults.
pub fn load_config_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| {
            ToolingError::Config(format!(
                "Unable to determine file extension for {:?}",
                path
            ))
        })?;

    let content = std::fs::read_to_string(path)?;

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| {
            ToolingError::Config(format!("Failed to parse YAML {:?}: {}", path, e))
        }),
        "json" => Ok(serde_json::from_str(&content)?),
        "toml" => toml::from_str(&content).map_err(|e| {
            ToolingError::Config(format!("Failed to parse TOML {:?}: {}", path, e))
        }),
        other => Err(ToolingError::Config(format!(
            "Unsupported config file extension: {}",
            other
        ))),
    }
}
