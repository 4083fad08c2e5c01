//! Configuration file discovery

use std::path::{Path, PathBuf};

use crate::controller::Courier;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

pub const DEFAULT_PATHS: [&str; 2] = ["./courier.config.ron", "/etc/courier/courier.config.ron"];

/// Look for the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// Returns `None` if there is no configuration file at all.
///
/// # Errors
/// If `COURIER_CONFIG` names a missing file
pub fn locate_config_file() -> anyhow::Result<Option<PathBuf>> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    Ok(DEFAULT_PATHS.iter().map(PathBuf::from).find(|p| p.exists()))
}

/// As [`locate_config_file`], but a missing file is an error
///
/// # Errors
/// If `COURIER_CONFIG` names a missing file, or none of the defaults exist
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Some(path) = locate_config_file()? {
        return Ok(path);
    }

    let paths_tried = DEFAULT_PATHS
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read, parse and validate a configuration file
///
/// # Errors
/// If the file cannot be read or is not a valid `Courier` configuration
pub fn load(path: &Path) -> anyhow::Result<Courier> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
    })?;

    let courier: Courier = ron::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))?;

    courier
        .delivery
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))?;

    Ok(courier)
}

/// Load `path` if there is one, otherwise use the defaults
///
/// A file that exists but does not load is an error, never a silent
/// fallback to the defaults.
///
/// # Errors
/// As for [`load`]
pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Courier> {
    path.map_or_else(|| Ok(Courier::default()), load)
}
