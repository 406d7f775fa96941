// Configuration loader
// Loads settings from ~/.beacon/config.toml, then applies BEACON_* overrides

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::Config;

/// Default location of the config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".beacon").join("config.toml"))
}

/// Load configuration from `path` (or the default location).
///
/// A missing file is not an error: defaults are used. Environment
/// overrides are applied last and the result is validated.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map(Path::to_path_buf).or_else(default_config_path);

    let mut config = match path {
        Some(ref p) if p.exists() => {
            let contents = fs::read_to_string(p)
                .with_context(|| format!("Failed to read config from {}", p.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config {}", p.display()))?
        }
        _ => {
            tracing::debug!("No config file found, using defaults");
            Config::default()
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    config
        .validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

/// Apply `BEACON_*` overrides using `lookup` as the variable source.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("BEACON_DISCOVERY_PORT") {
        config.discovery.discovery_port = v
            .trim()
            .parse()
            .with_context(|| format!("BEACON_DISCOVERY_PORT is not a port: {}", v))?;
    }
    if let Some(v) = non_empty("BEACON_CLIENT_PORT") {
        config.discovery.client_port = v
            .trim()
            .parse()
            .with_context(|| format!("BEACON_CLIENT_PORT is not a port: {}", v))?;
    }
    if let Some(v) = non_empty("BEACON_HEARTBEAT_SECS") {
        config.discovery.heartbeat_interval_secs = v
            .trim()
            .parse()
            .with_context(|| format!("BEACON_HEARTBEAT_SECS is not a number: {}", v))?;
    }
    if let Some(v) = non_empty("BEACON_EXPIRY_MULTIPLIER") {
        config.discovery.expiry_multiplier = v
            .trim()
            .parse()
            .with_context(|| format!("BEACON_EXPIRY_MULTIPLIER is not a number: {}", v))?;
    }
    if let Some(v) = non_empty("BEACON_BROADCAST_NETWORKS") {
        config.discovery.broadcast_networks = v
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
    }
    if let Some(v) = non_empty("BEACON_BIND_ADDRESS") {
        config.provider.bind_address = v.trim().to_string();
    }

    Ok(())
}
