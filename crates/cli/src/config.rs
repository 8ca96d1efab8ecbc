use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use strata_core::StrataConfig;
use tracing::debug;

/// Return the default config directory path: ~/.config/strata/
pub fn default_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("could not determine user config directory")?
        .join("strata");
    Ok(config_dir)
}

/// Return the default config file path.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join("strata.toml"))
}

/// Load config from the given path, or the default path if it exists.
/// Environment overrides apply either way; `state_dir` wins over both.
pub fn load(path: Option<&Path>, state_dir: Option<PathBuf>) -> Result<StrataConfig> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_path().ok().filter(|p| p.exists()),
    };
    debug!(?config_path, "Loading config");

    let mut config = StrataConfig::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(p) => format!("failed to load config: {}", p.display()),
        None => "failed to load config from environment".to_string(),
    })?;
    if let Some(dir) = state_dir {
        config.storage.state_dir = dir;
    }
    // The CLI always drains the queue on its own thread.
    config.scheduler.headless = true;
    Ok(config)
}
