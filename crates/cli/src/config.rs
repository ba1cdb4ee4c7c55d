//! Client configuration loading.

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use larder_core::ClientConfig;
use std::path::{Path, PathBuf};

/// Config file used when neither `--config` nor `LARDER_CONFIG` is given.
pub fn default_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(std::env::var_os("HOME")?).join(".config"),
    };
    Some(base.join("larder").join("config.toml"))
}

/// Merge defaults, an optional TOML file and `LARDER_*` environment variables.
///
/// Nested keys use a double underscore, e.g. `LARDER_TRANSFER__CONCURRENCY`.
/// An explicitly named file must exist; the default location is optional.
pub fn load(explicit: Option<&Path>) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    match explicit {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            tracing::debug!(path = %path.display(), "loading configuration file");
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(path) = default_config_path().filter(|p| p.exists()) {
                tracing::debug!(path = %path.display(), "loading configuration file");
                figment = figment.merge(Toml::file(path));
            }
        }
    }

    figment = figment.merge(Env::prefixed("LARDER_").ignore(&["config"]).split("__"));

    let config: ClientConfig = figment
        .extract()
        .context("failed to load client configuration")?;
    config.validate().context("invalid client configuration")?;
    Ok(config)
}
