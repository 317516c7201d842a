//! `agentgraph init` — write a default configuration file.

use std::path::Path;

use agentgraph_config::AppConfig;
use agentgraph_core::{Error, Result};

pub fn run(force: bool) -> Result<()> {
    let config_path = AppConfig::config_dir().join("config.toml");
    let written = write_default(&config_path, force)
        .map_err(|e| Error::Internal(format!("Failed to write {}: {e}", config_path.display())))?;
    if written {
        println!("Created {}", config_path.display());
        println!("Edit the [agent] section to pick a mode and model.");
    } else {
        println!("Config already exists at: {}", config_path.display());
        println!("Re-run with --force to overwrite it.");
    }
    Ok(())
}

/// Write the default TOML to `path`. Returns `false` when a file exists and
/// `force` is not set.
pub fn write_default(path: &Path, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
