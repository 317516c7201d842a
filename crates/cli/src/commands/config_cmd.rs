//! `agentgraph config` — configuration management commands.

use agentgraph_config::AppConfig;
use agentgraph_core::{Error, Result};

pub fn validate() -> Result<()> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed and validated");
            for w in warnings(&config) {
                println!("   warning: {w}");
            }
            println!();
            println!("   Mode:       {:?}", config.agent.mode);
            println!("   Model:      {}", config.agent.model);
            println!("   Planning:   {}", config.agent.planning);
            println!("   Memory:     {} (enabled: {})", config.memory.backend, config.memory.enabled);
            println!("   Sessions:   {}", config.session.backend);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Settings that are valid but probably not what the user meant.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut out = Vec::new();
    if config.agent.planning && config.agent.mode == agentgraph_core::agent::ExecutionMode::Interactive {
        out.push("planning is enabled but interactive mode never plans".to_string());
    }
    if !config.memory.enabled && config.memory.short_term.enabled {
        out.push("long-term memory is off; only short-term memory will be kept".to_string());
    }
    if config.agent.max_iterations > config.graph.max_graph_steps {
        out.push(format!(
            "max_iterations ({}) exceeds max_graph_steps ({})",
            config.agent.max_iterations, config.graph.max_graph_steps
        ));
    }
    out
}

pub fn show() -> Result<()> {
    let config = AppConfig::load()?;
    let toml_str = toml::to_string_pretty(&config).map_err(|e| Error::Internal(format!("Failed to render config: {e}")))?;
    println!("{toml_str}");
    Ok(())
}

pub fn path() {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
}
