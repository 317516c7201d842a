//! Configuration loading, validation, and management for agentgraph.
//!
//! Loads configuration from `~/.agentgraph/config.toml` with environment
//! variable overrides. Validates all settings before a graph is built, so a
//! bad budget fails at construction time rather than mid-turn.

use agentgraph_core::agent::ExecutionMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.agentgraph/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Agent behaviour (mode, models, markers)
    #[serde(default)]
    pub agent: AgentSection,

    /// Graph-wide budgets
    #[serde(default)]
    pub graph: GraphConfig,

    /// Short- and long-term memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Prompt truncation ladder
    #[serde(default)]
    pub truncation: TruncationConfig,

    /// Tool execution wrapper
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Session metadata store
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Model used by the planner and executor
    #[serde(default = "default_model")]
    pub model: String,

    /// Cheap/fast model used for summarization
    #[serde(default = "default_summarization_model")]
    pub summarization_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Per-invocation cap on top-level node executions
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Run the planner when no task is active (autonomous/hybrid only)
    #[serde(default)]
    pub planning: bool,

    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,

    /// Verifier rejections tolerated before a step fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_final_answer_marker")]
    pub final_answer_marker: String,

    #[serde(default = "default_human_input_marker")]
    pub human_input_marker: String,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_summarization_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_system_prompt() -> String {
    "You are an autonomous agent. Use the available tools to make progress on the current step.".into()
}
fn default_max_iterations() -> u32 {
    15
}
fn default_max_plan_steps() -> usize {
    8
}
fn default_max_retries() -> u32 {
    3
}
fn default_final_answer_marker() -> String {
    "FINAL ANSWER".into()
}
fn default_human_input_marker() -> String {
    "WAITING_FOR_HUMAN_INPUT".into()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            model: default_model(),
            summarization_model: default_summarization_model(),
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: default_system_prompt(),
            max_iterations: default_max_iterations(),
            planning: false,
            max_plan_steps: default_max_plan_steps(),
            max_retries: default_max_retries(),
            final_answer_marker: default_final_answer_marker(),
            human_input_marker: default_human_input_marker(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Hard ceiling on cumulative node executions per thread
    #[serde(default = "default_max_graph_steps")]
    pub max_graph_steps: u32,
}

fn default_max_graph_steps() -> u32 {
    100
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_graph_steps: default_max_graph_steps(),
        }
    }
}

/// Which memory node follows an executor turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryRouting {
    /// Record the turn in STM, then retrieve
    #[default]
    StmThenRetrieve,
    /// Skip STM writes after executor turns
    RetrieveOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Gates the long-term tier (LTM extraction and retrieval)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// "in_memory" or "none"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    #[serde(default)]
    pub routing: MemoryRouting,

    /// Node executions allowed per memory sub-graph run
    #[serde(default = "default_max_subgraph_steps")]
    pub max_subgraph_steps: u32,

    #[serde(default)]
    pub short_term: ShortTermConfig,

    #[serde(default)]
    pub long_term: LongTermConfig,
}

fn default_true() -> bool {
    true
}
fn default_memory_backend() -> String {
    "in_memory".into()
}
fn default_max_subgraph_steps() -> u32 {
    4
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_memory_backend(),
            routing: MemoryRouting::default(),
            max_subgraph_steps: default_max_subgraph_steps(),
            short_term: ShortTermConfig::default(),
            long_term: LongTermConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortTermConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_stm_max_size")]
    pub max_size: usize,

    /// Tool results at or above this estimate are summarized
    #[serde(default = "default_summarization_threshold")]
    pub summarization_threshold: usize,

    /// Plain messages at or above this estimate are summarized
    #[serde(default = "default_max_message_tokens")]
    pub max_message_tokens: usize,
}

fn default_stm_max_size() -> usize {
    15
}
fn default_summarization_threshold() -> usize {
    1_500
}
fn default_max_message_tokens() -> usize {
    2_500
}

impl Default for ShortTermConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_stm_max_size(),
            summarization_threshold: default_summarization_threshold(),
            max_message_tokens: default_max_message_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermConfig {
    #[serde(default = "default_max_extracted")]
    pub max_episodic: usize,

    #[serde(default = "default_max_extracted")]
    pub max_semantic: usize,

    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,

    /// Session-local cache of retrieved hits
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

fn default_max_extracted() -> usize {
    5
}
fn default_retrieval_limit() -> usize {
    5
}
fn default_cache_size() -> usize {
    20
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self {
            max_episodic: default_max_extracted(),
            max_semantic: default_max_extracted(),
            retrieval_limit: default_retrieval_limit(),
            cache_size: default_cache_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    /// Estimated-token ceiling for an outgoing request
    #[serde(default = "default_token_ceiling")]
    pub token_ceiling: usize,

    /// Message windows tried after the full history, largest first
    #[serde(default = "default_recent_windows")]
    pub recent_windows: Vec<usize>,
}

fn default_token_ceiling() -> usize {
    90_000
}
fn default_recent_windows() -> Vec<usize> {
    vec![4, 2]
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            token_ceiling: default_token_ceiling(),
            recent_windows: default_recent_windows(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,

    #[serde(default = "default_max_arg_log_chars")]
    pub max_arg_log_chars: usize,
}

fn default_max_result_chars() -> usize {
    5_000
}
fn default_max_arg_log_chars() -> usize {
    200
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_result_chars: default_max_result_chars(),
            max_arg_log_chars: default_max_arg_log_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// "in_memory" or "sqlite"
    #[serde(default = "default_session_backend")]
    pub backend: String,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

fn default_session_backend() -> String {
    "in_memory".into()
}
fn default_sqlite_path() -> String {
    "sqlite://sessions.db".into()
}
fn default_max_retry_attempts() -> u32 {
    3
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            sqlite_path: default_sqlite_path(),
            max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentgraph/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `AGENTGRAPH_MODEL`
    /// - `AGENTGRAPH_MODE` (`interactive`, `autonomous`, `hybrid`)
    /// - `AGENTGRAPH_MAX_GRAPH_STEPS`
    /// - `AGENTGRAPH_MEMORY_ENABLED` (`true`/`false`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup("AGENTGRAPH_MODEL") {
            self.agent.model = model;
        }
        if let Some(mode) = lookup("AGENTGRAPH_MODE") {
            self.agent.mode = match mode.to_lowercase().as_str() {
                "interactive" => ExecutionMode::Interactive,
                "autonomous" => ExecutionMode::Autonomous,
                "hybrid" => ExecutionMode::Hybrid,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "AGENTGRAPH_MODE must be interactive, autonomous or hybrid (got '{other}')"
                    )));
                }
            };
        }
        if let Some(steps) = lookup("AGENTGRAPH_MAX_GRAPH_STEPS") {
            self.graph.max_graph_steps = steps.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "AGENTGRAPH_MAX_GRAPH_STEPS is not a number: '{steps}'"
                ))
            })?;
        }
        if let Some(enabled) = lookup("AGENTGRAPH_MEMORY_ENABLED") {
            self.memory.enabled = matches!(enabled.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentgraph")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.temperature < 0.0 || self.agent.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("agent.model must not be empty".into()));
        }
        if self.agent.final_answer_marker.is_empty() || self.agent.human_input_marker.is_empty() {
            return Err(ConfigError::ValidationError(
                "agent markers must not be empty".into(),
            ));
        }
        if self.graph.max_graph_steps == 0 {
            return Err(ConfigError::ValidationError(
                "graph.max_graph_steps must be > 0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }
        if self.memory.short_term.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "memory.short_term.max_size must be > 0".into(),
            ));
        }
        if self.memory.short_term.summarization_threshold == 0
            || self.memory.short_term.max_message_tokens == 0
        {
            return Err(ConfigError::ValidationError(
                "memory.short_term token thresholds must be > 0".into(),
            ));
        }
        if self.memory.long_term.cache_size == 0 {
            return Err(ConfigError::ValidationError(
                "memory.long_term.cache_size must be > 0".into(),
            ));
        }
        let windows = &self.truncation.recent_windows;
        if windows.iter().any(|w| *w == 0) || windows.windows(2).any(|p| p[0] <= p[1]) {
            return Err(ConfigError::ValidationError(
                "truncation.recent_windows must be non-zero and strictly decreasing".into(),
            ));
        }
        if self.tools.max_result_chars == 0 {
            return Err(ConfigError::ValidationError(
                "tools.max_result_chars must be > 0".into(),
            ));
        }
        if self.session.max_retry_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_retry_attempts must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentSection::default(),
            graph: GraphConfig::default(),
            memory: MemoryConfig::default(),
            truncation: TruncationConfig::default(),
            tools: ToolsConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for agentgraph_core::Error {
    fn from(e: ConfigError) -> Self {
        agentgraph_core::Error::Config { message: e.to_string() }
    }
}
