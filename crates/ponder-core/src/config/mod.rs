//! Configuration system for ponder.
//!
//! Every component receives its config at construction. Durations are stored
//! as plain integers so config files stay readable, with `Duration` accessors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PonderError, PonderResult};
use crate::runtime::RuntimeConfig;

/// Thought buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Thoughts shown to the interpreter and generator as context.
    pub context_thoughts: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            context_thoughts: 10,
        }
    }
}

/// Cognitive loop pacing and proactive behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sleep after a cycle that did work, or while urgent thoughts are pending.
    pub min_interval_ms: u64,
    /// First sleep once the loop goes quiet; doubles up to `max_idle_interval_ms`.
    pub idle_interval_ms: u64,
    pub max_idle_interval_ms: u64,
    /// Quiet time after which idle thinking switches to memory reflection.
    pub idle_threshold_secs: u64,
    /// Minimum gap between the last thought and a proactive one.
    pub proactive_interval_secs: u64,
    pub interpret_timeout_secs: u64,
    pub generate_timeout_secs: u64,
    /// Interpretation attempts per drained batch before literal fallback.
    pub max_interpret_attempts: u32,
    /// Memories fetched as generation/reflection context.
    pub memory_context_k: usize,
    pub stats_log_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 50,
            idle_interval_ms: 200,
            max_idle_interval_ms: 2000,
            idle_threshold_secs: 360,
            proactive_interval_secs: 5,
            interpret_timeout_secs: 30,
            generate_timeout_secs: 60,
            max_interpret_attempts: 2,
            memory_context_k: 5,
            stats_log_interval_secs: 120,
        }
    }
}

impl SchedulerConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn max_idle_interval(&self) -> Duration {
        Duration::from_millis(self.max_idle_interval_ms.max(self.idle_interval_ms))
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn proactive_interval(&self) -> Duration {
        Duration::from_secs(self.proactive_interval_secs)
    }

    pub fn interpret_timeout(&self) -> Duration {
        Duration::from_secs(self.interpret_timeout_secs)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }

    pub fn stats_log_interval(&self) -> Duration {
        Duration::from_secs(self.stats_log_interval_secs)
    }
}

/// Thresholds of the speak/no-speak rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Quiet time after the last user input before a HIGH thought is voiced.
    pub high_priority_wait_secs: u64,
    pub accumulated_count: usize,
    pub accumulated_wait_secs: u64,
    pub high_volume_count: usize,
    pub high_volume_wait_secs: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            high_priority_wait_secs: 8,
            accumulated_count: 5,
            accumulated_wait_secs: 30,
            high_volume_count: 8,
            high_volume_wait_secs: 15,
        }
    }
}

/// Tiered memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Bound of the Recent tier.
    pub recent_capacity: usize,
    pub min_similarity: f32,
    pub default_k: usize,
    /// Weight of the query embedding when a context is supplied.
    pub query_weight: f32,
    /// Weight of the context embedding when a context is supplied.
    pub context_weight: f32,
    /// Recent thoughts folded into the search context.
    pub context_thoughts: usize,
    /// Deadline for every embedder and summarizer call.
    pub call_timeout_secs: u64,
    /// JSON files loaded into the Static tier at startup.
    pub static_paths: Vec<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent_capacity: 25,
            min_similarity: 0.3,
            default_k: 5,
            query_weight: 0.6,
            context_weight: 0.4,
            context_thoughts: 5,
            call_timeout_secs: 30,
            static_paths: Vec::new(),
        }
    }
}

impl MemoryConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Tool execution and tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub default_timeout_secs: u64,
    /// Per-tool timeout overrides.
    pub timeouts: HashMap<String, u64>,
    /// Terminal actions kept per tool for failure summaries.
    pub history_per_tool: usize,
    /// A tool used more recently than this is throttled.
    pub min_dispatch_interval_secs: u64,
    /// Window in which repeated failures throttle a tool.
    pub failure_window_secs: u64,
    /// Window shown in failure summaries given to the interpreter.
    pub failure_summary_window_secs: u64,
    /// Terminal actions older than this are pruned.
    pub history_window_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            timeouts: HashMap::new(),
            history_per_tool: 50,
            min_dispatch_interval_secs: 5,
            failure_window_secs: 30,
            failure_summary_window_secs: 120,
            history_window_secs: 3600,
        }
    }
}

impl ToolsConfig {
    /// Timeout for a given tool.
    pub fn timeout_for(&self, tool_name: &str) -> Duration {
        let secs = self
            .timeouts
            .get(tool_name)
            .copied()
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn min_dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.min_dispatch_interval_secs)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    pub fn failure_summary_window(&self) -> Duration {
        Duration::from_secs(self.failure_summary_window_secs)
    }

    pub fn history_window(&self) -> Duration {
        Duration::from_secs(self.history_window_secs)
    }
}

/// Instruction gating settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstructionsConfig {
    pub ttl_secs: u64,
}

impl Default for InstructionsConfig {
    fn default() -> Self {
        Self { ttl_secs: 360 }
    }
}

impl InstructionsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub buffer: BufferConfig,
    pub scheduler: SchedulerConfig,
    pub decision: DecisionConfig,
    pub memory: MemoryConfig,
    pub tools: ToolsConfig,
    pub instructions: InstructionsConfig,
    pub runtime: RuntimeConfig,
}

/// Default data directory (`~/.ponder`).
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ponder"))
        .unwrap_or_else(|| PathBuf::from(".ponder"))
}

impl AgentConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> PonderResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| PonderError::Configuration(e.to_string()))
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| PonderError::Configuration(e.to_string())),
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| PonderError::Configuration(e.to_string())),
            _ => Err(PonderError::Configuration(
                "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
            )),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads:
    /// - `PONDER_RECENT_CAPACITY`
    /// - `PONDER_MIN_SIMILARITY`
    /// - `PONDER_STATIC_PATHS` (platform path-list separator)
    /// - `PONDER_IDLE_THRESHOLD_SECS`
    /// - `PONDER_TOOL_TIMEOUT_SECS`
    /// - `PONDER_INSTRUCTION_TTL_SECS`
    /// - everything [`RuntimeConfig::from_env`] reads
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay environment variables onto an existing config.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("PONDER_RECENT_CAPACITY") {
            self.memory.recent_capacity = v;
        }
        if let Some(v) = env_parse("PONDER_MIN_SIMILARITY") {
            self.memory.min_similarity = v;
        }
        if let Some(paths) = std::env::var_os("PONDER_STATIC_PATHS") {
            self.memory.static_paths = std::env::split_paths(&paths).collect();
        }
        if let Some(v) = env_parse("PONDER_IDLE_THRESHOLD_SECS") {
            self.scheduler.idle_threshold_secs = v;
        }
        if let Some(v) = env_parse("PONDER_TOOL_TIMEOUT_SECS") {
            self.tools.default_timeout_secs = v;
        }
        if let Some(v) = env_parse("PONDER_INSTRUCTION_TTL_SECS") {
            self.instructions.ttl_secs = v;
        }
        self.runtime.apply_env();
    }

    /// Reject values that would break component invariants.
    pub fn validate(&self) -> PonderResult<()> {
        if self.memory.recent_capacity == 0 {
            return Err(PonderError::Configuration(
                "memory.recent_capacity must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.memory.min_similarity) {
            return Err(PonderError::Configuration(
                "memory.min_similarity must be within [0, 1]".to_string(),
            ));
        }
        if self.memory.query_weight < 0.0
            || self.memory.context_weight < 0.0
            || self.memory.query_weight + self.memory.context_weight <= 0.0
        {
            return Err(PonderError::Configuration(
                "memory weights must be non-negative with a positive sum".to_string(),
            ));
        }
        if self.scheduler.max_interpret_attempts == 0 {
            return Err(PonderError::Configuration(
                "scheduler.max_interpret_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Builder for AgentConfig.
#[derive(Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn buffer(mut self, config: BufferConfig) -> Self {
        self.config.buffer = config;
        self
    }

    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.config.scheduler = config;
        self
    }

    pub fn decision(mut self, config: DecisionConfig) -> Self {
        self.config.decision = config;
        self
    }

    pub fn memory(mut self, config: MemoryConfig) -> Self {
        self.config.memory = config;
        self
    }

    pub fn tools(mut self, config: ToolsConfig) -> Self {
        self.config.tools = config;
        self
    }

    pub fn instructions(mut self, config: InstructionsConfig) -> Self {
        self.config.instructions = config;
        self
    }

    pub fn runtime(mut self, config: RuntimeConfig) -> Self {
        self.config.runtime = config;
        self
    }

    /// Set the Recent tier bound.
    pub fn recent_capacity(mut self, capacity: usize) -> Self {
        self.config.memory.recent_capacity = capacity;
        self
    }

    /// Add a Static tier source file.
    pub fn static_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.memory.static_paths.push(path.into());
        self
    }

    pub fn build(self) -> AgentConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.memory.recent_capacity, 25);
        assert_eq!(config.instructions.ttl(), Duration::from_secs(360));
        assert_eq!(config.tools.timeout_for("anything"), Duration::from_secs(30));
        assert_eq!(config.decision.high_priority_wait_secs, 8);
        assert_eq!(config.scheduler.idle_threshold(), Duration::from_secs(360));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tool_timeout_override() {
        let mut tools = ToolsConfig::default();
        tools.timeouts.insert("web_search".to_string(), 2);
        assert_eq!(tools.timeout_for("web_search"), Duration::from_secs(2));
        assert_eq!(tools.timeout_for("clock"), Duration::from_secs(30));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[memory]\nrecent_capacity = 10\n\n[decision]\nhigh_volume_count = 12\n"
        )
        .unwrap();

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.memory.recent_capacity, 10);
        assert_eq!(config.memory.min_similarity, 0.3);
        assert_eq!(config.decision.high_volume_count, 12);
        assert_eq!(config.decision.accumulated_count, 5);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "instructions:\n  ttl_secs: 60\n").unwrap();

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.instructions.ttl_secs, 60);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            AgentConfig::from_file(file.path()),
            Err(PonderError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = AgentConfig::builder().recent_capacity(0).build();
        assert!(config.validate().is_err());
    }
}
