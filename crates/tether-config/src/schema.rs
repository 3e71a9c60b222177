use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use tether_core::BudgetLimits;

/// Root configuration — maps to `tether.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TetherConfig {
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub budget: BudgetConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
}

// ── Engine ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model identifier passed to the reasoning engine.
    pub model: String,
    /// System prompt injected into every run.
    pub system_prompt: Option<String>,
    /// Path to a file containing the system prompt (overrides `system_prompt`).
    pub system_prompt_file: Option<PathBuf>,
    /// Maximum tokens the engine may generate per turn.
    pub max_tokens_per_turn: u32,
    /// Temperature (0.0 - 2.0).
    pub temperature: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".into(),
            system_prompt: None,
            system_prompt_file: None,
            max_tokens_per_turn: 4096,
            temperature: 0.7,
        }
    }
}

// ── Scheduler ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between dispatcher ticks. Wall-clock precision of the
    /// whole scheduler is bounded by this interval.
    pub tick_seconds: u64,
    /// Daily input-token ceiling shared by all scheduled work.
    pub daily_input_token_limit: u64,
    /// Daily output-token ceiling shared by all scheduled work.
    pub daily_output_token_limit: u64,
    /// File whose content overrides the heartbeat task's prompt per run.
    pub heartbeat_file: Option<PathBuf>,
    /// Interval expression for the auto-created heartbeat task.
    pub heartbeat_interval: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 60,
            daily_input_token_limit: 2_000_000,
            daily_output_token_limit: 200_000,
            heartbeat_file: None,
            heartbeat_interval: "4h".into(),
        }
    }
}

// ── Per-task budget template ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_turns: u32,
    pub max_actions: u32,
    pub max_input_tokens: u64,
    pub max_output_tokens: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let limits = BudgetLimits::default();
        Self {
            max_turns: limits.max_turns,
            max_actions: limits.max_actions,
            max_input_tokens: limits.max_input_tokens,
            max_output_tokens: limits.max_output_tokens,
        }
    }
}

impl BudgetConfig {
    pub fn limits(&self) -> BudgetLimits {
        BudgetLimits {
            max_turns: self.max_turns,
            max_actions: self.max_actions,
            max_input_tokens: self.max_input_tokens,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".tether")
                .join("tether.db"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter: trace, debug, info, warn, error.
    pub level: String,
    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Services / credentials ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServicesConfig {
    pub anthropic_api_key: Option<String>,
}

impl TetherConfig {
    /// Validate the config. Returns warnings for suspicious-but-legal
    /// values; errors abort startup.
    pub fn validate(&self) -> std::result::Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.scheduler.tick_seconds == 0 {
            return Err("scheduler.tick_seconds must be at least 1".into());
        }
        if self.budget.max_turns == 0 {
            return Err("budget.max_turns must be at least 1".into());
        }
        if self.scheduler.daily_input_token_limit == 0
            || self.scheduler.daily_output_token_limit == 0
        {
            return Err("scheduler daily token limits must be non-zero".into());
        }
        if !(0.0..=2.0).contains(&self.engine.temperature) {
            return Err(format!(
                "engine.temperature {} out of range 0.0-2.0",
                self.engine.temperature
            ));
        }

        if self.scheduler.tick_seconds < 10 {
            warnings.push(format!(
                "scheduler.tick_seconds = {} is very aggressive; 60 is typical",
                self.scheduler.tick_seconds
            ));
        }
        if self.services.anthropic_api_key.is_none() {
            warnings.push("services.anthropic_api_key not set — set ANTHROPIC_API_KEY".into());
        }

        Ok(warnings)
    }
}
