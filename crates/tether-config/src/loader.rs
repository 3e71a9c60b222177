use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::TetherConfig;

/// Loads the Tether configuration from disk with env overrides.
pub struct ConfigLoader {
    config: TetherConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > TETHER_CONFIG env > ~/.tether/tether.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("TETHER_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tether")
            .join("tether.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> tether_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<TetherConfig>(&raw).map_err(|e| {
                tether_core::TetherError::Config(format!(
                    "failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            TetherConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Validate config — log warnings, fail on errors
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(tether_core::TetherError::Config(e));
            }
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Get a snapshot of the loaded config.
    pub fn get(&self) -> TetherConfig {
        self.config.clone()
    }

    /// Path the config was loaded from (or would be written to).
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (TETHER_MODEL, TETHER_LOG_LEVEL, daily limits).
    fn apply_env_overrides(mut config: TetherConfig) -> TetherConfig {
        if let Ok(v) = std::env::var("TETHER_MODEL") {
            config.engine.model = v;
        }
        if let Ok(v) = std::env::var("TETHER_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("TETHER_DAILY_INPUT_TOKEN_LIMIT") {
            if let Ok(limit) = v.parse::<u64>() {
                config.scheduler.daily_input_token_limit = limit;
            }
        }
        if let Ok(v) = std::env::var("TETHER_DAILY_OUTPUT_TOKEN_LIMIT") {
            if let Ok(limit) = v.parse::<u64>() {
                config.scheduler.daily_output_token_limit = limit;
            }
        }
        // API key: env var fills in when the config file doesn't set it.
        if config.services.anthropic_api_key.is_none() {
            if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
                config.services.anthropic_api_key = Some(v);
            }
        }
        config
    }
}
