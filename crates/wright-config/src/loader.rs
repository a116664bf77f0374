use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use wright_core::{Result, WrightError};

use crate::schema::WrightConfig;

/// Loads and reloads the Wright configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<WrightConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > WRIGHT_CONFIG env > ~/.wright/wright.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("WRIGHT_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wright")
            .join("wright.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            WrightConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Build a loader around an in-memory config. Used by tests and embedders.
    pub fn from_config(config: WrightConfig) -> Result<Self> {
        Self::check(&config)?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::new(),
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> WrightConfig {
        self.config.read().clone()
    }

    pub fn shared(&self) -> Arc<RwLock<WrightConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Reload the config from disk. The current config is kept when the new
    /// file fails to parse or validate.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(WrightError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read(&self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    fn read(path: &Path) -> Result<WrightConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<WrightConfig>(&raw).map_err(|e| {
            WrightError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Validate: log warnings, fail on errors.
    fn check(config: &WrightConfig) -> Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(WrightError::Config(e)),
        }
    }

    fn apply_env_overrides(config: WrightConfig) -> WrightConfig {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides from an environment-like lookup (WRIGHT_MODEL,
    /// WRIGHT_MAX_ITERATIONS, WRIGHT_LOG_LEVEL, provider API keys).
    pub fn apply_overrides<F>(mut config: WrightConfig, lookup: F) -> WrightConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WRIGHT_MODEL") {
            config.agent.model = v;
        }
        if let Some(v) = lookup("WRIGHT_MAX_ITERATIONS") {
            match v.parse::<u32>() {
                Ok(n) => config.agent.max_iterations = n,
                Err(_) => warn!(value = %v, "ignoring non-numeric WRIGHT_MAX_ITERATIONS"),
            }
        }
        if let Some(v) = lookup("WRIGHT_LOG_LEVEL") {
            config.logging.level = v;
        }
        // API keys: the config file takes priority, env is the fallback.
        if config.services.anthropic_api_key.is_none() {
            config.services.anthropic_api_key = lookup("ANTHROPIC_API_KEY");
        }
        if config.services.openai_api_key.is_none() {
            config.services.openai_api_key = lookup("OPENAI_API_KEY");
        }
        config
    }
}
