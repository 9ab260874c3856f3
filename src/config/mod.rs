//! Configuration module for PointVis-RS
//!
//! This module handles:
//! - Engine settings (cache budget, undo depth, logging), stored as TOML
//! - Project files describing a filter tree (see [`project`])
//!
//! # Config Location
//!
//! The engine config is read from the platform config directory unless a
//! path is given explicitly:
//! - **Linux**: `~/.config/dev.pointvis.pointvis-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/dev.pointvis.pointvis-rs/config.toml`
//! - **Windows**: `%APPDATA%\dev.pointvis.pointvis-rs\config.toml`
//!
//! # Example
//!
//! ```toml
//! [cache]
//! strategy = "memory_budget"
//! max_percent = 40.0
//!
//! [history]
//! max_undo_depth = 32
//!
//! [logging]
//! filter = "info,pointvis_rs=debug"
//! directory = "/tmp/pointvis-logs"
//! ```

pub mod project;

pub use project::{ProjectFile, ProjectFilter};

use crate::error::{EngineError, Result};
use crate::pipeline::history::{TreeHistory, DEFAULT_UNDO_DEPTH};
use crate::pipeline::memory::{CachePolicy, CacheStrategy, FixedMemory, SystemMemory};
use crate::pipeline::scheduler::RefreshScheduler;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.pointvis.pointvis-rs";

/// Engine config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default share of available memory the caches may use
pub const DEFAULT_CACHE_PERCENT: f32 = 50.0;

/// Default log filter when neither config nor `RUST_LOG` set one
pub const DEFAULT_LOG_FILTER: &str = "info,pointvis_rs=debug";

/// Get the path of the default config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== Cache ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    Never,
    #[default]
    MemoryBudget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub strategy: CacheMode,

    /// Share of available memory the outputs cached in one refresh may use
    pub max_percent: f32,

    /// Use this figure instead of asking the operating system
    pub available_memory_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: CacheMode::MemoryBudget,
            max_percent: DEFAULT_CACHE_PERCENT,
            available_memory_bytes: None,
        }
    }
}

impl CacheConfig {
    pub fn strategy(&self) -> CacheStrategy {
        match self.strategy {
            CacheMode::Never => CacheStrategy::Never,
            CacheMode::MemoryBudget => CacheStrategy::MemoryBudget {
                max_percent: self.max_percent,
            },
        }
    }

    pub fn policy(&self) -> CachePolicy {
        match self.available_memory_bytes {
            Some(bytes) => CachePolicy::new(self.strategy(), Box::new(FixedMemory(bytes))),
            None => CachePolicy::new(self.strategy(), Box::new(SystemMemory)),
        }
    }
}

// ==================== History / Logging ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_undo_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_undo_depth: DEFAULT_UNDO_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    pub filter: String,

    /// Write a daily rolling log file here as well as to stderr
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
        }
    }
}

// ==================== Engine Config ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the default config file, returning defaults if it is missing or
    /// unreadable
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            EngineError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        let pct = self.cache.max_percent;
        if !(0.0..=100.0).contains(&pct) {
            return Err(EngineError::Config(format!(
                "cache.max_percent must be within 0..=100, got {pct}"
            )));
        }
        Ok(())
    }

    /// Scheduler using this config's cache policy
    pub fn scheduler(&self) -> RefreshScheduler {
        RefreshScheduler::new(self.cache.policy())
    }

    pub fn history(&self) -> TreeHistory {
        TreeHistory::new(self.history.max_undo_depth)
    }
}
