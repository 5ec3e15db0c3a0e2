// ⚙️ Configuration - TOML file with serde defaults
//
// Every section and field is optional; a missing file means defaults.
//
//   [general]         log level, database path
//   [classification]  heuristic rules file, built-in heuristics on/off
//   [budget]          warning ratio, category cache TTL and capacity
//   [reconciliation]  weights, tolerances, acceptance threshold
//   [sync]            chunk size, concurrency, time ceiling, window
//   [sources]         statement CSV / documents JSON paths
//   [[categories]]    category registry seed

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entities::CategorySeed;
use crate::error::EngineResult;
use crate::reconciliation::MatchSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub classification: ClassificationConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub reconciliation: MatchSettings,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub categories: Vec<CategorySeed>,
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database_path: default_database_path(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("decision-engine.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// JSON file with extra heuristic rules
    #[serde(default)]
    pub heuristic_rules_path: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub use_default_heuristics: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            heuristic_rules_path: None,
            use_default_heuristics: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: f64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Category policies kept in the LRU cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl BudgetConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            warning_ratio: default_warning_ratio(),
            cache_ttl_secs: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_warning_ratio() -> f64 {
    0.9
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_cache_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Records per classification / persistence chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Classification chunks running at the same time
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Time ceiling for one cycle; checked between persistence chunks
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,

    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

impl SyncConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_in_flight: default_max_in_flight(),
            max_duration_secs: default_max_duration(),
            window_days: default_window_days(),
        }
    }
}

fn default_chunk_size() -> usize {
    50
}

fn default_max_in_flight() -> usize {
    4
}

fn default_max_duration() -> u64 {
    300
}

fn default_window_days() -> u32 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub statements_csv: Option<PathBuf>,

    #[serde(default)]
    pub documents_json: Option<PathBuf>,
}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
    pub fn from_toml(content: &str) -> EngineResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Missing file → defaults; unreadable or malformed file → error
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
