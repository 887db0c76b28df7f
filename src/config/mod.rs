//! ORBIT configuration.
//!
//! Provides process-wide configuration loaded once at startup, replacing
//! hardcoded pipeline thresholds with operator-tunable values.
//!
//! ## Loading order
//!
//! 1. `ORBIT_CONFIG` environment variable (path to TOML file)
//! 2. `orbit.toml` in the current working directory
//! 3. Built-in defaults (matching the values in spec §4)
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(OrbitConfig::load());
//! let threshold = config::get().decision.confidence_threshold;
//! ```
//!
//! A handful of keys (`ai_mode`, `ai_model`, `polling_interval`, `watch_path`,
//! `log_level`) are safe to change at runtime and are served from an
//! `ArcSwap` updated by [`watcher::run_config_watcher`]. Decision-gate
//! thresholds and FSM timeouts are fixed for the life of the process so the
//! cooldown/spam ledgers never observe a moving target mid-tick.

pub mod watcher;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// `ai_mode` configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    /// Always call the LLM; never fall back (except on transport failure).
    Ollama,
    /// Never call the LLM; always use the deterministic fallback rule.
    Dummy,
    /// Try the LLM, degrade to fallback on failure, arm a retry (spec §4.2).
    Auto,
}

impl Default for AiMode {
    fn default() -> Self {
        AiMode::Auto
    }
}

/// The hot-reloadable subset of configuration (spec §6 "Orchestrator configuration").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MutableConfig {
    pub ai_mode: AiMode,
    pub ai_model: String,
    pub polling_interval_secs: u64,
    pub watch_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for MutableConfig {
    fn default() -> Self {
        Self {
            ai_mode: AiMode::Auto,
            ai_model: "llama3.1:8b".to_string(),
            polling_interval_secs: 10,
            watch_path: None,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            request_timeout_secs: 5,
        }
    }
}

/// Decision Gate thresholds (spec §4.3). Fixed for the process lifetime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionThresholds {
    pub confidence_threshold: f64,
    pub dismiss_cooldown_secs: u64,
    pub global_cooldown_secs: u64,
    pub per_kind_cooldown_secs: u64,
    pub max_popups_per_hour: u32,
    pub same_kind_window_secs: u64,
}

impl DecisionThresholds {
    /// Production defaults per spec §4.3.
    pub fn production() -> Self {
        Self {
            confidence_threshold: 0.7,
            dismiss_cooldown_secs: 600,
            global_cooldown_secs: 60,
            per_kind_cooldown_secs: 180,
            max_popups_per_hour: 5,
            same_kind_window_secs: 900,
        }
    }

    /// Test-only defaults per spec §4.3, used exclusively in `#[cfg(test)]` fixtures.
    #[cfg(test)]
    pub fn testing() -> Self {
        Self {
            confidence_threshold: 0.7,
            dismiss_cooldown_secs: 600,
            global_cooldown_secs: 5,
            per_kind_cooldown_secs: 10,
            max_popups_per_hour: 100,
            same_kind_window_secs: 15,
        }
    }
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self::production()
    }
}

/// Variety-pool gacha tuning (spec §4.2).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VarietyPoolConfig {
    pub min_interval_secs: u64,
}

impl VarietyPoolConfig {
    pub fn production() -> Self {
        Self {
            min_interval_secs: 900,
        }
    }

    #[cfg(test)]
    pub fn testing() -> Self {
        Self {
            min_interval_secs: 30,
        }
    }
}

impl Default for VarietyPoolConfig {
    fn default() -> Self {
        Self::production()
    }
}

/// UI Broadcast transport settings (spec §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub bind_addr: String,
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub subscriber_channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            bind_addr: "localhost:8012".to_string(),
            ping_interval_secs: 20,
            ping_timeout_secs: 10,
            subscriber_channel_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub retention_days: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/orbit_events.db"),
            retention_days: 7,
        }
    }
}

/// Top-level ORBIT configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrbitConfig {
    pub mutable: MutableConfig,
    pub llm: LlmConfig,
    pub decision: DecisionThresholds,
    pub variety_pool: VarietyPoolConfig,
    pub broadcast: BroadcastConfig,
    pub storage: StorageConfig,
}

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            mutable: MutableConfig::default(),
            llm: LlmConfig::default(),
            decision: DecisionThresholds::default(),
            variety_pool: VarietyPoolConfig::default(),
            broadcast: BroadcastConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl OrbitConfig {
    /// Load configuration following the documented search order. Unknown
    /// keys in the TOML are ignored by serde's default deserialization;
    /// missing keys fall back to the defaults above.
    pub fn load() -> Self {
        let path = Self::resolve_path();
        match path {
            Some(p) => match Self::from_file(&p) {
                Ok(cfg) => {
                    tracing::info!(path = %p.display(), "Loaded ORBIT configuration");
                    cfg
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load config, using defaults");
                    Self::default()
                }
            },
            None => {
                tracing::info!("No config file found, using built-in defaults");
                Self::default()
            }
        }
    }

    fn resolve_path() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("ORBIT_CONFIG") {
            return Some(PathBuf::from(p));
        }
        let default = Path::new("orbit.toml");
        if default.exists() {
            return Some(default.to_path_buf());
        }
        None
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.request_timeout_secs)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.mutable_snapshot().polling_interval_secs)
    }

    fn mutable_snapshot(&self) -> MutableConfig {
        self.mutable.clone()
    }
}

/// Describes a single field change detected on config reload.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub field: &'static str,
    pub old: String,
    pub new: String,
}

/// Global fixed configuration, initialized once at startup.
static ORBIT_CONFIG: OnceLock<OrbitConfig> = OnceLock::new();

/// The hot-reloadable slice, served independently so `watcher` can swap it
/// without touching the fixed thresholds in `ORBIT_CONFIG`.
static MUTABLE: OnceLock<ArcSwap<MutableConfig>> = OnceLock::new();

/// Initialize the global configuration. Must be called exactly once before
/// any call to [`get`]. Calling it twice is logged and ignored.
pub fn init(config: OrbitConfig) {
    let mutable = config.mutable.clone();
    if ORBIT_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
        return;
    }
    let _ = MUTABLE.set(ArcSwap::from_pointee(mutable));
}

/// Get a reference to the global fixed configuration.
///
/// Panics if `init()` has not been called. This is by design — a missing
/// config is a fatal startup error, not a recoverable condition.
pub fn get() -> &'static OrbitConfig {
    ORBIT_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Get the current value of the hot-reloadable configuration slice.
pub fn get_mutable() -> arc_swap::Guard<std::sync::Arc<MutableConfig>> {
    MUTABLE
        .get()
        .expect("config::get_mutable() called before config::init()")
        .load()
}

/// Check whether the config has been initialized. Useful for tests.
pub fn is_initialized() -> bool {
    ORBIT_CONFIG.get().is_some()
}

/// Re-read the config file and atomically swap in the new mutable slice.
/// Fixed thresholds in [`OrbitConfig`] are never altered by a reload.
pub fn reload() -> Result<Vec<ConfigChange>, ConfigError> {
    let path = OrbitConfig::resolve_path().ok_or_else(|| ConfigError::Read {
        path: PathBuf::from("orbit.toml"),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no config path configured"),
    })?;
    let fresh = OrbitConfig::from_file(&path)?;

    let slot = MUTABLE
        .get()
        .expect("config::reload() called before config::init()");
    let previous = slot.load();
    let mut changes = Vec::new();

    macro_rules! diff {
        ($field:ident) => {
            if format!("{:?}", previous.$field) != format!("{:?}", fresh.mutable.$field) {
                changes.push(ConfigChange {
                    field: stringify!($field),
                    old: format!("{:?}", previous.$field),
                    new: format!("{:?}", fresh.mutable.$field),
                });
            }
        };
    }
    diff!(ai_mode);
    diff!(ai_model);
    diff!(polling_interval_secs);
    diff!(watch_path);
    diff!(log_level);

    slot.store(std::sync::Arc::new(fresh.mutable));
    Ok(changes)
}
