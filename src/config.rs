use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use std::fs;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::{Action, ButtonLayout};
use crate::error::EngineError;

pub use crate::binding::display_hotkey;

/// Upper bound applied to every timing value.
pub const MAX_TIMING_MS: u64 = 5000;

/// Built-in timing parameters in milliseconds.
pub const DEFAULT_TIMINGS: [(&str, u64); 17] = [
    ("stall_click_ms", 3),
    ("sf_a_hold_ms", 80),
    ("sf_wait_before_jump_ms", 20),
    ("sf_s_hold_ms", 690),
    ("sf_d_hold_ms", 720),
    ("sf_airroll_time_ms", 799),
    ("sf_shift_start_ms", 840),
    ("sf_shift_duration_ms", 130),
    ("sf_prejump_ms", 20),
    ("sf_click_down_ms", 20),
    ("sf_between_jumps_ms", 40),
    ("sf_post_shift_ms", 50),
    ("sd_click_down_ms", 15),
    ("sd_between_clicks_ms", 25),
    ("td_pre_ms", 10),
    ("td_click_down_ms", 15),
    ("td_between_clicks_ms", 25),
];

pub fn default_timing_ms(name: &str) -> Option<u64> {
    DEFAULT_TIMINGS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, ms)| *ms)
}

pub const fn default_hotkey(action: Action) -> &'static str {
    match action {
        Action::ToggleAll => "F6",
        Action::Stall => "F",
        Action::SpeedFlip => "H",
        Action::StraightDashHold => "V",
        Action::TurningDashHold => "N",
        Action::Emergency => "L",
        Action::Exit => "F10",
    }
}

/// Persisted settings. Also serves as the engine's configuration snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_true")]
    pub global_enabled: bool,
    #[serde(default = "default_features")]
    pub features: BTreeMap<String, bool>,
    #[serde(default = "default_hotkeys")]
    pub hotkeys: BTreeMap<String, String>,
    #[serde(default = "default_timings")]
    pub timings: BTreeMap<String, u64>,
    #[serde(default)]
    pub backends: BackendConfig,
    /// Extra device-family layouts, consulted before the built-in ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layouts: Vec<ButtonLayout>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_true")]
    pub keyboard: bool,
    #[serde(default = "default_true")]
    pub joystick: bool,
    #[serde(default = "default_true")]
    pub xinput: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            keyboard: true,
            joystick: true,
            xinput: true,
            poll_interval_ms: default_poll_interval(),
            rescan_interval_ms: default_rescan_interval(),
        }
    }
}

impl BackendConfig {
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    10
}
fn default_rescan_interval() -> u64 {
    1000
}
fn default_features() -> BTreeMap<String, bool> {
    Action::ALL
        .iter()
        .filter_map(|a| a.feature_key())
        .map(|key| (key.to_string(), true))
        .collect()
}
fn default_hotkeys() -> BTreeMap<String, String> {
    Action::ALL
        .iter()
        .map(|a| (a.config_key().to_string(), default_hotkey(*a).to_string()))
        .collect()
}
fn default_timings() -> BTreeMap<String, u64> {
    DEFAULT_TIMINGS
        .iter()
        .map(|(key, ms)| (key.to_string(), *ms))
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            global_enabled: true,
            features: default_features(),
            hotkeys: default_hotkeys(),
            timings: default_timings(),
            backends: BackendConfig::default(),
            layouts: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Platform config location, or `Config.toml` in the working directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("prosuite").join("Config.toml"))
            .unwrap_or_else(|| PathBuf::from("Config.toml"))
    }

    /// Load config from file, or create default if not exists
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if !path.as_ref().exists() {
            let default_config = Self::default();
            default_config.save_to_file(&path)?;
            info!(path = %path.as_ref().display(), "Created default configuration");
            return Ok(default_config);
        }
        Self::load_from_file(path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.validate();
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let body = toml::to_string_pretty(self)?;
        let mut result = String::with_capacity(body.len() + 256);
        result.push_str("# prosuite configuration\n");
        result.push_str("# Hotkeys: \"Ctrl+H\" style for keyboard, \"GP:A\" style for controller buttons.\n");
        result.push_str("# An empty hotkey disables the binding. Timings are in milliseconds.\n\n");
        result.push_str(&body);

        fs::write(path, result)?;
        Ok(())
    }

    /// Clamps values into their accepted ranges.
    pub fn validate(&mut self) {
        for (name, ms) in self.timings.iter_mut() {
            if *ms > MAX_TIMING_MS {
                warn!(timing = %name, value = *ms, "Timing clamped to {} ms", MAX_TIMING_MS);
                *ms = MAX_TIMING_MS;
            }
        }
        if self.backends.poll_interval_ms < 1 {
            self.backends.poll_interval_ms = 1;
        }
        if self.backends.rescan_interval_ms < 100 {
            self.backends.rescan_interval_ms = 100;
        }
    }

    pub fn reset_to_defaults(&mut self) {
        *self = Self::default();
    }

    /// Restores built-in timings, leaving hotkeys and feature flags alone.
    pub fn reset_timings(&mut self) {
        self.timings = default_timings();
    }

    /// Stored binding text for an action. A missing entry falls back to the
    /// default hotkey; an empty entry means unbound.
    pub fn hotkey(&self, action: Action) -> &str {
        self.hotkeys
            .get(action.config_key())
            .map(String::as_str)
            .unwrap_or_else(|| default_hotkey(action))
    }

    pub fn set_hotkey(&mut self, action: Action, text: &str) {
        self.hotkeys
            .insert(action.config_key().to_string(), text.trim().to_string());
    }

    /// Actions without a feature flag are always enabled.
    pub fn feature_enabled(&self, action: Action) -> bool {
        match action.feature_key() {
            Some(key) => self.features.get(key).copied().unwrap_or(true),
            None => true,
        }
    }

    pub fn set_feature(&mut self, action: Action, enabled: bool) {
        if let Some(key) = action.feature_key() {
            self.features.insert(key.to_string(), enabled);
        }
    }

    pub fn timing_ms(&self, name: &str) -> u64 {
        self.timings
            .get(name)
            .copied()
            .or_else(|| default_timing_ms(name))
            .unwrap_or(0)
            .min(MAX_TIMING_MS)
    }

    #[inline]
    pub fn timing(&self, name: &str) -> Duration {
        Duration::from_millis(self.timing_ms(name))
    }

    pub fn set_timing(&mut self, name: &str, ms: u64) {
        self.timings.insert(name.to_string(), ms.min(MAX_TIMING_MS));
    }
}

/// Where configuration snapshots are loaded from and saved to.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<AppConfig, EngineError>;

    fn save(&self, config: &AppConfig) -> Result<(), EngineError>;
}

/// TOML file on disk.
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<AppConfig, EngineError> {
        AppConfig::load_or_create(&self.path).map_err(|e| EngineError::Config(format!("{e:#}")))
    }

    fn save(&self, config: &AppConfig) -> Result<(), EngineError> {
        config
            .save_to_file(&self.path)
            .map_err(|e| EngineError::Config(format!("{e:#}")))
    }
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: Mutex<AppConfig>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Mutex::new(config),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> AppConfig {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<AppConfig, EngineError> {
        Ok(self.snapshot())
    }

    fn save(&self, config: &AppConfig) -> Result<(), EngineError> {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
