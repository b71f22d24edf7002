//! Configuration management
//!
//! Load and save tuning knobs to a TOML settings file. Every section has
//! defaults, so a partial file (or no file at all) is valid.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::{ConnectionType, DeviceClassification, DeviceSignals};

/// Main settings structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub collector: CollectorSettings,
    pub analyzer: AnalyzerSettings,
    pub scheduler: SchedulerSettings,
    pub device: DeviceSettings,
    pub adaptation: AdaptationSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load settings from an explicit path, falling back to defaults when
    /// the file does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {:?}", path))?;
        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings: {:?}", path))?;
        Ok(settings)
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save settings to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the settings file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("dev", "framepace", "framepace") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            // Fallback to current directory
            Ok(PathBuf::from("framepace.toml"))
        }
    }
}

/// Per-classification slow-render thresholds in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowThresholds {
    pub low_ms: f64,
    pub medium_ms: f64,
    pub high_ms: f64,
}

impl Default for SlowThresholds {
    fn default() -> Self {
        Self {
            low_ms: 33.0,
            medium_ms: 24.0,
            high_ms: 16.0,
        }
    }
}

impl SlowThresholds {
    pub fn for_class(&self, class: DeviceClassification) -> f64 {
        match class {
            DeviceClassification::Low => self.low_ms,
            DeviceClassification::Medium => self.medium_ms,
            DeviceClassification::High | DeviceClassification::Ultra => self.high_ms,
        }
    }
}

/// Metrics collector preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub recent_samples: usize,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_enabled: bool,
    pub slow_thresholds: SlowThresholds,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            recent_samples: 20,
            idle_timeout_secs: 300,
            sweep_interval_secs: 60,
            sweep_enabled: true,
            slow_thresholds: SlowThresholds::default(),
        }
    }
}

impl CollectorSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Render analyzer thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    /// Window render counts above this are `frequent`
    pub frequent_above: u64,
    /// Window render counts above this are `excessive`
    pub excessive_above: u64,
    pub slow_average_ms: f64,
    pub slow_ratio: f64,
    pub severity_time_cap_ms: f64,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            frequent_above: 10,
            excessive_above: 50,
            slow_average_ms: 16.0,
            slow_ratio: 0.2,
            severity_time_cap_ms: 100.0,
        }
    }
}

/// Frame scheduler preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub window_ms: f64,
    pub fps_history: usize,
    pub tick_tolerance_ms: f64,
    /// Caps carried time at this many frames after a stall; 0 keeps all of it
    pub max_backlog_frames: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            window_ms: 1000.0,
            fps_history: 10,
            tick_tolerance_ms: 1.0,
            max_backlog_frames: 0.0,
        }
    }
}

/// Device signal overrides; any value set here wins over detection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub logical_cores: Option<u32>,
    pub device_memory_gb: Option<f64>,
    pub device_pixel_ratio: Option<f64>,
    pub connection_type: Option<ConnectionType>,
    pub manual_override: Option<DeviceClassification>,
}

impl DeviceSettings {
    /// Overlay the configured values on top of detected signals
    pub fn apply(&self, mut signals: DeviceSignals) -> DeviceSignals {
        if self.logical_cores.is_some() {
            signals.logical_cores = self.logical_cores;
        }
        if self.device_memory_gb.is_some() {
            signals.device_memory_gb = self.device_memory_gb;
        }
        if self.device_pixel_ratio.is_some() {
            signals.device_pixel_ratio = self.device_pixel_ratio;
        }
        if self.connection_type.is_some() {
            signals.connection_type = self.connection_type;
        }
        signals
    }
}

/// Live-metrics quality adaptation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationSettings {
    pub enabled: bool,
    /// Step down when measured fps stays under `low_ratio * target`
    pub low_ratio: f64,
    /// Step back up when measured fps stays at or over `recover_ratio * target`
    pub recover_ratio: f64,
    /// Consecutive low windows before stepping down
    pub windows_required: usize,
    /// Consecutive healthy windows before stepping back up
    pub recover_windows_required: usize,
}

impl Default for AdaptationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            low_ratio: 0.75,
            recover_ratio: 0.95,
            windows_required: 3,
            recover_windows_required: 10,
        }
    }
}

/// Logging verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: LogLevel,
}
