//! Device capability classification
//!
//! Buckets the host into a coarse capability tier from a handful of hardware
//! signals. Detection reads what the platform exposes; anything missing falls
//! back to `Medium`.

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{info, warn};

use crate::error::ClassificationUnavailable;

/// Environment variable carrying the display pixel ratio
pub const PIXEL_RATIO_ENV: &str = "FRAMEPACE_PIXEL_RATIO";
/// Environment variable carrying the network connection type
pub const CONNECTION_ENV: &str = "FRAMEPACE_CONNECTION";

/// Coarse host capability tier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClassification {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl DeviceClassification {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceClassification::Low => "Low",
            DeviceClassification::Medium => "Medium",
            DeviceClassification::High => "High",
            DeviceClassification::Ultra => "Ultra",
        }
    }

    /// One tier down, saturating at `Low`
    pub fn lower(&self) -> Self {
        match self {
            DeviceClassification::Low | DeviceClassification::Medium => DeviceClassification::Low,
            DeviceClassification::High => DeviceClassification::Medium,
            DeviceClassification::Ultra => DeviceClassification::High,
        }
    }

    pub fn is_high_end(&self) -> bool {
        matches!(self, DeviceClassification::High | DeviceClassification::Ultra)
    }
}

impl fmt::Display for DeviceClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceClassification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(DeviceClassification::Low),
            "medium" => Ok(DeviceClassification::Medium),
            "high" => Ok(DeviceClassification::High),
            "ultra" => Ok(DeviceClassification::Ultra),
            other => Err(format!("unknown capability level '{}'", other)),
        }
    }
}

/// Network connection type as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[serde(rename = "2g")]
    Cellular2g,
    #[serde(rename = "3g")]
    Cellular3g,
    #[serde(rename = "4g")]
    Cellular4g,
    #[serde(rename = "5g")]
    Cellular5g,
    Wifi,
    Ethernet,
    Other,
}

impl FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slow-2g" | "2g" => Ok(ConnectionType::Cellular2g),
            "3g" => Ok(ConnectionType::Cellular3g),
            "4g" => Ok(ConnectionType::Cellular4g),
            "5g" => Ok(ConnectionType::Cellular5g),
            "wifi" => Ok(ConnectionType::Wifi),
            "ethernet" => Ok(ConnectionType::Ethernet),
            "other" | "unknown" => Ok(ConnectionType::Other),
            other => Err(format!("unknown connection type '{}'", other)),
        }
    }
}

/// Raw hardware signals; `None` means the platform did not report it
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceSignals {
    pub logical_cores: Option<u32>,
    pub device_memory_gb: Option<f64>,
    pub device_pixel_ratio: Option<f64>,
    pub connection_type: Option<ConnectionType>,
}

impl DeviceSignals {
    /// Read signals from the running host
    pub fn detect() -> Self {
        Self {
            logical_cores: detect_logical_cores(),
            device_memory_gb: detect_memory_gb(),
            device_pixel_ratio: env::var(PIXEL_RATIO_ENV)
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|dpr| dpr.is_finite() && *dpr > 0.0),
            connection_type: env::var(CONNECTION_ENV)
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }
}

fn detect_logical_cores() -> Option<u32> {
    std::thread::available_parallelism()
        .ok()
        .map(|n| n.get() as u32)
}

fn detect_memory_gb() -> Option<f64> {
    let mut system = System::new();
    system.refresh_memory();
    let bytes = system.total_memory();
    if bytes == 0 {
        None
    } else {
        Some(bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Classify signals, reporting which required ones were missing
pub fn try_classify(
    signals: &DeviceSignals,
) -> Result<DeviceClassification, ClassificationUnavailable> {
    let cores = signals.logical_cores.filter(|&c| c > 0);
    let memory = signals
        .device_memory_gb
        .filter(|m| m.is_finite() && *m >= 0.0);

    let (cores, memory) = match (cores, memory) {
        (Some(c), Some(m)) => (c, m),
        (c, m) => {
            let mut missing = Vec::new();
            if c.is_none() {
                missing.push("logical_cores");
            }
            if m.is_none() {
                missing.push("device_memory_gb");
            }
            return Err(ClassificationUnavailable { missing });
        }
    };
    let dpr = signals.device_pixel_ratio.unwrap_or(1.0);

    if cores <= 2 || memory <= 2.0 {
        return Ok(DeviceClassification::Low);
    }

    if cores >= 8 && memory >= 8.0 && dpr <= 2.0 {
        let fast_link = matches!(
            signals.connection_type,
            Some(ConnectionType::Cellular5g) | Some(ConnectionType::Wifi)
        );
        if fast_link && cores >= 12 {
            return Ok(DeviceClassification::Ultra);
        }
        return Ok(DeviceClassification::High);
    }

    Ok(DeviceClassification::Medium)
}

/// Classify signals, falling back to `Medium` when required ones are missing
pub fn classify(signals: &DeviceSignals) -> DeviceClassification {
    try_classify(signals).unwrap_or(DeviceClassification::Medium)
}

/// Holds the session's classification plus any manual override
#[derive(Debug, Clone)]
pub struct DeviceCapabilityClassifier {
    signals: DeviceSignals,
    detected: DeviceClassification,
    manual_override: Option<DeviceClassification>,
    warned_unavailable: bool,
}

impl DeviceCapabilityClassifier {
    pub fn new(signals: DeviceSignals) -> Self {
        let mut classifier = Self {
            signals,
            detected: DeviceClassification::Medium,
            manual_override: None,
            warned_unavailable: false,
        };
        classifier.detected = classifier.evaluate();
        classifier
    }

    fn evaluate(&mut self) -> DeviceClassification {
        match try_classify(&self.signals) {
            Ok(class) => {
                info!(classification = %class, signals = ?self.signals, "device classified");
                class
            }
            Err(err) => {
                if !self.warned_unavailable {
                    warn!(error = %err, "falling back to Medium classification");
                    self.warned_unavailable = true;
                }
                DeviceClassification::Medium
            }
        }
    }

    /// Effective classification: the override if set, else the detected tier
    pub fn classification(&self) -> DeviceClassification {
        self.manual_override.unwrap_or(self.detected)
    }

    pub fn detected(&self) -> DeviceClassification {
        self.detected
    }

    pub fn signals(&self) -> &DeviceSignals {
        &self.signals
    }

    pub fn manual_override(&self) -> Option<DeviceClassification> {
        self.manual_override
    }

    pub fn set_manual_override(&mut self, level: DeviceClassification) {
        info!(level = %level, "manual capability override set");
        self.manual_override = Some(level);
    }

    pub fn clear_manual_override(&mut self) {
        if self.manual_override.take().is_some() {
            info!("manual capability override cleared");
        }
    }

    /// Environment change: reclassify from new signals. Returns the new
    /// effective classification.
    pub fn refresh(&mut self, signals: DeviceSignals) -> DeviceClassification {
        self.signals = signals;
        self.detected = self.evaluate();
        self.classification()
    }

    /// Drop the override and reclassify from the current signals
    pub fn reset(&mut self) {
        self.manual_override = None;
        self.warned_unavailable = false;
        self.detected = self.evaluate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(cores: u32, mem: f64) -> DeviceSignals {
        DeviceSignals {
            logical_cores: Some(cores),
            device_memory_gb: Some(mem),
            ..DeviceSignals::default()
        }
    }

    #[test]
    fn test_boundary_table() {
        assert_eq!(classify(&signals(2, 1.0)), DeviceClassification::Low);
        assert_eq!(classify(&signals(1, 0.5)), DeviceClassification::Low);
        assert_eq!(classify(&signals(16, 2.0)), DeviceClassification::Low);
        assert_eq!(classify(&signals(4, 4.0)), DeviceClassification::Medium);
        assert_eq!(classify(&signals(3, 2.5)), DeviceClassification::Medium);

        let high = DeviceSignals {
            device_pixel_ratio: Some(2.0),
            ..signals(8, 8.0)
        };
        assert_eq!(classify(&high), DeviceClassification::High);
    }

    #[test]
    fn test_dense_display_is_not_high() {
        let retina = DeviceSignals {
            device_pixel_ratio: Some(3.0),
            ..signals(8, 16.0)
        };
        assert_eq!(classify(&retina), DeviceClassification::Medium);
    }

    #[test]
    fn test_ultra_needs_fast_link_and_cores() {
        let mut s = DeviceSignals {
            connection_type: Some(ConnectionType::Wifi),
            ..signals(12, 16.0)
        };
        assert_eq!(classify(&s), DeviceClassification::Ultra);

        s.connection_type = Some(ConnectionType::Cellular5g);
        assert_eq!(classify(&s), DeviceClassification::Ultra);

        s.connection_type = Some(ConnectionType::Cellular4g);
        assert_eq!(classify(&s), DeviceClassification::High);

        s.connection_type = Some(ConnectionType::Wifi);
        s.logical_cores = Some(10);
        assert_eq!(classify(&s), DeviceClassification::High);
    }

    #[test]
    fn test_missing_signals_fall_back_to_medium() {
        assert_eq!(classify(&DeviceSignals::default()), DeviceClassification::Medium);

        let err = try_classify(&DeviceSignals {
            logical_cores: Some(1),
            ..DeviceSignals::default()
        })
        .unwrap_err();
        assert_eq!(err.missing, vec!["device_memory_gb"]);
    }

    #[test]
    fn test_manual_override_applies_immediately() {
        let mut classifier = DeviceCapabilityClassifier::new(signals(16, 32.0));
        assert_eq!(classifier.classification(), DeviceClassification::High);

        classifier.set_manual_override(DeviceClassification::Low);
        assert_eq!(classifier.classification(), DeviceClassification::Low);
        assert_eq!(classifier.detected(), DeviceClassification::High);

        classifier.clear_manual_override();
        assert_eq!(classifier.classification(), DeviceClassification::High);
    }

    #[test]
    fn test_override_survives_refresh() {
        let mut classifier = DeviceCapabilityClassifier::new(signals(4, 4.0));
        classifier.set_manual_override(DeviceClassification::Ultra);
        assert_eq!(
            classifier.refresh(signals(1, 1.0)),
            DeviceClassification::Ultra
        );
        assert_eq!(classifier.detected(), DeviceClassification::Low);

        classifier.reset();
        assert_eq!(classifier.classification(), DeviceClassification::Low);
    }

    #[test]
    fn test_tier_stepping() {
        assert_eq!(DeviceClassification::Low.lower(), DeviceClassification::Low);
        assert_eq!(DeviceClassification::Ultra.lower(), DeviceClassification::High);
        assert!(DeviceClassification::Low < DeviceClassification::Ultra);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "HIGH".parse::<DeviceClassification>(),
            Ok(DeviceClassification::High)
        );
        assert_eq!("5g".parse::<ConnectionType>(), Ok(ConnectionType::Cellular5g));
        assert!("fast".parse::<ConnectionType>().is_err());
    }
}
