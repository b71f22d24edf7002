//! Adaptive performance configuration
//!
//! Derives a `PerfConfig` from the device classification and live frame-rate
//! measurements, and publishes it to subscribers. Readers always get the
//! last-known-good config without waiting on a recompute.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::AdaptationSettings;
use crate::device::DeviceClassification;
use crate::error::ConfigRecomputeError;

/// Visual-fidelity tier; mirrors the classification it was derived from
pub type QualityLevel = DeviceClassification;

/// How much animation work visual components should do
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnimationComplexity {
    Minimal,
    Reduced,
    Full,
}

/// The derived configuration visual components scale their work by
#[derive(Debug, Clone, PartialEq)]
pub struct PerfConfig {
    pub target_fps: u32,
    /// Device classification the config was derived from
    pub classification: DeviceClassification,
    /// Effective tier; below `classification` while degraded
    pub quality_level: QualityLevel,
    pub particle_scale: f64,
    pub disable_blur: bool,
    pub disable_shadows: bool,
    pub animation_complexity: AnimationComplexity,
    /// Fraction of renders worth instrumenting
    pub sampling_rate: f64,
    pub throttle_interval_ms: f64,
    pub prioritize_smoothness: bool,
}

impl PerfConfig {
    /// The baseline config for a quality tier
    pub fn for_quality(quality: QualityLevel) -> Self {
        use AnimationComplexity::{Full, Minimal, Reduced};

        // (fps, particles, no blur, no shadows, animation, sampling)
        let (target_fps, particle_scale, disable_blur, disable_shadows, animation, sampling_rate) =
            match quality {
                QualityLevel::Low => (20, 0.25, true, true, Minimal, 0.25),
                QualityLevel::Medium => (30, 0.5, true, false, Reduced, 0.5),
                QualityLevel::High => (60, 0.85, false, false, Full, 1.0),
                QualityLevel::Ultra => (60, 1.0, false, false, Full, 1.0),
            };
        Self {
            target_fps,
            classification: quality,
            quality_level: quality,
            particle_scale,
            disable_blur,
            disable_shadows,
            animation_complexity: animation,
            sampling_rate,
            throttle_interval_ms: frame_budget_ms(target_fps),
            prioritize_smoothness: quality == QualityLevel::Ultra,
        }
    }

    /// Frame budget in milliseconds
    pub fn frame_budget_ms(&self) -> f64 {
        frame_budget_ms(self.target_fps)
    }

    fn validate(&self) -> Result<(), ConfigRecomputeError> {
        if !(1..=240).contains(&self.target_fps) {
            return Err(ConfigRecomputeError::TargetFpsOutOfRange(self.target_fps));
        }
        if !(0.0..=1.0).contains(&self.particle_scale) {
            return Err(ConfigRecomputeError::ParticleScaleOutOfRange(
                self.particle_scale,
            ));
        }
        if !(self.sampling_rate > 0.0 && self.sampling_rate <= 1.0) {
            return Err(ConfigRecomputeError::SamplingRateOutOfRange(
                self.sampling_rate,
            ));
        }
        if !(self.throttle_interval_ms.is_finite() && self.throttle_interval_ms > 0.0) {
            return Err(ConfigRecomputeError::InvalidThrottleInterval(
                self.throttle_interval_ms,
            ));
        }
        Ok(())
    }
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self::for_quality(QualityLevel::Medium)
    }
}

pub fn frame_budget_ms(target_fps: u32) -> f64 {
    1000.0 / f64::from(target_fps.max(1))
}

/// Hand-set values layered over the derived config
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerfConfigOverride {
    pub target_fps: Option<u32>,
    pub particle_scale: Option<f64>,
    pub disable_blur: Option<bool>,
    pub disable_shadows: Option<bool>,
    pub animation_complexity: Option<AnimationComplexity>,
    pub sampling_rate: Option<f64>,
    pub prioritize_smoothness: Option<bool>,
}

impl PerfConfigOverride {
    fn apply(&self, config: &mut PerfConfig) {
        if let Some(fps) = self.target_fps {
            config.target_fps = fps;
            config.throttle_interval_ms = frame_budget_ms(fps);
        }
        if let Some(scale) = self.particle_scale {
            config.particle_scale = scale;
        }
        if let Some(flag) = self.disable_blur {
            config.disable_blur = flag;
        }
        if let Some(flag) = self.disable_shadows {
            config.disable_shadows = flag;
        }
        if let Some(complexity) = self.animation_complexity {
            config.animation_complexity = complexity;
        }
        if let Some(rate) = self.sampling_rate {
            config.sampling_rate = rate;
        }
        if let Some(flag) = self.prioritize_smoothness {
            config.prioritize_smoothness = flag;
        }
    }
}

type ConfigCallback = Arc<dyn Fn(&PerfConfig) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: Vec<(u64, ConfigCallback)>,
}

/// Returned by `subscribe`; call `unsubscribe` to stop notifications
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Inputs to the derivation, guarded separately from the published config
#[derive(Debug)]
struct DerivationState {
    classification: DeviceClassification,
    manual_capability: bool,
    /// Environment reclassification waiting for the next window boundary
    pending_classification: Option<DeviceClassification>,
    degradation_steps: u8,
    low_windows: usize,
    healthy_windows: usize,
    config_override: Option<PerfConfigOverride>,
    retry_pending: bool,
    last_error: Option<ConfigRecomputeError>,
}

impl DerivationState {
    fn new(classification: DeviceClassification) -> Self {
        Self {
            classification,
            manual_capability: false,
            pending_classification: None,
            degradation_steps: 0,
            low_windows: 0,
            healthy_windows: 0,
            config_override: None,
            retry_pending: false,
            last_error: None,
        }
    }

    fn effective_quality(&self) -> QualityLevel {
        let mut quality = self.classification;
        for _ in 0..self.degradation_steps {
            quality = quality.lower();
        }
        quality
    }

    fn derive(&self) -> Result<PerfConfig, ConfigRecomputeError> {
        let mut config = PerfConfig::for_quality(self.effective_quality());
        config.classification = self.classification;
        if let Some(config_override) = &self.config_override {
            config_override.apply(&mut config);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Holds and publishes the current `PerfConfig`
pub struct PerformanceConfigStore {
    current: RwLock<Arc<PerfConfig>>,
    state: Mutex<DerivationState>,
    adaptation: AdaptationSettings,
    subscribers: Arc<Mutex<Subscribers>>,
    /// Bumped on every manual override so schedulers can pick it up mid-window
    override_generation: AtomicU64,
}

impl PerformanceConfigStore {
    pub fn new(classification: DeviceClassification, adaptation: AdaptationSettings) -> Self {
        let state = DerivationState::new(classification);
        let initial = state.derive().unwrap_or_default();
        Self {
            current: RwLock::new(Arc::new(initial)),
            state: Mutex::new(state),
            adaptation,
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            override_generation: AtomicU64::new(0),
        }
    }

    /// The last-known-good config
    pub fn get_snapshot(&self) -> Arc<PerfConfig> {
        self.current.read().clone()
    }

    pub fn override_generation(&self) -> u64 {
        self.override_generation.load(Ordering::Acquire)
    }

    pub fn classification(&self) -> DeviceClassification {
        self.state.lock().classification
    }

    pub fn pending_classification(&self) -> Option<DeviceClassification> {
        self.state.lock().pending_classification
    }

    pub fn degradation_steps(&self) -> u8 {
        self.state.lock().degradation_steps
    }

    pub fn last_error(&self) -> Option<ConfigRecomputeError> {
        self.state.lock().last_error.clone()
    }

    pub fn retry_pending(&self) -> bool {
        self.state.lock().retry_pending
    }

    /// Register a callback invoked with each newly published config
    pub fn subscribe(
        &self,
        callback: impl Fn(&PerfConfig) + Send + Sync + 'static,
    ) -> Subscription {
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.push((id, Arc::new(callback)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().callbacks.len()
    }

    /// Re-derive and publish the config. On failure the previous config stays
    /// in place and a retry is flagged for the next window boundary.
    pub fn recompute(&self) -> Result<(), ConfigRecomputeError> {
        let derived = {
            let mut state = self.state.lock();
            match state.derive() {
                Ok(config) => {
                    state.retry_pending = false;
                    state.last_error = None;
                    config
                }
                Err(err) => {
                    error!(error = %err, "config recompute failed, keeping last-known-good");
                    state.retry_pending = true;
                    state.last_error = Some(err.clone());
                    return Err(err);
                }
            }
        };
        self.publish(derived);
        Ok(())
    }

    fn publish(&self, config: PerfConfig) {
        {
            let mut current = self.current.write();
            if **current == config {
                return;
            }
            debug!(
                target_fps = config.target_fps,
                quality = %config.quality_level,
                "publishing perf config"
            );
            *current = Arc::new(config.clone());
        }
        self.notify(&config);
    }

    fn notify(&self, config: &PerfConfig) {
        let callbacks: Vec<ConfigCallback> = self
            .subscribers
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(config))).is_err() {
                warn!("config subscriber panicked");
            }
        }
    }

    /// Classification changed through detection (environment change). Held
    /// back until the next window boundary.
    pub fn set_classification(&self, classification: DeviceClassification) {
        let mut state = self.state.lock();
        state.pending_classification = if state.classification == classification {
            None
        } else {
            Some(classification)
        };
    }

    /// Returns true if a held-back classification was applied
    fn apply_pending_classification(&self) -> bool {
        let mut state = self.state.lock();
        if state.manual_capability {
            return false;
        }
        match state.pending_classification.take() {
            Some(classification) => {
                info!(
                    from = %state.classification,
                    to = %classification,
                    "applying device reclassification"
                );
                state.classification = classification;
                state.degradation_steps = 0;
                state.low_windows = 0;
                state.healthy_windows = 0;
                true
            }
            None => false,
        }
    }

    /// Manual capability override; takes effect immediately
    pub fn apply_manual_capability(
        &self,
        classification: Option<DeviceClassification>,
        detected: DeviceClassification,
    ) {
        {
            let mut state = self.state.lock();
            state.manual_capability = classification.is_some();
            state.classification = classification.unwrap_or(detected);
            state.pending_classification = None;
            state.degradation_steps = 0;
            state.low_windows = 0;
            state.healthy_windows = 0;
        }
        let _ = self.recompute();
        self.override_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Layer hand-set values over the derived config; applies immediately
    pub fn set_config_override(
        &self,
        config_override: PerfConfigOverride,
    ) -> Result<(), ConfigRecomputeError> {
        self.state.lock().config_override = Some(config_override);
        let result = self.recompute();
        self.override_generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    pub fn clear_config_override(&self) {
        self.state.lock().config_override = None;
        let _ = self.recompute();
        self.override_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Feed one window's measured fps into quality adaptation
    pub fn report_window(&self, measured_fps: f64) {
        if !self.adaptation.enabled || !measured_fps.is_finite() {
            return;
        }
        let target = f64::from(self.get_snapshot().target_fps);
        let mut state = self.state.lock();
        if state.manual_capability {
            return;
        }

        let required = self.adaptation.windows_required.max(1);
        let recover_required = self.adaptation.recover_windows_required.max(1);
        if measured_fps < target * self.adaptation.low_ratio {
            state.low_windows += 1;
            state.healthy_windows = 0;
            if state.low_windows >= required && state.effective_quality() > QualityLevel::Low {
                state.degradation_steps += 1;
                state.low_windows = 0;
                info!(
                    fps = measured_fps,
                    quality = %state.effective_quality(),
                    "sustained low frame rate, lowering quality"
                );
            }
        } else if measured_fps >= target * self.adaptation.recover_ratio {
            state.healthy_windows += 1;
            state.low_windows = 0;
            if state.healthy_windows >= recover_required && state.degradation_steps > 0 {
                state.degradation_steps -= 1;
                state.healthy_windows = 0;
                info!(
                    fps = measured_fps,
                    quality = %state.effective_quality(),
                    "frame rate recovered, raising quality"
                );
            }
        } else {
            state.low_windows = 0;
            state.healthy_windows = 0;
        }
    }

    /// Window boundary: apply a pending reclassification or fold in the
    /// measurement, then recompute
    pub fn on_window_boundary(&self, measured_fps: f64) -> Result<(), ConfigRecomputeError> {
        // The window was measured under the old classification
        if !self.apply_pending_classification() {
            self.report_window(measured_fps);
        }
        self.recompute()
    }

    /// Back to a freshly derived state for `classification`. Subscribers stay.
    pub fn reset(&self, classification: DeviceClassification) {
        *self.state.lock() = DerivationState::new(classification);
        let _ = self.recompute();
        self.override_generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn store(class: DeviceClassification) -> PerformanceConfigStore {
        PerformanceConfigStore::new(class, AdaptationSettings::default())
    }

    #[test]
    fn test_target_fps_by_class() {
        assert_eq!(store(DeviceClassification::Low).get_snapshot().target_fps, 20);
        assert_eq!(store(DeviceClassification::Medium).get_snapshot().target_fps, 30);
        assert_eq!(store(DeviceClassification::High).get_snapshot().target_fps, 60);

        let ultra = store(DeviceClassification::Ultra).get_snapshot();
        assert_eq!(ultra.target_fps, 60);
        assert!(ultra.prioritize_smoothness);
        assert_eq!(ultra.quality_level, DeviceClassification::Ultra);
    }

    #[test]
    fn test_effects_scale_monotonically() {
        let tiers = [
            QualityLevel::Low,
            QualityLevel::Medium,
            QualityLevel::High,
            QualityLevel::Ultra,
        ];
        for pair in tiers.windows(2) {
            let lower = PerfConfig::for_quality(pair[0]);
            let higher = PerfConfig::for_quality(pair[1]);
            assert!(lower.particle_scale <= higher.particle_scale);
            assert!(lower.target_fps <= higher.target_fps);
            assert!(lower.animation_complexity <= higher.animation_complexity);
            assert!(lower.disable_blur >= higher.disable_blur);
            assert!(lower.disable_shadows >= higher.disable_shadows);
        }
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let store = store(DeviceClassification::Medium);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = store.subscribe(move |config| {
            assert_eq!(config.quality_level, DeviceClassification::High);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set_classification(DeviceClassification::High);
        store.on_window_boundary(30.0).unwrap();
        // Unchanged config is not re-published
        store.recompute().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);
        store.set_classification(DeviceClassification::Low);
        store.on_window_boundary(60.0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_is_contained() {
        let store = store(DeviceClassification::Medium);
        let _sub = store.subscribe(|_| panic!("subscriber bug"));
        store.set_classification(DeviceClassification::Low);
        store.on_window_boundary(30.0).unwrap();
        assert_eq!(store.get_snapshot().target_fps, 20);
    }

    #[test]
    fn test_reclassification_waits_for_window_boundary() {
        let store = store(DeviceClassification::Medium);
        store.set_classification(DeviceClassification::High);
        assert_eq!(store.pending_classification(), Some(DeviceClassification::High));
        assert_eq!(store.classification(), DeviceClassification::Medium);
        assert_eq!(store.get_snapshot().target_fps, 30);

        // A low reading from the old window does not count against the new class
        store.on_window_boundary(5.0).unwrap();
        assert_eq!(store.pending_classification(), None);
        let config = store.get_snapshot();
        assert_eq!(config.classification, DeviceClassification::High);
        assert_eq!(config.target_fps, 60);
        assert_eq!(store.degradation_steps(), 0);
    }

    #[test]
    fn test_reclassification_to_current_class_is_dropped() {
        let store = store(DeviceClassification::Medium);
        store.set_classification(DeviceClassification::High);
        store.set_classification(DeviceClassification::Medium);
        assert_eq!(store.pending_classification(), None);
    }

    #[test]
    fn test_manual_capability_discards_pending_reclassification() {
        let store = store(DeviceClassification::Medium);
        store.set_classification(DeviceClassification::High);
        store.apply_manual_capability(Some(DeviceClassification::Low), DeviceClassification::Medium);
        store.on_window_boundary(20.0).unwrap();
        assert_eq!(store.classification(), DeviceClassification::Low);
    }

    #[test]
    fn test_malformed_override_keeps_last_good() {
        let store = store(DeviceClassification::High);
        let err = store
            .set_config_override(PerfConfigOverride {
                particle_scale: Some(3.0),
                ..PerfConfigOverride::default()
            })
            .unwrap_err();
        assert_eq!(err, ConfigRecomputeError::ParticleScaleOutOfRange(3.0));
        assert!(store.retry_pending());
        assert_eq!(store.get_snapshot().particle_scale, 0.85);

        // Still failing at the next window boundary
        assert!(store.on_window_boundary(60.0).is_err());

        store.clear_config_override();
        assert!(!store.retry_pending());
        assert!(store.last_error().is_none());
    }

    #[test]
    fn test_valid_override_applies_immediately() {
        let store = store(DeviceClassification::Medium);
        let before = store.override_generation();
        store
            .set_config_override(PerfConfigOverride {
                target_fps: Some(45),
                disable_blur: Some(false),
                ..PerfConfigOverride::default()
            })
            .unwrap();
        let config = store.get_snapshot();
        assert_eq!(config.target_fps, 45);
        assert!(!config.disable_blur);
        assert!(store.override_generation() > before);
    }

    #[test]
    fn test_sustained_low_fps_degrades_then_recovers() {
        let store = store(DeviceClassification::High);
        for _ in 0..3 {
            store.on_window_boundary(30.0).unwrap();
        }
        assert_eq!(store.degradation_steps(), 1);
        let degraded = store.get_snapshot();
        assert_eq!(degraded.quality_level, DeviceClassification::Medium);
        assert_eq!(degraded.classification, DeviceClassification::High);
        assert_eq!(degraded.target_fps, 30);

        // Raising quality needs a longer run of healthy windows
        for _ in 0..9 {
            store.on_window_boundary(30.0).unwrap();
        }
        assert_eq!(store.degradation_steps(), 1);
        store.on_window_boundary(30.0).unwrap();
        assert_eq!(store.get_snapshot().quality_level, DeviceClassification::High);
    }

    #[test]
    fn test_degradation_never_below_low() {
        let store = store(DeviceClassification::Low);
        for _ in 0..12 {
            store.on_window_boundary(1.0).unwrap();
        }
        assert_eq!(store.degradation_steps(), 0);
        assert_eq!(store.get_snapshot().quality_level, DeviceClassification::Low);
    }

    #[test]
    fn test_manual_capability_pins_quality() {
        let store = store(DeviceClassification::Medium);
        store.apply_manual_capability(
            Some(DeviceClassification::Ultra),
            DeviceClassification::Medium,
        );
        for _ in 0..6 {
            store.on_window_boundary(5.0).unwrap();
        }
        assert_eq!(store.get_snapshot().quality_level, DeviceClassification::Ultra);

        store.apply_manual_capability(None, DeviceClassification::Medium);
        assert_eq!(store.get_snapshot().quality_level, DeviceClassification::Medium);
    }
}
