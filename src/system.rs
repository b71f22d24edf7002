//! Process-wide performance state
//!
//! One explicit object tying the classifier, collector, analyzer, config
//! store and idle sweeper together. Construct it once per session and pass
//! it (or an `Arc` of it) to whatever needs it.

use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::info;

use crate::analyzer::{ComponentAnalysis, RenderAnalyzer};
use crate::config::Settings;
use crate::device::{DeviceCapabilityClassifier, DeviceClassification, DeviceSignals};
use crate::error::ConfigRecomputeError;
use crate::metrics::{ComponentMetrics, MetricsCollector};
use crate::perf_config::{PerfConfig, PerfConfigOverride, PerformanceConfigStore, Subscription};
use crate::scheduler::{AdaptiveFrameScheduler, FrameControl, SchedulerHandle, SchedulerOptions};
use crate::sweeper::{spawn_sweeper, SweeperHandle};
use crate::tick_source::TickSource;

pub struct PerformanceSystem {
    settings: Settings,
    classifier: Mutex<DeviceCapabilityClassifier>,
    collector: Arc<MetricsCollector>,
    analyzer: RenderAnalyzer,
    config_store: Arc<PerformanceConfigStore>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl PerformanceSystem {
    /// Detect the host and start the idle sweeper if enabled
    pub fn init(settings: Settings) -> Result<Self> {
        let signals = settings.device.apply(DeviceSignals::detect());
        let system = Self::with_signals(settings, signals);
        if system.settings.collector.sweep_enabled {
            let handle = spawn_sweeper(
                Arc::clone(&system.collector),
                system.settings.collector.sweep_interval(),
            )
            .context("Failed to spawn idle sweeper")?;
            *system.sweeper.lock() = Some(handle);
        }
        Ok(system)
    }

    /// Build from explicit signals without any background thread
    pub fn with_signals(settings: Settings, signals: DeviceSignals) -> Self {
        let mut classifier = DeviceCapabilityClassifier::new(signals);
        if let Some(level) = settings.device.manual_override {
            classifier.set_manual_override(level);
        }
        let classification = classifier.classification();

        let collector = Arc::new(MetricsCollector::new(
            settings.collector.clone(),
            classification,
        ));
        let analyzer = RenderAnalyzer::new(Arc::clone(&collector), settings.analyzer.clone());
        let config_store = Arc::new(PerformanceConfigStore::new(
            classification,
            settings.adaptation.clone(),
        ));
        if classifier.manual_override().is_some() {
            config_store.apply_manual_capability(Some(classification), classifier.detected());
        }
        // Slow thresholds follow whichever classification the store settles on
        let weak_collector: Weak<MetricsCollector> = Arc::downgrade(&collector);
        let _ = config_store.subscribe(move |config| {
            if let Some(collector) = weak_collector.upgrade() {
                collector.set_classification(config.classification);
            }
        });

        info!(classification = %classification, "performance system ready");
        Self {
            settings,
            classifier: Mutex::new(classifier),
            collector,
            analyzer,
            config_store,
            sweeper: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn analyzer(&self) -> &RenderAnalyzer {
        &self.analyzer
    }

    pub fn config_store(&self) -> &Arc<PerformanceConfigStore> {
        &self.config_store
    }

    /// Classification currently in effect; environment changes show up here
    /// after the window boundary that applies them
    pub fn classification(&self) -> DeviceClassification {
        self.config_store.classification()
    }

    /// Render-completion signal from the host
    pub fn record_render(&self, component: &str, duration_ms: f64) {
        self.collector.record_render(component, duration_ms);
    }

    pub fn get_metrics(&self, component: &str) -> Option<ComponentMetrics> {
        self.collector.get_metrics(component)
    }

    /// Every tracked component, most severe first
    pub fn get_component_analyses(&self) -> Vec<ComponentAnalysis> {
        self.analyzer.analyze_all()
    }

    pub fn find_components_with_performance_issues(&self) -> Vec<ComponentAnalysis> {
        self.analyzer.find_components_with_performance_issues()
    }

    pub fn get_current_config(&self) -> Arc<PerfConfig> {
        self.config_store.get_snapshot()
    }

    pub fn subscribe_config(
        &self,
        callback: impl Fn(&PerfConfig) + Send + Sync + 'static,
    ) -> Subscription {
        self.config_store.subscribe(callback)
    }

    /// Clear metrics and re-derive classification and config from scratch
    pub fn reset_all(&self) {
        self.collector.reset();
        let (classification, detected, manual) = {
            let mut classifier = self.classifier.lock();
            classifier.reset();
            let manual = self.settings.device.manual_override;
            if let Some(level) = manual {
                classifier.set_manual_override(level);
            }
            (classifier.classification(), classifier.detected(), manual)
        };
        self.collector.set_classification(classification);
        self.config_store.reset(classification);
        if manual.is_some() {
            self.config_store.apply_manual_capability(manual, detected);
        }
        info!(classification = %classification, "performance state reset");
    }

    /// Process-wide override; applies immediately and persists until cleared
    pub fn set_manual_capability(&self, level: DeviceClassification) {
        let detected = {
            let mut classifier = self.classifier.lock();
            classifier.set_manual_override(level);
            classifier.detected()
        };
        self.collector.set_classification(level);
        self.config_store.apply_manual_capability(Some(level), detected);
    }

    pub fn clear_manual_capability(&self) {
        let detected = {
            let mut classifier = self.classifier.lock();
            classifier.clear_manual_override();
            classifier.detected()
        };
        self.collector.set_classification(detected);
        self.config_store.apply_manual_capability(None, detected);
    }

    /// Environment change: reclassify from fresh signals. Returns the detected
    /// class; it takes effect at the next window boundary.
    pub fn refresh_signals(&self, signals: DeviceSignals) -> DeviceClassification {
        let (detected, manual) = {
            let mut classifier = self.classifier.lock();
            classifier.refresh(signals);
            (classifier.detected(), classifier.manual_override().is_some())
        };
        if !manual {
            self.config_store.set_classification(detected);
        }
        detected
    }

    pub fn set_config_override(
        &self,
        config_override: PerfConfigOverride,
    ) -> Result<(), ConfigRecomputeError> {
        self.config_store.set_config_override(config_override)
    }

    pub fn clear_config_override(&self) {
        self.config_store.clear_config_override();
    }

    /// Start a scheduler paced by this system's config
    pub fn start<F>(&self, work: F, tick_source: Arc<dyn TickSource>) -> SchedulerHandle
    where
        F: FnMut(f64) -> Result<FrameControl> + Send + 'static,
    {
        let options = SchedulerOptions::default()
            .with_settings(self.settings.scheduler.clone())
            .with_config_store(Arc::clone(&self.config_store));
        AdaptiveFrameScheduler::new(options).start(work, tick_source)
    }

    /// Stop background threads
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.shutdown();
        }
    }
}

impl Drop for PerformanceSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
