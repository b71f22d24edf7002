//! Render metrics collection
//!
//! Per-component render timing aggregated into bounded statistics. Entries
//! are created on the first sample for a name and pruned by the idle sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::CollectorSettings;
use crate::device::DeviceClassification;
use crate::error::InstrumentationError;
use crate::logging::LogThrottle;
use crate::ring_buffer::RingBuffer;

/// Invalid samples are logged at most this often per component
const INVALID_SAMPLE_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// One timed observation of a component's render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSample {
    pub component: String,
    pub duration_ms: f64,
    pub timestamp: Instant,
}

/// Aggregated statistics for one component
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentMetrics {
    pub component: String,
    pub render_count: u64,
    pub total_render_time: f64,
    pub min_render_time: f64,
    pub max_render_time: f64,
    pub slow_render_count: u64,
    /// Renders since the current sweep window opened
    pub renders_in_window: u64,
    pub recent_samples: RingBuffer<RenderSample>,
    pub last_updated: Instant,
}

impl ComponentMetrics {
    fn new(component: &str, capacity: usize, now: Instant) -> Self {
        Self {
            component: component.to_string(),
            render_count: 0,
            total_render_time: 0.0,
            min_render_time: f64::INFINITY,
            max_render_time: 0.0,
            slow_render_count: 0,
            renders_in_window: 0,
            recent_samples: RingBuffer::new(capacity),
            last_updated: now,
        }
    }

    fn record(&mut self, duration_ms: f64, slow: bool, now: Instant) {
        self.render_count += 1;
        self.renders_in_window += 1;
        self.total_render_time += duration_ms;
        self.min_render_time = self.min_render_time.min(duration_ms);
        self.max_render_time = self.max_render_time.max(duration_ms);
        if slow {
            self.slow_render_count += 1;
        }
        self.recent_samples.push(RenderSample {
            component: self.component.clone(),
            duration_ms,
            timestamp: now,
        });
        self.last_updated = now;
    }

    pub fn average_render_time(&self) -> f64 {
        if self.render_count == 0 {
            0.0
        } else {
            self.total_render_time / self.render_count as f64
        }
    }

    /// Fraction of renders that exceeded the slow threshold
    pub fn slow_ratio(&self) -> f64 {
        if self.render_count == 0 {
            0.0
        } else {
            self.slow_render_count as f64 / self.render_count as f64
        }
    }
}

/// Outcome of one idle sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub pruned: usize,
    pub remaining: usize,
}

/// Owns the aggregate map. Safe to share across render contexts.
#[derive(Debug)]
pub struct MetricsCollector {
    components: RwLock<HashMap<String, ComponentMetrics>>,
    classification: RwLock<DeviceClassification>,
    settings: CollectorSettings,
    invalid_log: LogThrottle,
}

impl MetricsCollector {
    pub fn new(settings: CollectorSettings, classification: DeviceClassification) -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            classification: RwLock::new(classification),
            settings,
            invalid_log: LogThrottle::new(INVALID_SAMPLE_LOG_INTERVAL),
        }
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    pub fn classification(&self) -> DeviceClassification {
        *self.classification.read()
    }

    /// Classification used for slow-render thresholds of later samples
    pub fn set_classification(&self, classification: DeviceClassification) {
        *self.classification.write() = classification;
    }

    pub fn slow_threshold_ms(&self) -> f64 {
        self.settings
            .slow_thresholds
            .for_class(self.classification())
    }

    /// Record one render. Invalid samples are dropped and logged.
    pub fn record_render(&self, component: &str, duration_ms: f64) {
        let now = Instant::now();
        if let Err(err) = self.record_render_at(component, duration_ms, now) {
            if self.invalid_log.should_log(err.component(), now) {
                warn!(error = %err, "dropped render sample");
            }
        }
    }

    /// Record one render at an explicit instant
    pub fn record_render_at(
        &self,
        component: &str,
        duration_ms: f64,
        now: Instant,
    ) -> Result<(), InstrumentationError> {
        if component.is_empty() {
            return Err(InstrumentationError::EmptyComponent);
        }
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(InstrumentationError::InvalidDuration {
                component: component.to_string(),
                duration_ms,
            });
        }

        let slow = duration_ms > self.slow_threshold_ms();
        let capacity = self.settings.recent_samples;

        let mut components = self.components.write();
        if !components.contains_key(component) {
            debug!(component, "tracking new component");
            components.insert(
                component.to_string(),
                ComponentMetrics::new(component, capacity, now),
            );
        }
        if let Some(metrics) = components.get_mut(component) {
            metrics.record(duration_ms, slow, now);
        }
        Ok(())
    }

    /// Time `f` and record its duration under `component`
    pub fn measure<T>(&self, component: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.record_render(component, start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Snapshot of one component
    pub fn get_metrics(&self, component: &str) -> Option<ComponentMetrics> {
        self.components.read().get(component).cloned()
    }

    /// Snapshot of every component
    pub fn get_all_metrics(&self) -> HashMap<String, ComponentMetrics> {
        self.components.read().clone()
    }

    pub fn component_count(&self) -> usize {
        self.components.read().len()
    }

    /// Clear all aggregates
    pub fn reset(&self) {
        self.components.write().clear();
        self.invalid_log.clear();
    }

    /// Prune components idle for longer than the timeout and open a new
    /// frequency window for the rest
    pub fn sweep_idle(&self, now: Instant) -> SweepReport {
        let idle_timeout = self.settings.idle_timeout();
        let mut components = self.components.write();
        let before = components.len();

        components.retain(|_, metrics| {
            now.saturating_duration_since(metrics.last_updated) < idle_timeout
        });
        for metrics in components.values_mut() {
            metrics.renders_in_window = 0;
        }
        self.invalid_log.prune(now);

        let report = SweepReport {
            pruned: before - components.len(),
            remaining: components.len(),
        };
        if report.pruned > 0 {
            debug!(pruned = report.pruned, remaining = report.remaining, "idle sweep");
        }
        report
    }
}
