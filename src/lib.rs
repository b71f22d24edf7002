//! framepace - Adaptive render-cost observability and frame throttling
//!
//! Records per-component render timings, classifies the host device, derives
//! a quality/frame-rate configuration from both, and paces caller work to
//! that configuration through an externally ticked scheduler.

pub mod analyzer;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod perf_config;
pub mod ring_buffer;
pub mod scheduler;
pub mod sweeper;
pub mod system;
pub mod tick_source;

// Re-export commonly used types
pub use analyzer::{ComponentAnalysis, RenderAnalyzer, RenderFrequency, Suggestion};
pub use config::Settings;
pub use device::{DeviceClassification, DeviceSignals};
pub use metrics::{ComponentMetrics, MetricsCollector};
pub use perf_config::{PerfConfig, PerfConfigOverride, PerformanceConfigStore, QualityLevel};
pub use scheduler::{AdaptiveFrameScheduler, FrameControl, SchedulerHandle, SchedulerStatus};
pub use system::PerformanceSystem;
pub use tick_source::{IntervalTickSource, ManualTickSource, TickSource};
