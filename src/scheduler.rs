//! Adaptive frame scheduler
//!
//! Throttles caller-supplied work to the target frame rate of the current
//! `PerfConfig`. Driven entirely by an external tick source; the scheduler
//! never blocks and never spawns threads.
//!
//! Time not consumed by a frame is carried into the next one rather than
//! discarded, so the long-run frame rate converges on the target instead of
//! drifting below it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::SchedulerSettings;
use crate::error::{SchedulerTickError, TickFailure};
use crate::perf_config::{PerfConfig, PerformanceConfigStore};
use crate::ring_buffer::RingBuffer;
use crate::tick_source::{TickRegistration, TickSource};

/// What the work callback wants after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameControl {
    #[default]
    Continue,
    /// Detach from the tick source and go idle
    Finish,
}

/// Lifecycle of one scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStatus {
    Idle,
    Running,
    /// Stopped through `SchedulerHandle::stop`
    Cancelled,
}

/// Per-run pacing state. Created on start, destroyed on stop.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerState {
    pub target_frame_time_ms: f64,
    pub accumulated_time_ms: f64,
    pub last_tick_timestamp: Option<f64>,
    pub measured_fps: f64,
    pub skipped_frame_count: u64,
    pub executed_frame_count: u64,
    /// Frames whose work ran in the current window
    pub frame_count_in_window: u64,
    pub window_elapsed_ms: f64,
    pub fps_history: RingBuffer<f64>,
}

/// Result of advancing the state by one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickDecision {
    /// First tick; only establishes the time baseline
    Baseline,
    /// Timestamp went backwards; baseline moved, nothing counted
    Rebased,
    Skip,
    Run { delta_ms: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub decision: TickDecision,
    /// Measured fps when this tick closed a window
    pub window_fps: Option<f64>,
}

impl SchedulerState {
    pub fn new(target_frame_time_ms: f64, fps_history: usize) -> Self {
        Self {
            target_frame_time_ms,
            accumulated_time_ms: 0.0,
            last_tick_timestamp: None,
            measured_fps: 0.0,
            skipped_frame_count: 0,
            executed_frame_count: 0,
            frame_count_in_window: 0,
            window_elapsed_ms: 0.0,
            fps_history: RingBuffer::new(fps_history),
        }
    }

    /// Advance pacing by one tick. `always_run` bypasses throttling.
    pub fn advance(
        &mut self,
        timestamp_ms: f64,
        always_run: bool,
        settings: &SchedulerSettings,
    ) -> TickOutcome {
        let last = match self.last_tick_timestamp {
            Some(last) => last,
            None => {
                self.last_tick_timestamp = Some(timestamp_ms);
                return TickOutcome {
                    decision: TickDecision::Baseline,
                    window_fps: None,
                };
            }
        };

        let delta = timestamp_ms - last;
        self.last_tick_timestamp = Some(timestamp_ms);
        if !delta.is_finite() || delta < 0.0 {
            return TickOutcome {
                decision: TickDecision::Rebased,
                window_fps: None,
            };
        }

        let target = self.target_frame_time_ms;
        self.accumulated_time_ms += delta;
        let backlog_cap = target * settings.max_backlog_frames;
        if backlog_cap > 0.0 && self.accumulated_time_ms > backlog_cap {
            self.accumulated_time_ms = backlog_cap;
        }

        let due = self.accumulated_time_ms >= target - settings.tick_tolerance_ms;
        if due {
            self.accumulated_time_ms -= target;
        }

        let decision = if due || always_run {
            self.executed_frame_count += 1;
            self.frame_count_in_window += 1;
            TickDecision::Run { delta_ms: delta }
        } else {
            self.skipped_frame_count += 1;
            TickDecision::Skip
        };

        self.window_elapsed_ms += delta;
        let mut window_fps = None;
        if self.window_elapsed_ms >= settings.window_ms {
            let fps = self.frame_count_in_window as f64 * 1000.0 / self.window_elapsed_ms;
            self.measured_fps = fps;
            self.fps_history.push(fps);
            self.frame_count_in_window = 0;
            self.window_elapsed_ms = 0.0;
            window_fps = Some(fps);
        }

        TickOutcome {
            decision,
            window_fps,
        }
    }
}

pub type ErrorCallback = Arc<dyn Fn(&SchedulerTickError) + Send + Sync>;

type WorkCallback = Box<dyn FnMut(f64) -> Result<FrameControl> + Send>;

/// Scheduler construction options
#[derive(Clone)]
pub struct SchedulerOptions {
    pub settings: SchedulerSettings,
    /// Used when no config store is attached
    pub config: PerfConfig,
    pub config_store: Option<Arc<PerformanceConfigStore>>,
    pub on_error: Option<ErrorCallback>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            settings: SchedulerSettings::default(),
            config: PerfConfig::default(),
            config_store: None,
            on_error: None,
        }
    }
}

impl SchedulerOptions {
    pub fn with_settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Fixed frame rate, ignored once a config store is attached
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.config.target_fps = fps.max(1);
        self.config.throttle_interval_ms = self.config.frame_budget_ms();
        self
    }

    pub fn with_config(mut self, config: PerfConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_config_store(mut self, store: Arc<PerformanceConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub fn on_error(
        mut self,
        callback: impl Fn(&SchedulerTickError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

/// Pacing inputs taken from the current config
#[derive(Debug, Clone, Copy)]
struct Pacing {
    frame_time_ms: f64,
    always_run: bool,
}

impl Pacing {
    fn from_config(config: &PerfConfig) -> Self {
        Self {
            frame_time_ms: config.frame_budget_ms(),
            always_run: config.prioritize_smoothness && config.quality_level.is_high_end(),
        }
    }
}

struct Running {
    state: SchedulerState,
    work: WorkCallback,
    pacing: Pacing,
    seen_override_generation: u64,
}

struct Shared {
    options: SchedulerOptions,
    tick_source: Arc<dyn TickSource>,
    halted: AtomicBool,
    status: Mutex<SchedulerStatus>,
    running: Mutex<Option<Running>>,
    /// Copy of the state after the latest tick, readable from inside work
    published: Mutex<Option<SchedulerState>>,
    registration: Mutex<Option<TickRegistration>>,
    ticking_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn current_config(&self) -> PerfConfig {
        match &self.options.config_store {
            Some(store) => (*store.get_snapshot()).clone(),
            None => self.options.config.clone(),
        }
    }

    fn detach(&self) {
        if let Some(registration) = self.registration.lock().take() {
            self.tick_source.unregister(registration);
        }
    }

    fn report(&self, error: SchedulerTickError) {
        error!(error = %error, "scheduler tick failed");
        if let Some(callback) = &self.options.on_error {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&error))).is_err() {
                error!("scheduler error callback panicked");
            }
        }
    }

    fn on_tick(&self, timestamp_ms: f64) {
        if self.halted.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.running.lock();
        if self.halted.load(Ordering::Acquire) {
            return;
        }
        *self.ticking_thread.lock() = Some(thread::current().id());
        self.process_tick(&mut guard, timestamp_ms);
        *self.ticking_thread.lock() = None;
    }

    fn process_tick(&self, slot: &mut Option<Running>, timestamp_ms: f64) {
        let running = match slot.as_mut() {
            Some(running) => running,
            None => return,
        };

        if let Some(store) = &self.options.config_store {
            let generation = store.override_generation();
            if generation != running.seen_override_generation {
                running.seen_override_generation = generation;
                running.pacing = Pacing::from_config(&store.get_snapshot());
                running.state.target_frame_time_ms = running.pacing.frame_time_ms;
            }
        }

        let outcome = running.state.advance(
            timestamp_ms,
            running.pacing.always_run,
            &self.options.settings,
        );

        let mut control = FrameControl::Continue;
        if let TickDecision::Run { delta_ms } = outcome.decision {
            let result = panic::catch_unwind(AssertUnwindSafe(|| (running.work)(delta_ms)));
            match result {
                Ok(Ok(next)) => control = next,
                Ok(Err(err)) => self.report(SchedulerTickError {
                    timestamp_ms,
                    failure: TickFailure::Failed(format!("{:#}", err)),
                }),
                Err(payload) => self.report(SchedulerTickError {
                    timestamp_ms,
                    failure: TickFailure::Panicked(panic_message(payload.as_ref())),
                }),
            }
        }

        if let Some(fps) = outcome.window_fps {
            debug!(
                fps,
                skipped = running.state.skipped_frame_count,
                target_ms = running.state.target_frame_time_ms,
                "frame window closed"
            );
            if let Some(store) = &self.options.config_store {
                // A failed recompute keeps the last-known-good config
                let _ = store.on_window_boundary(fps);
                running.seen_override_generation = store.override_generation();
            }
            running.pacing = Pacing::from_config(&self.current_config());
            running.state.target_frame_time_ms = running.pacing.frame_time_ms;
        }

        // stop() was called from inside this tick
        if self.halted.load(Ordering::Acquire) {
            *slot = None;
            *self.published.lock() = None;
            return;
        }

        if control == FrameControl::Finish {
            self.halted.store(true, Ordering::Release);
            self.detach();
            *slot = None;
            *self.published.lock() = None;
            *self.status.lock() = SchedulerStatus::Idle;
            info!("frame scheduler finished");
            return;
        }

        *self.published.lock() = Some(running.state.clone());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "work callback panicked".to_string()
    }
}

/// An idle scheduler, ready to start
pub struct AdaptiveFrameScheduler {
    options: SchedulerOptions,
}

impl AdaptiveFrameScheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self { options }
    }

    /// Register with `tick_source` and start pacing `work`
    pub fn start<F>(self, work: F, tick_source: Arc<dyn TickSource>) -> SchedulerHandle
    where
        F: FnMut(f64) -> Result<FrameControl> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            options: self.options,
            tick_source: Arc::clone(&tick_source),
            halted: AtomicBool::new(false),
            status: Mutex::new(SchedulerStatus::Running),
            running: Mutex::new(None),
            published: Mutex::new(None),
            registration: Mutex::new(None),
            ticking_thread: Mutex::new(None),
        });

        let config = shared.current_config();
        let pacing = Pacing::from_config(&config);
        let state =
            SchedulerState::new(pacing.frame_time_ms, shared.options.settings.fps_history);
        *shared.published.lock() = Some(state.clone());
        *shared.running.lock() = Some(Running {
            state,
            work: Box::new(work),
            pacing,
            seen_override_generation: shared
                .options
                .config_store
                .as_ref()
                .map_or(0, |store| store.override_generation()),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let registration = tick_source.register(Arc::new(move |timestamp_ms| {
            if let Some(shared) = weak.upgrade() {
                shared.on_tick(timestamp_ms);
            }
        }));
        *shared.registration.lock() = Some(registration);

        info!(
            target_fps = config.target_fps,
            quality = %config.quality_level,
            "frame scheduler started"
        );
        SchedulerHandle { shared }
    }
}

/// Controls a started scheduler. Dropping the handle stops it.
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Stop the scheduler. Once this returns no further work runs. Calling it
    /// again is a no-op.
    pub fn stop(&self) {
        if self.shared.halted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.detach();
        *self.shared.status.lock() = SchedulerStatus::Cancelled;

        let inside_tick = *self.shared.ticking_thread.lock() == Some(thread::current().id());
        if !inside_tick {
            // Waits out a tick already in flight on another thread
            *self.shared.running.lock() = None;
            *self.shared.published.lock() = None;
        }
        info!("frame scheduler stopped");
    }

    pub fn status(&self) -> SchedulerStatus {
        *self.shared.status.lock()
    }

    pub fn is_running(&self) -> bool {
        self.status() == SchedulerStatus::Running
    }

    /// State after the latest tick; `None` once stopped or finished
    pub fn state(&self) -> Option<SchedulerState> {
        self.shared.published.lock().clone()
    }

    pub fn measured_fps(&self) -> Option<f64> {
        self.state().map(|state| state.measured_fps)
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick_source::ManualTickSource;

    fn settings() -> SchedulerSettings {
        SchedulerSettings::default()
    }

    #[test]
    fn test_first_tick_is_baseline() {
        let mut state = SchedulerState::new(40.0, 10);
        let outcome = state.advance(500.0, false, &settings());
        assert_eq!(outcome.decision, TickDecision::Baseline);
        assert_eq!(state.last_tick_timestamp, Some(500.0));
        assert_eq!(state.accumulated_time_ms, 0.0);
        assert_eq!(state.skipped_frame_count, 0);
    }

    #[test]
    fn test_remainder_is_carried() {
        let mut state = SchedulerState::new(40.0, 10);
        state.advance(0.0, false, &settings());
        assert_eq!(state.advance(30.0, false, &settings()).decision, TickDecision::Skip);
        assert_eq!(
            state.advance(50.0, false, &settings()).decision,
            TickDecision::Run { delta_ms: 20.0 }
        );
        assert_eq!(state.accumulated_time_ms, 10.0);
        assert_eq!(state.skipped_frame_count, 1);
    }

    #[test]
    fn test_backwards_timestamp_rebases() {
        let mut state = SchedulerState::new(40.0, 10);
        state.advance(100.0, false, &settings());
        assert_eq!(state.advance(90.0, false, &settings()).decision, TickDecision::Rebased);
        assert_eq!(state.last_tick_timestamp, Some(90.0));
        assert_eq!(state.accumulated_time_ms, 0.0);
    }

    #[test]
    fn test_stall_backlog_is_carried() {
        let mut state = SchedulerState::new(40.0, 10);
        state.advance(0.0, false, &settings());
        // One long tick then two short ones still add up to three frames
        for ts in [118.0, 119.0, 120.0] {
            assert!(matches!(
                state.advance(ts, false, &settings()).decision,
                TickDecision::Run { .. }
            ));
        }
        assert_eq!(state.executed_frame_count, 3);
        assert_eq!(state.accumulated_time_ms, 0.0);
    }

    #[test]
    fn test_backlog_cap_when_configured() {
        let capped = SchedulerSettings {
            max_backlog_frames: 2.0,
            ..SchedulerSettings::default()
        };
        let mut state = SchedulerState::new(40.0, 10);
        state.advance(0.0, false, &capped);
        state.advance(10_000.0, false, &capped);
        // Capped at two frames, one consumed by the run
        assert_eq!(state.accumulated_time_ms, 40.0);
    }

    #[test]
    fn test_window_closes_after_one_second() {
        let mut state = SchedulerState::new(40.0, 10);
        state.advance(0.0, false, &settings());
        let mut closed = None;
        for i in 1..=25 {
            let outcome = state.advance(i as f64 * 40.0, false, &settings());
            if outcome.window_fps.is_some() {
                closed = outcome.window_fps;
            }
        }
        assert_eq!(closed, Some(25.0));
        assert_eq!(state.fps_history.len(), 1);
        assert_eq!(state.frame_count_in_window, 0);
        assert_eq!(state.window_elapsed_ms, 0.0);
    }

    #[test]
    fn test_fps_history_is_bounded() {
        let mut state = SchedulerState::new(40.0, 3);
        state.advance(0.0, false, &settings());
        for i in 1..=10 {
            state.advance(i as f64 * 1000.0, false, &settings());
        }
        assert_eq!(state.fps_history.len(), 3);
    }

    #[test]
    fn test_always_run_ignores_budget() {
        let mut state = SchedulerState::new(40.0, 10);
        state.advance(0.0, true, &settings());
        assert!(matches!(
            state.advance(5.0, true, &settings()).decision,
            TickDecision::Run { .. }
        ));
        assert_eq!(state.skipped_frame_count, 0);
    }

    #[test]
    fn test_work_error_does_not_stop_loop() {
        let source = Arc::new(ManualTickSource::new());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let options = SchedulerOptions::default()
            .with_target_fps(25)
            .on_error(move |err| sink.lock().push(err.clone()));

        let mut calls = 0;
        let handle = AdaptiveFrameScheduler::new(options).start(
            move |_| {
                calls += 1;
                match calls {
                    1 => anyhow::bail!("first frame failed"),
                    2 => panic!("second frame panicked"),
                    _ => Ok(FrameControl::Continue),
                }
            },
            source.clone(),
        );

        source.tick_all(&[0.0, 40.0, 80.0, 120.0]);
        let state = handle.state().unwrap();
        assert_eq!(state.executed_frame_count, 3);

        let errors = errors.lock();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].failure, TickFailure::Failed("first frame failed".to_string()));
        assert_eq!(
            errors[1].failure,
            TickFailure::Panicked("second frame panicked".to_string())
        );
        assert!(handle.is_running());
    }

    #[test]
    fn test_finish_goes_idle() {
        let source = Arc::new(ManualTickSource::new());
        let handle = AdaptiveFrameScheduler::new(SchedulerOptions::default().with_target_fps(25))
            .start(|_| Ok(FrameControl::Finish), source.clone());

        source.tick_all(&[0.0, 40.0]);
        assert_eq!(handle.status(), SchedulerStatus::Idle);
        assert!(handle.state().is_none());
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let source = Arc::new(ManualTickSource::new());
        let handle = AdaptiveFrameScheduler::new(SchedulerOptions::default())
            .start(|_| Ok(FrameControl::Continue), source.clone());
        handle.stop();
        handle.stop();
        assert_eq!(handle.status(), SchedulerStatus::Cancelled);
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn test_stop_from_inside_work() {
        let source = Arc::new(ManualTickSource::new());
        let slot: Arc<Mutex<Option<Arc<SchedulerHandle>>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        let handle = Arc::new(
            AdaptiveFrameScheduler::new(SchedulerOptions::default().with_target_fps(25)).start(
                move |_| {
                    *counter.lock() += 1;
                    if let Some(handle) = inner.lock().as_ref() {
                        handle.stop();
                    }
                    Ok(FrameControl::Continue)
                },
                source.clone(),
            ),
        );
        *slot.lock() = Some(Arc::clone(&handle));

        source.tick_all(&[0.0, 40.0, 80.0, 120.0]);
        assert_eq!(*calls.lock(), 1);
        assert_eq!(handle.status(), SchedulerStatus::Cancelled);
        assert!(handle.state().is_none());
        slot.lock().take();
    }
}
