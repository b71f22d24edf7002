//! Frame tick sources
//!
//! The scheduler never drives itself; a host-provided tick source calls it
//! once per frame with a millisecond timestamp. Two sources ship here: a
//! manual one for tests and deterministic hosts, and a fixed-interval timer.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use tracing::debug;

/// Called with the frame timestamp in milliseconds
pub type TickCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Identifies one registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickRegistration(u64);

/// An external per-frame clock
pub trait TickSource: Send + Sync {
    fn register(&self, callback: TickCallback) -> TickRegistration;

    /// Unregistering an unknown registration is a no-op
    fn unregister(&self, registration: TickRegistration);
}

/// Callback list shared by the bundled sources
#[derive(Default)]
struct TickRegistry {
    next_id: u64,
    callbacks: Vec<(u64, TickCallback)>,
}

impl TickRegistry {
    fn register(&mut self, callback: TickCallback) -> TickRegistration {
        let id = self.next_id;
        self.next_id += 1;
        self.callbacks.push((id, callback));
        TickRegistration(id)
    }

    fn unregister(&mut self, registration: TickRegistration) {
        self.callbacks.retain(|(id, _)| *id != registration.0);
    }

    /// Callbacks are cloned out so none run under the registry lock
    fn snapshot(&self) -> Vec<TickCallback> {
        self.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

/// A tick source advanced by hand
#[derive(Default, Clone)]
pub struct ManualTickSource {
    registry: Arc<Mutex<TickRegistry>>,
}

impl ManualTickSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one tick to every registered callback
    pub fn tick(&self, timestamp_ms: f64) {
        let callbacks = self.registry.lock().snapshot();
        for callback in callbacks {
            callback(timestamp_ms);
        }
    }

    /// Deliver a sequence of ticks in order
    pub fn tick_all(&self, timestamps_ms: &[f64]) {
        for &timestamp in timestamps_ms {
            self.tick(timestamp);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().callbacks.len()
    }
}

impl TickSource for ManualTickSource {
    fn register(&self, callback: TickCallback) -> TickRegistration {
        self.registry.lock().register(callback)
    }

    fn unregister(&self, registration: TickRegistration) {
        self.registry.lock().unregister(registration);
    }
}

/// A fixed-rate timer ticking on its own thread
pub struct IntervalTickSource {
    registry: Arc<Mutex<TickRegistry>>,
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl IntervalTickSource {
    pub fn start(interval: Duration) -> std::io::Result<Self> {
        let registry = Arc::new(Mutex::new(TickRegistry::default()));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let thread_registry = Arc::clone(&registry);

        let thread = thread::Builder::new()
            .name("framepace-ticks".to_string())
            .spawn(move || {
                let origin = Instant::now();
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let timestamp = origin.elapsed().as_secs_f64() * 1000.0;
                            let callbacks = thread_registry.lock().snapshot();
                            for callback in callbacks {
                                callback(timestamp);
                            }
                        }
                    }
                }
            })?;

        debug!(interval_ms = interval.as_millis() as u64, "interval tick source started");
        Ok(Self {
            registry,
            shutdown_tx,
            thread: Some(thread),
        })
    }

    /// From a frame rate, e.g. 60 for a display refresh
    pub fn with_rate(hz: u32) -> std::io::Result<Self> {
        Self::start(Duration::from_secs_f64(1.0 / f64::from(hz.max(1))))
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.shutdown_tx.send(());
            let _ = handle.join();
        }
    }
}

impl TickSource for IntervalTickSource {
    fn register(&self, callback: TickCallback) -> TickRegistration {
        self.registry.lock().register(callback)
    }

    fn unregister(&self, registration: TickRegistration) {
        self.registry.lock().unregister(registration);
    }
}

impl Drop for IntervalTickSource {
    fn drop(&mut self) {
        self.stop();
    }
}
