//! Logging setup
//!
//! Structured logging through `tracing`. The library only emits events; the
//! host decides whether to install a subscriber.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogLevel;

/// Install a console subscriber at the given level.
///
/// `RUST_LOG` takes precedence when set. Returns `false` if a global
/// subscriber was already installed.
pub fn init_logging(level: LogLevel) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

/// Lets one log line through per key per interval.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last_emitted: Mutex<HashMap<String, Instant>>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if a log for `key` should be emitted at `now`.
    pub fn should_log(&self, key: &str, now: Instant) -> bool {
        let mut last = self.last_emitted.lock();
        match last.get(key) {
            Some(&at) if now.saturating_duration_since(at) < self.interval => false,
            _ => {
                last.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget keys whose interval has elapsed; returns how many were dropped
    pub fn prune(&self, now: Instant) -> usize {
        let mut last = self.last_emitted.lock();
        let before = last.len();
        last.retain(|_, at| now.saturating_duration_since(*at) < self.interval);
        before - last.len()
    }

    pub fn len(&self) -> usize {
        self.last_emitted.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.lock().is_empty()
    }

    pub fn clear(&self) {
        self.last_emitted.lock().clear();
    }
}
