//! Idle sweep thread
//!
//! Periodically prunes idle components from the collector on a dedicated
//! thread. Runs independently of the frame scheduler.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, trace};

use crate::metrics::MetricsCollector;

/// Handle to the running sweep thread
pub struct SweeperHandle {
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweep thread and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.shutdown_tx.send(());
            let _ = handle.join();
            debug!("idle sweeper stopped");
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the sweep thread for `collector`
pub fn spawn_sweeper(
    collector: Arc<MetricsCollector>,
    interval: Duration,
) -> std::io::Result<SweeperHandle> {
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

    let thread = thread::Builder::new()
        .name("framepace-sweeper".to_string())
        .spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(shutdown_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        let report = collector.sweep_idle(Instant::now());
                        trace!(pruned = report.pruned, remaining = report.remaining, "sweep tick");
                    }
                }
            }
        })?;

    debug!(interval_ms = interval.as_millis() as u64, "idle sweeper started");
    Ok(SweeperHandle {
        shutdown_tx,
        thread: Some(thread),
    })
}
