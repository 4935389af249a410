use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::monotonic_ns;
use crate::engine::CorrelationEngine;

/// Timer-driven staleness sweeps on a dedicated thread.
///
/// Requests whose terminal phase never fires (crashed daemon, dropped
/// hook) would otherwise sit in the table forever; the sweeper runs
/// [`CorrelationEngine::sweep`] every `interval`, independent of mark
/// traffic. Dropping the sweeper stops and joins the thread.
pub struct Sweeper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn(engine: Arc<CorrelationEngine>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = thread::spawn(move || {
            while !thread_stop.load(Ordering::Relaxed) {
                thread::park_timeout(interval);
                if thread_stop.load(Ordering::Relaxed) {
                    break;
                }
                engine.sweep(monotonic_ns());
            }
        });
        Sweeper {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the sweep thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
