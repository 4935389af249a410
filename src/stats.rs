use std::fmt::Write as _;
use std::sync::Mutex;

use anyhow::Result;

use crate::config::LifecycleConfig;
use crate::event::{CompletedEvent, Completion};
use crate::listener::EventListener;

#[derive(Clone, Copy)]
struct DurationStat {
    count: u64,
    min_ns: u64,
    max_ns: u64,
    sum_ns: u64,
}

impl Default for DurationStat {
    fn default() -> Self {
        DurationStat {
            count: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
        }
    }
}

impl DurationStat {
    fn record(&mut self, ns: u64) {
        self.count += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns += ns;
    }
}

struct SummaryInner {
    completed: u64,
    evicted: u64,
    durations: Vec<DurationStat>,
}

/// Aggregating listener: per-duration count/min/max/mean plus
/// completed/evicted totals, reported as a block at shutdown.
///
/// Absent durations are skipped entirely rather than counted as zero, so
/// the averages only cover requests where both endpoints were observed.
pub struct LatencySummary {
    names: Vec<String>,
    inner: Mutex<SummaryInner>,
}

impl LatencySummary {
    pub fn new(config: &LifecycleConfig) -> Self {
        let names: Vec<String> = config.durations().iter().map(|d| d.name.clone()).collect();
        let durations = vec![DurationStat::default(); names.len()];
        LatencySummary {
            names,
            inner: Mutex::new(SummaryInner {
                completed: 0,
                evicted: 0,
                durations,
            }),
        }
    }

    /// Render the breakdown block. Durations are reported in microseconds.
    pub fn report(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let mut out = String::new();
        let _ = writeln!(out, "=================================");
        let _ = writeln!(
            out,
            "completed: {}  evicted: {}",
            inner.completed, inner.evicted
        );
        for (name, stat) in self.names.iter().zip(inner.durations.iter()) {
            if stat.count == 0 {
                let _ = writeln!(out, "{:<12} no samples", name);
                continue;
            }
            let avg = stat.sum_ns as f64 / stat.count as f64 / 1000.0;
            let _ = writeln!(
                out,
                "{:<12} count={} min={:.1}us max={:.1}us avg={:.1}us",
                name,
                stat.count,
                stat.min_ns as f64 / 1000.0,
                stat.max_ns as f64 / 1000.0,
                avg
            );
        }
        let _ = write!(out, "=================================");
        out
    }
}

impl EventListener for LatencySummary {
    fn completed(&self, event: &CompletedEvent) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match event.completion() {
            Completion::Completed => inner.completed += 1,
            Completion::Evicted => inner.evicted += 1,
        }
        for (idx, stat) in inner.durations.iter_mut().enumerate() {
            if let Some(ns) = event.duration(idx) {
                stat.record(ns);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CorrelationEngine;
    use crate::payload::Payload;
    use std::sync::Arc;

    fn fuse_config() -> LifecycleConfig {
        let mut config =
            LifecycleConfig::new(&["queued", "received", "sent", "done"], "done").unwrap();
        config.add_duration("queuing", "queued", "received").unwrap();
        config.add_duration("daemon", "received", "sent").unwrap();
        config
    }

    #[test]
    fn test_summary_counts_and_bounds() {
        let config = fuse_config();
        let summary = Arc::new(LatencySummary::new(&config));
        let engine = CorrelationEngine::new(config, Box::new(summary.clone()));
        let queued = engine.config().phase_id("queued").unwrap();
        let received = engine.config().phase_id("received").unwrap();
        let done = engine.config().phase_id("done").unwrap();

        engine.mark(1, queued, 1000, Payload::new()).unwrap();
        engine.mark(1, received, 3000, Payload::new()).unwrap();
        engine.mark(1, done, 4000, Payload::new()).unwrap();

        engine.mark(2, queued, 1000, Payload::new()).unwrap();
        engine.mark(2, received, 7000, Payload::new()).unwrap();
        engine.mark(2, done, 8000, Payload::new()).unwrap();

        let report = summary.report();
        assert!(report.contains("completed: 2  evicted: 0"));
        assert!(report.contains("count=2 min=2.0us max=6.0us avg=4.0us"));
        // sent never fired: daemon has no samples, not zeros.
        assert!(report.contains("no samples"));
    }
}
