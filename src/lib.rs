//! reqlat library - correlation engine for per-request latency breakdowns.
//!
//! Latency tracers observe one logical request from several asynchronous
//! hook points (kprobes, uprobes, tracepoints, userspace markers), each
//! firing on its own thread with its own delay. This library owns the
//! recurring piece those tracers keep reimplementing: stitching the
//! per-hook `(key, phase, timestamp)` marks into one completed record with
//! derived interval durations, robust to out-of-order arrival, duplicate
//! firings, dropped hooks, and key reuse.
//!
//! # Modules
//!
//! - [`engine`] - the in-flight table: mark, emit, retire, sweep
//! - [`config`] - phase lists, terminal designation, derived durations, bounds
//! - [`payload`] - caller-defined fields carried on each record
//! - [`event`] - completed/evicted records handed to listeners
//! - [`listener`] - downstream consumers (console, CSV, channel handoff)
//! - [`stats`] - latency summary aggregation
//! - [`sweeper`] - background staleness sweeps
//! - [`clock`] - monotonic clock helper
//!
//! # Example
//!
//! ```
//! use std::sync::mpsc::channel;
//! use reqlat::{ChannelListener, CorrelationEngine, LifecycleConfig, Payload};
//!
//! let mut config =
//!     LifecycleConfig::new(&["queued", "received", "sent", "done"], "done").unwrap();
//! config.add_duration("queuing", "queued", "received").unwrap();
//!
//! let (tx, rx) = channel();
//! let engine = CorrelationEngine::new(config, Box::new(ChannelListener::new(tx)));
//!
//! let queued = engine.config().phase_id("queued").unwrap();
//! let received = engine.config().phase_id("received").unwrap();
//! let done = engine.config().phase_id("done").unwrap();
//!
//! engine.mark(42, queued, 1_000, Payload::new()).unwrap();
//! engine.mark(42, received, 1_500, Payload::new()).unwrap();
//! engine.mark(42, done, 4_200, Payload::new()).unwrap();
//!
//! let event = rx.recv().unwrap();
//! assert_eq!(event.duration_named("queuing"), Some(500));
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod event;
pub mod listener;
pub mod payload;
pub mod stats;
pub mod sweeper;

// Re-export for convenience
pub use config::{DurationPair, LifecycleConfig, PhaseId, MAX_PHASES};
pub use engine::{CorrelationEngine, MarkError, MarkOutcome};
pub use event::{CompletedEvent, Completion};
pub use listener::{
    ChannelListener, ConsoleListener, CsvListener, EventListener, FanoutListener,
};
pub use payload::{FieldValue, Payload};
pub use stats::LatencySummary;
pub use sweeper::Sweeper;
