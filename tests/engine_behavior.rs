//! Integration tests for the correlation engine's public API.
//!
//! These exercise full request lifecycles through an engine the way a
//! tracer's event loop would: concurrent producers, out-of-order phase
//! arrival, key reuse, and staleness eviction.

use std::collections::HashMap;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqlat::clock::monotonic_ns;
use reqlat::{
    ChannelListener, CompletedEvent, Completion, CorrelationEngine, LifecycleConfig, Payload,
    Sweeper,
};

fn breakdown_config() -> LifecycleConfig {
    let mut config =
        LifecycleConfig::new(&["queued", "received", "sent", "done"], "done").unwrap();
    config.add_duration("queuing", "queued", "received").unwrap();
    config.add_duration("daemon", "received", "sent").unwrap();
    config.add_duration("response", "sent", "done").unwrap();
    config
}

fn channel_engine(
    config: LifecycleConfig,
) -> (Arc<CorrelationEngine>, std::sync::mpsc::Receiver<CompletedEvent>) {
    let (tx, rx) = channel();
    let engine = Arc::new(CorrelationEngine::new(
        config,
        Box::new(ChannelListener::new(tx)),
    ));
    (engine, rx)
}

#[test]
fn test_end_to_end_breakdown() {
    let (engine, rx) = channel_engine(breakdown_config());
    let queued = engine.config().phase_id("queued").unwrap();
    let received = engine.config().phase_id("received").unwrap();
    let sent = engine.config().phase_id("sent").unwrap();
    let done = engine.config().phase_id("done").unwrap();

    engine.mark(42, queued, 1000, Payload::new()).unwrap();
    engine.mark(42, received, 1500, Payload::new()).unwrap();
    engine.mark(42, sent, 4000, Payload::new()).unwrap();
    engine.mark(42, done, 4200, Payload::new()).unwrap();

    let event = rx.recv().unwrap();
    assert_eq!(event.key(), 42);
    assert_eq!(event.completion(), Completion::Completed);
    assert_eq!(event.duration_named("queuing"), Some(500));
    assert_eq!(event.duration_named("daemon"), Some(2500));
    assert_eq!(event.duration_named("response"), Some(200));
    assert!(!engine.contains(42));
}

#[test]
fn test_concurrent_distinct_keys_never_interfere() {
    const PRODUCERS: u64 = 8;
    const REQUESTS: u64 = 200;

    let (engine, rx) = channel_engine(breakdown_config());
    let queued = engine.config().phase_id("queued").unwrap();
    let received = engine.config().phase_id("received").unwrap();
    let sent = engine.config().phase_id("sent").unwrap();
    let done = engine.config().phase_id("done").unwrap();

    let mut handles = vec![];
    for producer in 0..PRODUCERS {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            for i in 0..REQUESTS {
                let key = ((producer + 1) << 32) | (i + 1);
                // Per-key deltas derived from the key so each completed
                // event can be checked independently of interleaving.
                let base = key * 10;
                engine.mark(key, queued, base, Payload::new()).unwrap();
                engine.mark(key, received, base + 1, Payload::new()).unwrap();
                engine.mark(key, sent, base + 3, Payload::new()).unwrap();
                engine.mark(key, done, base + 7, Payload::new()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut seen: HashMap<u64, u64> = HashMap::new();
    for _ in 0..(PRODUCERS * REQUESTS) {
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        *seen.entry(event.key()).or_insert(0) += 1;
        assert_eq!(event.duration_named("queuing"), Some(1));
        assert_eq!(event.duration_named("daemon"), Some(2));
        assert_eq!(event.duration_named("response"), Some(4));
    }
    // Exactly one emission per key.
    assert_eq!(seen.len(), (PRODUCERS * REQUESTS) as usize);
    assert!(seen.values().all(|count| *count == 1));
    assert_eq!(engine.in_flight(), 0);
}

#[test]
fn test_key_reuse_starts_fresh_record() {
    let (engine, rx) = channel_engine(breakdown_config());
    let queued = engine.config().phase_id("queued").unwrap();
    let done = engine.config().phase_id("done").unwrap();

    engine.mark(7, queued, 100, Payload::new()).unwrap();
    engine.mark(7, done, 400, Payload::new()).unwrap();
    assert!(!engine.contains(7));

    // The same key value is issued again for a new request; it must share
    // no state with the completed one.
    engine.mark(7, queued, 9000, Payload::new()).unwrap();
    engine.mark(7, done, 9600, Payload::new()).unwrap();

    let first = rx.recv().unwrap();
    let second = rx.recv().unwrap();
    assert_eq!(first.timestamp(queued), Some(100));
    assert_eq!(second.timestamp(queued), Some(9000));
    assert_eq!(first.start_ts(), Some(100));
    assert_eq!(second.start_ts(), Some(9000));
}

#[test]
fn test_sweeper_reclaims_requests_that_never_complete() {
    let mut config = breakdown_config();
    config.set_max_age(Duration::from_millis(20)).unwrap();
    let (engine, rx) = channel_engine(config);
    let queued = engine.config().phase_id("queued").unwrap();
    let done = engine.config().phase_id("done").unwrap();

    // One request completes normally, one leaks.
    engine.mark(1, queued, monotonic_ns(), Payload::new()).unwrap();
    engine.mark(1, done, monotonic_ns(), Payload::new()).unwrap();
    engine.mark(2, queued, monotonic_ns(), Payload::new()).unwrap();

    let sweeper = Sweeper::spawn(engine.clone(), Duration::from_millis(5));

    let completed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(completed.key(), 1);
    assert_eq!(completed.completion(), Completion::Completed);

    let evicted = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    sweeper.stop();
    assert_eq!(evicted.key(), 2);
    assert_eq!(evicted.completion(), Completion::Evicted);
    assert_eq!(evicted.duration_named("queuing"), None);
    assert!(!engine.contains(2));
    assert_eq!(engine.in_flight(), 0);
}
