use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::{LifecycleConfig, PhaseId};
use crate::event::{CompletedEvent, Completion};
use crate::listener::EventListener;
use crate::payload::Payload;

/// Rejection at the `mark` boundary. All three variants indicate a
/// collaborator bug or saturation, never a condition the engine recovers
/// from on the caller's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkError {
    /// Key value 0 is reserved by callers to mean "unknown".
    ZeroKey,
    /// The phase id does not belong to this engine's configuration.
    UnknownPhase { index: usize },
    /// The table is at its hard capacity and the mark would have created a
    /// new record. Existing in-flight records are unaffected.
    TableFull { max_in_flight: usize },
}

impl fmt::Display for MarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkError::ZeroKey => write!(f, "key 0 is reserved"),
            MarkError::UnknownPhase { index } => {
                write!(f, "phase index {} is not configured", index)
            }
            MarkError::TableFull { max_in_flight } => {
                write!(f, "in-flight table full ({} records)", max_in_flight)
            }
        }
    }
}

impl std::error::Error for MarkError {}

/// What a successful `mark` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The record is (still) in flight.
    InFlight,
    /// The mark was terminal: one completed event was emitted and the key
    /// retired.
    Completed,
}

// Per-key accumulator. Owned by the table; the shard lock serializes every
// read-modify-write for the same key.
struct InFlightRecord {
    timestamps: Vec<Option<u64>>,
    seen: u64,
    payload: Payload,
    // Oldest observed timestamp, for the staleness sweep.
    first_mark_ns: u64,
}

impl InFlightRecord {
    fn new(num_phases: usize, ts_ns: u64) -> Self {
        InFlightRecord {
            timestamps: vec![None; num_phases],
            seen: 0,
            payload: Payload::new(),
            first_mark_ns: ts_ns,
        }
    }

    fn observe(&mut self, phase: PhaseId, ts_ns: u64, patch: Payload) {
        let bit = 1u64 << phase.index();
        // First write wins on timestamps; duplicate hook firings are a
        // no-op, not an error.
        if self.seen & bit == 0 {
            self.seen |= bit;
            self.timestamps[phase.index()] = Some(ts_ns);
        }
        self.payload.merge(patch);
        if ts_ns < self.first_mark_ns {
            self.first_mark_ns = ts_ns;
        }
    }
}

/// Correlates asynchronous phase marks into completed request records.
///
/// Phase arrivals for the same key are serialized by the table's shard
/// locks; arrivals for different keys stay concurrent. `mark` never blocks
/// on I/O: the listener is invoked synchronously on the marking thread and
/// is responsible for handing off any blocking work.
pub struct CorrelationEngine {
    config: Arc<LifecycleConfig>,
    listener: Box<dyn EventListener + Send + Sync>,
    table: DashMap<u64, InFlightRecord>,
    // Kept alongside the table so the capacity check never takes a second
    // shard lock while one is already held.
    live: AtomicUsize,
}

impl CorrelationEngine {
    pub fn new(config: LifecycleConfig, listener: Box<dyn EventListener + Send + Sync>) -> Self {
        CorrelationEngine {
            config: Arc::new(config),
            listener,
            table: DashMap::new(),
            live: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Number of records currently in flight.
    pub fn in_flight(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Whether a record exists for `key`.
    pub fn contains(&self, key: u64) -> bool {
        self.table.contains_key(&key)
    }

    /// Record that `key` reached `phase` at `ts_ns`, merging `patch` into
    /// the record's payload.
    ///
    /// Phases may arrive in any order; the first mark for a key creates its
    /// record regardless of logical position in the lifecycle. Marking the
    /// terminal phase emits the completed event and retires the key, so a
    /// later mark under the same key value starts a fresh record.
    pub fn mark(
        &self,
        key: u64,
        phase: PhaseId,
        ts_ns: u64,
        patch: Payload,
    ) -> Result<MarkOutcome, MarkError> {
        if key == 0 {
            return Err(MarkError::ZeroKey);
        }
        if phase.index() >= self.config.num_phases() {
            return Err(MarkError::UnknownPhase {
                index: phase.index(),
            });
        }
        let terminal = phase == self.config.terminal();

        match self.table.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().observe(phase, ts_ns, patch);
                if terminal {
                    // remove() consumes the entry guard, releasing the
                    // shard lock before the listener runs.
                    let record = entry.remove();
                    self.live.fetch_sub(1, Ordering::Relaxed);
                    self.emit(key, record, Completion::Completed);
                    return Ok(MarkOutcome::Completed);
                }
                Ok(MarkOutcome::InFlight)
            }
            Entry::Vacant(entry) => {
                let mut record = InFlightRecord::new(self.config.num_phases(), ts_ns);
                record.observe(phase, ts_ns, patch);
                if terminal {
                    // Terminal as the first-seen phase: nothing to stitch,
                    // emit immediately without ever inserting.
                    drop(entry);
                    self.emit(key, record, Completion::Completed);
                    return Ok(MarkOutcome::Completed);
                }
                if let Some(max) = self.config.max_in_flight() {
                    let prev = self.live.fetch_add(1, Ordering::Relaxed);
                    if prev >= max {
                        self.live.fetch_sub(1, Ordering::Relaxed);
                        return Err(MarkError::TableFull { max_in_flight: max });
                    }
                } else {
                    self.live.fetch_add(1, Ordering::Relaxed);
                }
                entry.insert(record);
                Ok(MarkOutcome::InFlight)
            }
        }
    }

    /// Force-retire every record whose oldest timestamp is older than the
    /// configured staleness bound, emitting each as an evicted event.
    /// Returns the number of records evicted. A no-op unless
    /// [`LifecycleConfig::set_max_age`] was configured.
    ///
    /// `now_ns` is caller-supplied so the engine stays clock-source
    /// agnostic; it must come from the same clock as the mark timestamps.
    pub fn sweep(&self, now_ns: u64) -> usize {
        let Some(max_age) = self.config.max_age() else {
            return 0;
        };
        let cutoff = now_ns.saturating_sub(max_age.as_nanos() as u64);

        let stale: Vec<u64> = self
            .table
            .iter()
            .filter(|r| r.value().first_mark_ns < cutoff)
            .map(|r| *r.key())
            .collect();

        let mut evicted = 0;
        for key in stale {
            // Re-check under the shard lock so a concurrent legitimate
            // terminal mark wins the race. If the key completed and was
            // reused in the meantime, the fresh record's timestamps keep it
            // out of the cutoff.
            if let Some((key, record)) = self
                .table
                .remove_if(&key, |_, record| record.first_mark_ns < cutoff)
            {
                self.live.fetch_sub(1, Ordering::Relaxed);
                self.emit(key, record, Completion::Evicted);
                evicted += 1;
            }
        }
        evicted
    }

    fn emit(&self, key: u64, record: InFlightRecord, completion: Completion) {
        let mut durations = Vec::with_capacity(self.config.durations().len());
        for pair in self.config.durations() {
            let start = record.timestamps[pair.start.index()];
            let end = record.timestamps[pair.end.index()];
            durations.push(match (start, end) {
                (Some(a), Some(b)) if b >= a => Some(b - a),
                // Missing or inverted endpoints: absent, never negative.
                _ => None,
            });
        }
        let event = CompletedEvent::new(
            self.config.clone(),
            key,
            completion,
            record.timestamps,
            durations,
            record.payload,
        );
        if let Err(e) = self.listener.completed(&event) {
            // The key is already retired; a listener failure must not leak
            // the record or un-retire it.
            eprintln!("Warning: listener failed for key {}: {e}", key);
        }
    }
}
