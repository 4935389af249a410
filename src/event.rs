use std::fmt;
use std::sync::Arc;

use crate::config::{LifecycleConfig, PhaseId};
use crate::payload::Payload;

/// How a record left the in-flight table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The terminal phase fired.
    Completed,
    /// The staleness sweep force-retired the record before its terminal
    /// phase arrived.
    Evicted,
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Completed => write!(f, "completed"),
            Completion::Evicted => write!(f, "evicted"),
        }
    }
}

/// One retired request: identity, every observed phase timestamp, the
/// caller payload, and the configured derived durations.
///
/// Durations are `Some(end - start)` only when both endpoints were observed
/// and the end is not earlier than the start; otherwise `None`. A `Some(0)`
/// is a legitimate fast-path measurement, distinct from `None`.
#[derive(Debug, Clone)]
pub struct CompletedEvent {
    config: Arc<LifecycleConfig>,
    key: u64,
    completion: Completion,
    timestamps: Vec<Option<u64>>,
    durations: Vec<Option<u64>>,
    payload: Payload,
}

impl CompletedEvent {
    pub(crate) fn new(
        config: Arc<LifecycleConfig>,
        key: u64,
        completion: Completion,
        timestamps: Vec<Option<u64>>,
        durations: Vec<Option<u64>>,
        payload: Payload,
    ) -> Self {
        CompletedEvent {
            config,
            key,
            completion,
            timestamps,
            durations,
            payload,
        }
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn completion(&self) -> Completion {
        self.completion
    }

    /// The raw timestamp recorded for `phase`, if that phase was observed.
    pub fn timestamp(&self, phase: PhaseId) -> Option<u64> {
        self.timestamps.get(phase.index()).copied().flatten()
    }

    /// The earliest observed timestamp across all phases.
    pub fn start_ts(&self) -> Option<u64> {
        self.timestamps.iter().flatten().copied().min()
    }

    /// The derived duration at `index` in configuration order.
    pub fn duration(&self, index: usize) -> Option<u64> {
        self.durations.get(index).copied().flatten()
    }

    /// Look up a derived duration by its configured name. Returns `None`
    /// both for unknown names and for absent durations.
    pub fn duration_named(&self, name: &str) -> Option<u64> {
        self.config
            .durations()
            .iter()
            .position(|d| d.name == name)
            .and_then(|idx| self.duration(idx))
    }

    /// Iterate configured durations as `(name, value)` pairs.
    pub fn durations(&self) -> impl Iterator<Item = (&str, Option<u64>)> {
        self.config
            .durations()
            .iter()
            .zip(self.durations.iter())
            .map(|(pair, value)| (pair.name.as_str(), *value))
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }
}

impl fmt::Display for CompletedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] key={}", self.completion, self.key)?;
        for (name, value) in self.durations() {
            match value {
                Some(ns) => write!(f, " {}={}ns", name, ns)?,
                None => write!(f, " {}=-", name)?,
            }
        }
        if !self.payload.is_empty() {
            write!(f, " {}", self.payload)?;
        }
        Ok(())
    }
}
