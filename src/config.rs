use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// Maximum number of phases per lifecycle. Observed-phase bookkeeping is a
/// u64 bitmask, so the phase list cannot exceed 64 entries.
pub const MAX_PHASES: usize = 64;

/// Index of a phase within a [`LifecycleConfig`] phase list.
///
/// PhaseIds are only meaningful for the configuration that produced them;
/// resolve them with [`LifecycleConfig::phase_id`] and don't mix ids across
/// engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhaseId(pub(crate) u8);

impl PhaseId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A derived interval between two configured phases, computed at emission
/// time as `timestamp(end) - timestamp(start)`.
#[derive(Debug, Clone)]
pub struct DurationPair {
    pub name: String,
    pub start: PhaseId,
    pub end: PhaseId,
}

/// The request lifecycle an engine correlates against: the ordered phase
/// list, which phase is terminal, the derived durations to compute at
/// emission, and the in-flight table bounds.
///
/// Immutable once handed to an engine.
#[derive(Debug)]
pub struct LifecycleConfig {
    phases: Vec<String>,
    terminal: PhaseId,
    durations: Vec<DurationPair>,
    max_in_flight: Option<usize>,
    max_age: Option<Duration>,
}

// The JSON config file format is
// {
//   "phases": ["queued", "received", "sent", "done"],
//   "terminal": "done",
//   "durations": [
//     {
//       "name": "queuing",
//       "start": "queued",
//       "end": "received"
//     }
//   ],
//   "max_in_flight": 65536,
//   "max_age_ms": 5000
// }
//
// Phase names cannot repeat. Every duration endpoint must name a configured
// phase; duration names cannot repeat either.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct LifecycleJSONConfig {
    phases: Vec<String>,
    terminal: String,
    durations: Option<Vec<LifecycleJSONDuration>>,
    max_in_flight: Option<usize>,
    max_age_ms: Option<u64>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct LifecycleJSONDuration {
    name: String,
    start: String,
    end: String,
}

impl LifecycleConfig {
    /// Create a configuration from a phase list and the name of the
    /// terminal phase. Durations and bounds are added separately.
    pub fn new(phases: &[&str], terminal: &str) -> Result<Self> {
        if phases.is_empty() {
            return Err(anyhow::anyhow!("phase list cannot be empty"));
        }
        if phases.len() > MAX_PHASES {
            return Err(anyhow::anyhow!(
                "too many phases: {} (max {})",
                phases.len(),
                MAX_PHASES
            ));
        }
        let mut names = Vec::with_capacity(phases.len());
        for name in phases {
            if names.iter().any(|n: &String| n == name) {
                return Err(anyhow::anyhow!("phase {} already exists", name));
            }
            names.push(name.to_string());
        }
        let terminal_idx = names
            .iter()
            .position(|n| n == terminal)
            .ok_or_else(|| anyhow::anyhow!("terminal phase {} is not in the phase list", terminal))?;
        Ok(LifecycleConfig {
            phases: names,
            terminal: PhaseId(terminal_idx as u8),
            durations: Vec::new(),
            max_in_flight: None,
            max_age: None,
        })
    }

    /// Register a derived duration between two configured phases.
    pub fn add_duration(&mut self, name: &str, start: &str, end: &str) -> Result<()> {
        if self.durations.iter().any(|d| d.name == name) {
            return Err(anyhow::anyhow!("duration {} already exists", name));
        }
        let start = self
            .phase_id(start)
            .ok_or_else(|| anyhow::anyhow!("start phase {} does not exist", start))?;
        let end = self
            .phase_id(end)
            .ok_or_else(|| anyhow::anyhow!("end phase {} does not exist", end))?;
        self.durations.push(DurationPair {
            name: name.to_string(),
            start,
            end,
        });
        Ok(())
    }

    /// Bound the in-flight table to at most `max` entries. Marks that would
    /// create a record beyond the bound are rejected.
    pub fn set_max_in_flight(&mut self, max: usize) -> Result<()> {
        if max == 0 {
            return Err(anyhow::anyhow!("max_in_flight must be nonzero"));
        }
        self.max_in_flight = Some(max);
        Ok(())
    }

    /// Age bound for the staleness sweep. Records whose oldest timestamp is
    /// older than this when a sweep runs are force-retired as evicted.
    pub fn set_max_age(&mut self, max_age: Duration) -> Result<()> {
        if max_age.is_zero() {
            return Err(anyhow::anyhow!("max_age must be nonzero"));
        }
        self.max_age = Some(max_age);
        Ok(())
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(buf: &str) -> Result<Self> {
        let json: LifecycleJSONConfig = serde_json::from_str(buf)?;
        let phases: Vec<&str> = json.phases.iter().map(|s| s.as_str()).collect();
        let mut config = LifecycleConfig::new(&phases, &json.terminal)?;
        for d in json.durations.unwrap_or_default() {
            config.add_duration(&d.name, &d.start, &d.end)?;
        }
        if let Some(max) = json.max_in_flight {
            config.set_max_in_flight(max)?;
        }
        if let Some(ms) = json.max_age_ms {
            config.set_max_age(Duration::from_millis(ms))?;
        }
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let buf = fs::read_to_string(path.as_ref())?;
        Self::from_json(&buf)
    }

    pub fn phase_id(&self, name: &str) -> Option<PhaseId> {
        self.phases
            .iter()
            .position(|n| n == name)
            .map(|idx| PhaseId(idx as u8))
    }

    pub fn phase_name(&self, phase: PhaseId) -> &str {
        &self.phases[phase.index()]
    }

    /// Phases as `(id, name)` pairs in configuration order.
    pub fn phases(&self) -> impl Iterator<Item = (PhaseId, &str)> {
        self.phases
            .iter()
            .enumerate()
            .map(|(idx, name)| (PhaseId(idx as u8), name.as_str()))
    }

    pub fn num_phases(&self) -> usize {
        self.phases.len()
    }

    pub fn terminal(&self) -> PhaseId {
        self.terminal
    }

    pub fn durations(&self) -> &[DurationPair] {
        &self.durations
    }

    pub fn max_in_flight(&self) -> Option<usize> {
        self.max_in_flight
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }
}
