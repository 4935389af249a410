use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Deserialize;
use workerpool::thunk::{Thunk, ThunkWorker};
use workerpool::Pool;

use reqlat::clock::monotonic_ns;
use reqlat::{
    ConsoleListener, CorrelationEngine, CsvListener, FanoutListener, FieldValue, LatencySummary,
    LifecycleConfig, Payload, PhaseId, Sweeper,
};

/// Drive a correlation engine from recorded or synthetic mark streams.
///
/// Marks are NDJSON lines, one per observed hook firing:
///
/// {"key": 42, "phase": "queued", "ts": 1000, "payload": {"opcode": 15}}
///
/// With no --replay file, marks are read from stdin until EOF or Ctrl-C.
#[derive(Debug, Parser)]
struct Command {
    /// Lifecycle config JSON path; defaults to a FUSE-style
    /// queued/received/sent/done breakdown.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Replay marks from this NDJSON file instead of stdin.
    #[arg(short, long)]
    replay: Option<PathBuf>,
    /// Generate this many synthetic requests instead of reading marks.
    #[arg(long, default_value = "0")]
    synthetic: u64,
    /// Producer threads for synthetic traffic.
    #[arg(long, default_value = "4")]
    producers: usize,
    /// Write completed events to this CSV file.
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Print each completed event as it is emitted.
    #[arg(short, long)]
    verbose: bool,
    /// Staleness sweep interval in milliseconds.
    #[arg(long, default_value = "1000")]
    sweep_interval_ms: u64,
    /// Seed for synthetic traffic timings.
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct MarkLine {
    key: u64,
    phase: String,
    ts: u64,
    #[serde(default)]
    payload: serde_json::Map<String, serde_json::Value>,
}

fn default_lifecycle() -> LifecycleConfig {
    let mut config = LifecycleConfig::new(&["queued", "received", "sent", "done"], "done")
        .expect("default lifecycle is valid");
    config
        .add_duration("queuing", "queued", "received")
        .expect("default lifecycle is valid");
    config
        .add_duration("daemon", "received", "sent")
        .expect("default lifecycle is valid");
    config
        .add_duration("response", "sent", "done")
        .expect("default lifecycle is valid");
    config
        .set_max_in_flight(65536)
        .expect("default lifecycle is valid");
    config
        .set_max_age(Duration::from_secs(5))
        .expect("default lifecycle is valid");
    config
}

fn payload_from_json(fields: &serde_json::Map<String, serde_json::Value>) -> Payload {
    let mut payload = Payload::new();
    for (name, value) in fields {
        if let Some(v) = value.as_u64() {
            payload.set(name, FieldValue::Unsigned(v));
        } else if let Some(v) = value.as_i64() {
            payload.set(name, FieldValue::Signed(v));
        } else if let Some(v) = value.as_str() {
            payload.set(name, FieldValue::Text(v.to_string()));
        } else {
            eprintln!(
                "Warning: skipping payload field {} with unsupported type",
                name
            );
        }
    }
    payload
}

fn replay_marks<R: BufRead>(
    engine: &CorrelationEngine,
    reader: R,
    exiting: Option<Arc<AtomicBool>>,
) -> Result<u64> {
    let mut marks = 0u64;
    for line in reader.lines() {
        if exiting
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mark: MarkLine = match serde_json::from_str(&line) {
            Ok(mark) => mark,
            Err(e) => {
                eprintln!("Warning: skipping malformed mark line: {e}");
                continue;
            }
        };
        let Some(phase) = engine.config().phase_id(&mark.phase) else {
            eprintln!(
                "Warning: unknown phase '{}' for key {}",
                mark.phase, mark.key
            );
            continue;
        };
        match engine.mark(mark.key, phase, mark.ts, payload_from_json(&mark.payload)) {
            Ok(_) => marks += 1,
            Err(e) => eprintln!("Warning: mark rejected for key {}: {e}", mark.key),
        }
    }
    Ok(marks)
}

// Walk one synthetic request through the lifecycle with random inter-phase
// gaps. Roughly one request in 16 drops out before its terminal phase so
// the staleness sweep has something to reclaim.
fn synthetic_producer(
    engine: &CorrelationEngine,
    phases: &[PhaseId],
    producer: u64,
    requests: u64,
    seed: u64,
) {
    let mut rng = StdRng::seed_from_u64(seed ^ (producer << 32));
    for i in 0..requests {
        let key = ((producer + 1) << 32) | (i + 1);
        let mut ts = monotonic_ns();
        let opcode = rng.next_u64() % 48;
        let leak = rng.next_u64() % 16 == 0;
        for (idx, phase) in phases.iter().enumerate() {
            let last = idx == phases.len() - 1;
            if last && leak {
                break;
            }
            ts += rng.next_u64() % 50_000;
            let patch = if idx == 0 {
                Payload::new().with("opcode", FieldValue::Unsigned(opcode))
            } else {
                Payload::new()
            };
            if let Err(e) = engine.mark(key, *phase, ts, patch) {
                eprintln!("Warning: mark rejected for key {key}: {e}");
                break;
            }
        }
    }
}

fn run_synthetic(engine: &Arc<CorrelationEngine>, opts: &Command) {
    // Terminal goes last; the rest keep configuration order.
    let terminal = engine.config().terminal();
    let mut phases: Vec<PhaseId> = engine
        .config()
        .phases()
        .map(|(id, _)| id)
        .filter(|id| *id != terminal)
        .collect();
    phases.push(terminal);

    let producers = opts.producers.max(1);
    let pool = Pool::<ThunkWorker<()>>::new(producers);
    let per_producer = opts.synthetic.div_ceil(producers as u64);
    let mut remaining = opts.synthetic;
    for producer in 0..producers as u64 {
        let requests = per_producer.min(remaining);
        remaining -= requests;
        if requests == 0 {
            break;
        }
        let engine = engine.clone();
        let phases = phases.clone();
        let seed = opts.seed;
        pool.execute(Thunk::of(move || {
            synthetic_producer(&engine, &phases, producer, requests, seed)
        }));
    }
    pool.join();
}

fn main() -> Result<()> {
    let opts = Command::parse();

    let config = match &opts.config {
        Some(path) => LifecycleConfig::load(path)?,
        None => default_lifecycle(),
    };

    let summary = Arc::new(LatencySummary::new(&config));
    let mut fanout = FanoutListener::new();
    fanout.push(Box::new(summary.clone()));
    if opts.verbose {
        fanout.push(Box::new(ConsoleListener));
    }
    if let Some(path) = &opts.csv {
        fanout.push(Box::new(CsvListener::create(path, &config)?));
    }

    let engine = Arc::new(CorrelationEngine::new(config, Box::new(fanout)));
    let sweeper = Sweeper::spawn(
        engine.clone(),
        Duration::from_millis(opts.sweep_interval_ms),
    );

    let marks = if opts.synthetic > 0 {
        run_synthetic(&engine, &opts);
        None
    } else if let Some(path) = &opts.replay {
        let file = File::open(path)?;
        Some(replay_marks(&engine, BufReader::new(file), None)?)
    } else {
        let exiting = Arc::new(AtomicBool::new(false));
        let flag = exiting.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        })?;
        let stdin = io::stdin();
        Some(replay_marks(&engine, stdin.lock(), Some(exiting))?)
    };

    sweeper.stop();

    if let Some(marks) = marks {
        println!("{} marks ingested", marks);
    }
    println!("{}", summary.report());
    if engine.in_flight() > 0 {
        println!("{} requests still in flight", engine.in_flight());
    }
    Ok(())
}
