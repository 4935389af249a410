use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::config::LifecycleConfig;
use crate::event::CompletedEvent;

/// Downstream consumer of completed events.
///
/// `completed` runs synchronously on the thread that marked the terminal
/// phase (or on the sweeper thread for evictions), so implementations that
/// need to do blocking work should hand the event off to their own
/// queue/thread (see [`ChannelListener`]) instead of stalling the caller.
/// Errors are reported by the engine but never roll back retirement.
pub trait EventListener {
    fn completed(&self, event: &CompletedEvent) -> Result<()>;
}

impl<T: EventListener + ?Sized> EventListener for Arc<T> {
    fn completed(&self, event: &CompletedEvent) -> Result<()> {
        (**self).completed(event)
    }
}

/// Prints one line per completed event.
pub struct ConsoleListener;

impl EventListener for ConsoleListener {
    fn completed(&self, event: &CompletedEvent) -> Result<()> {
        println!("{}", event);
        Ok(())
    }
}

/// Forwards events over an mpsc channel to a consumer thread. This is the
/// handoff pattern for consumers that block on I/O.
pub struct ChannelListener {
    tx: Mutex<Sender<CompletedEvent>>,
}

impl ChannelListener {
    pub fn new(tx: Sender<CompletedEvent>) -> Self {
        ChannelListener { tx: Mutex::new(tx) }
    }
}

impl EventListener for ChannelListener {
    fn completed(&self, event: &CompletedEvent) -> Result<()> {
        self.tx
            .lock()
            .unwrap()
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("event consumer hung up"))
    }
}

/// Writes one CSV row per completed event.
///
/// The column layout is fixed at creation from the lifecycle configuration:
/// `ts,key,status` followed by one column per configured duration (in
/// nanoseconds, empty when absent) and a final payload column. Rows are
/// flushed as they are written so a killed run still leaves usable output.
pub struct CsvListener {
    writer: Mutex<BufWriter<File>>,
}

impl CsvListener {
    pub fn create<P: AsRef<Path>>(path: P, config: &LifecycleConfig) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        write!(writer, "ts,key,status")?;
        for pair in config.durations() {
            write!(writer, ",{}_ns", pair.name)?;
        }
        writeln!(writer, ",payload")?;
        writer.flush()?;
        Ok(CsvListener {
            writer: Mutex::new(writer),
        })
    }
}

impl EventListener for CsvListener {
    fn completed(&self, event: &CompletedEvent) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        if let Some(ts) = event.start_ts() {
            write!(writer, "{}", ts)?;
        }
        write!(writer, ",{},{}", event.key(), event.completion())?;
        for (_name, value) in event.durations() {
            match value {
                Some(ns) => write!(writer, ",{}", ns)?,
                // Absent is an empty cell, never 0.
                None => write!(writer, ",")?,
            }
        }
        writeln!(writer, ",{}", event.payload())?;
        writer.flush()?;
        Ok(())
    }
}

/// Delivers every event to each listener in turn. The first failure is
/// returned after all listeners have been tried.
#[derive(Default)]
pub struct FanoutListener {
    listeners: Vec<Box<dyn EventListener + Send + Sync>>,
}

impl FanoutListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listener: Box<dyn EventListener + Send + Sync>) {
        self.listeners.push(listener);
    }
}

impl EventListener for FanoutListener {
    fn completed(&self, event: &CompletedEvent) -> Result<()> {
        let mut first_err = None;
        for listener in &self.listeners {
            if let Err(e) = listener.completed(event) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
