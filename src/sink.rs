//! Result sinks and the worker thread that feeds them.
//!
//! The capture loop never writes to a sink directly: results go through a
//! bounded channel to `SinkWorker`, so a slow sink costs at most the
//! hand-off timeout per result. Anything that still does not fit is counted
//! and reported as dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use log::{debug, error, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::detection::DetectionResult;
use crate::error::SinkError;
use crate::model::Label;

const DROP_WARN_EVERY: u64 = 1000;

pub trait ResultSink: Send {
    fn name(&self) -> &str;

    fn accept(&mut self, result: &DetectionResult) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes one line per result:
/// `[ts] Prediction: Malicious 🚨 | Features: [443, 51000, 20, 1500, 0]`.
pub struct ConsoleSink<W: Write + Send> {
    out: W,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        ConsoleSink { out: io::stdout() }
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        ConsoleSink { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn console_line(result: &DetectionResult) -> String {
    let label = match result.label {
        Label::Malicious => "Malicious 🚨",
        Label::Normal => "Normal ✅",
    };
    format!(
        "[{}] Prediction: {} | Features: {}",
        result.timestamp_string(),
        label,
        result.feature_vector
    )
}

impl<W: Write + Send> ResultSink for ConsoleSink<W> {
    fn name(&self) -> &str {
        "console"
    }

    fn accept(&mut self, result: &DetectionResult) -> Result<(), SinkError> {
        writeln!(self.out, "{}", console_line(result))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Source Port")]
    source_port: u16,
    #[serde(rename = "Destination Port")]
    destination_port: u16,
    #[serde(rename = "TTL")]
    ttl: u8,
    #[serde(rename = "Length")]
    length: u32,
    #[serde(rename = "Flags")]
    flags: u8,
    #[serde(rename = "Prediction")]
    prediction: Label,
    #[serde(rename = "Score")]
    score: f64,
    #[serde(rename = "Summary")]
    summary: &'a str,
}

/// Appends labeled rows to a CSV file. The header is written only when the
/// file starts out empty.
pub struct CsvSink {
    writer: csv::Writer<File>,
}

impl CsvSink {
    pub fn append(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_new = file.metadata()?.len() == 0;
        let writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        Ok(CsvSink { writer })
    }
}

impl ResultSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    fn accept(&mut self, result: &DetectionResult) -> Result<(), SinkError> {
        let f = &result.feature_vector;
        self.writer.serialize(CsvRow {
            timestamp: result.timestamp_string(),
            source_port: f.source_port,
            destination_port: f.destination_port,
            ttl: f.ttl,
            length: f.length,
            flags: f.flags,
            prediction: result.label,
            score: result.score,
            summary: &result.raw_packet_summary,
        })?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects results in memory; clones of the handle observe the same vector.
#[derive(Clone, Default)]
pub struct MemorySink {
    results: Arc<Mutex<Vec<DetectionResult>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<DetectionResult> {
        self.results.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }
}

impl ResultSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn accept(&mut self, result: &DetectionResult) -> Result<(), SinkError> {
        self.results.lock().push(result.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    /// Results taken off the queue by the worker.
    pub delivered: u64,
    /// Individual sink `accept`/`flush` calls that failed.
    pub failures: u64,
    /// Results the capture loop could not hand off.
    pub dropped: u64,
}

pub struct SinkWorker {
    tx: Option<Sender<DetectionResult>>,
    handle: Option<JoinHandle<SinkReport>>,
    hand_off: Duration,
    dropped: u64,
}

impl SinkWorker {
    pub fn spawn(
        sinks: Vec<Box<dyn ResultSink>>,
        capacity: usize,
        hand_off: Duration,
    ) -> io::Result<Self> {
        let (tx, rx) = bounded(capacity.max(1));
        let handle = thread::Builder::new()
            .name("result-sink".to_string())
            .spawn(move || drain(rx, sinks))?;
        Ok(SinkWorker {
            tx: Some(tx),
            handle: Some(handle),
            hand_off,
            dropped: 0,
        })
    }

    /// Queue a result. Returns `false` when it had to be dropped.
    pub fn submit(&mut self, result: DetectionResult) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            self.record_drop("sink worker already closed");
            return false;
        };
        let result = match tx.try_send(result) {
            Ok(()) => return true,
            Err(TrySendError::Full(result)) => result,
            Err(TrySendError::Disconnected(_)) => {
                self.record_drop("sink worker is gone");
                return false;
            }
        };
        match tx.send_timeout(result, self.hand_off) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                self.record_drop("sink queue full");
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                self.record_drop("sink worker is gone");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Close the queue, wait for the worker to drain and flush every sink.
    pub fn finish(mut self) -> SinkReport {
        self.shutdown()
    }

    fn shutdown(&mut self) -> SinkReport {
        drop(self.tx.take());
        let mut report = match self.handle.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(_)) => {
                error!("Result sink worker panicked; pending results were lost");
                SinkReport {
                    failures: 1,
                    ..Default::default()
                }
            }
            None => SinkReport::default(),
        };
        report.dropped = self.dropped;
        report
    }

    fn record_drop(&mut self, why: &str) {
        self.dropped += 1;
        if self.dropped == 1 || self.dropped % DROP_WARN_EVERY == 0 {
            warn!("Dropped detection result ({}); {} dropped so far", why, self.dropped);
        }
    }
}

impl Drop for SinkWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn drain(rx: Receiver<DetectionResult>, mut sinks: Vec<Box<dyn ResultSink>>) -> SinkReport {
    let mut report = SinkReport::default();
    for result in rx.iter() {
        report.delivered += 1;
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.accept(&result) {
                report.failures += 1;
                warn!("{} sink rejected a result: {}", sink.name(), e);
            }
        }
        if rx.is_empty() {
            flush_all(&mut sinks, &mut report);
        }
    }
    flush_all(&mut sinks, &mut report);
    debug!("Result sink worker finished after {} results", report.delivered);
    report
}

fn flush_all(sinks: &mut [Box<dyn ResultSink>], report: &mut SinkReport) {
    for sink in sinks.iter_mut() {
        if let Err(e) = sink.flush() {
            report.failures += 1;
            warn!("{} sink failed to flush: {}", sink.name(), e);
        }
    }
}
