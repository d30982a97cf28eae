//! The streaming detection pipeline.
//!
//! `Uninitialized -> Loading -> Capturing -> Stopped`, with `Error` reachable
//! from `Loading` and `Capturing`. Per-packet problems are counted and
//! skipped; only startup failures and loss of the capture source end a run
//! with an error.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::capture::{CaptureBackend, Delivery, PacketFilter, PacketSource};
use crate::config::DetectorConfig;
use crate::detection::DetectionResult;
use crate::error::PipelineError;
use crate::features;
use crate::interface;
use crate::model::{self, Label, ModelArtifact};
use crate::packet::{self, NotApplicable, RawPacket};
use crate::sink::{ResultSink, SinkWorker};

const MALFORMED_WARN_EVERY: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Loading,
    Capturing,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    PacketLimit,
    EndOfInput,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Interrupted => write!(f, "interrupted"),
            StopReason::PacketLimit => write!(f, "packet limit reached"),
            StopReason::EndOfInput => write!(f, "end of input"),
        }
    }
}

/// Cooperative stop flag, checked by the capture loop between packets.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub interface: String,
    /// Frames delivered by the source that passed the capture filter.
    pub received: u64,
    pub filtered: u64,
    pub emitted: u64,
    pub skipped_no_ip: u64,
    pub malformed: u64,
    pub malicious: u64,
    pub normal: u64,
    pub transient_errors: u64,
    pub dropped: u64,
    pub sink_failures: u64,
    pub stop_reason: Option<StopReason>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packets on {} -> {} results ({} malicious, {} normal); skipped {} non-IP, {} malformed; {} dropped, {} sink failures",
            self.received,
            self.interface,
            self.emitted,
            self.malicious,
            self.normal,
            self.skipped_no_ip,
            self.malformed,
            self.dropped,
            self.sink_failures
        )
    }
}

/// Run one frame through extraction, scaling and classification.
pub fn detect(
    artifact: &ModelArtifact,
    packet: &RawPacket<'_>,
) -> Result<DetectionResult, NotApplicable> {
    let decoded = packet::decode(packet)?;
    let features = features::from_decoded(&decoded);
    let prediction = artifact.classify(&features);
    Ok(DetectionResult::new(features, prediction, decoded.summary()))
}

pub struct Pipeline<B> {
    config: DetectorConfig,
    backend: B,
    state: PipelineState,
    stop: StopHandle,
    artifact: Option<ModelArtifact>,
}

impl<B: CaptureBackend> Pipeline<B> {
    pub fn new(config: DetectorConfig, backend: B) -> Self {
        Pipeline {
            config,
            backend,
            state: PipelineState::Uninitialized,
            stop: StopHandle::new(),
            artifact: None,
        }
    }

    /// Use an already loaded artifact instead of reading the configured paths.
    pub fn with_artifact(mut self, artifact: ModelArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn artifact(&self) -> Option<&ModelArtifact> {
        self.artifact.as_ref()
    }

    /// Load, capture until stopped, then flush every sink.
    pub fn run(&mut self, sinks: Vec<Box<dyn ResultSink>>) -> Result<RunSummary, PipelineError> {
        if self.state != PipelineState::Uninitialized {
            return Err(PipelineError::AlreadyRan);
        }
        self.transition(PipelineState::Loading);

        let (iface, artifact, mut source) = match self.prepare() {
            Ok(ready) => ready,
            Err(e) => {
                self.transition(PipelineState::Error);
                return Err(e);
            }
        };

        let mut worker = match SinkWorker::spawn(
            sinks,
            self.config.sink_capacity,
            self.config.sink_timeout,
        ) {
            Ok(worker) => worker,
            Err(e) => {
                self.transition(PipelineState::Error);
                return Err(PipelineError::Worker(e));
            }
        };

        let mut summary = RunSummary {
            interface: iface,
            ..Default::default()
        };
        self.transition(PipelineState::Capturing);
        info!("Capturing on {}... press Ctrl+C to stop", summary.interface);

        let outcome = self.capture_loop(&artifact, source.as_mut(), &mut worker, &mut summary);
        self.artifact = Some(artifact);

        // Flush before leaving Capturing, whether the loop ended cleanly or not.
        let report = worker.finish();
        summary.dropped = report.dropped;
        summary.sink_failures = report.failures;

        match outcome {
            Ok(reason) => {
                summary.stop_reason = Some(reason);
                self.transition(PipelineState::Stopped);
                info!("Capture stopped ({}): {}", reason, summary);
                Ok(summary)
            }
            Err(e) => {
                self.transition(PipelineState::Error);
                info!("Partial run: {}", summary);
                Err(e)
            }
        }
    }

    fn prepare(
        &mut self,
    ) -> Result<(String, ModelArtifact, Box<dyn PacketSource>), PipelineError> {
        let filter: PacketFilter = self.config.validate()?;

        let available = if self.config.interface.is_some() {
            Vec::new()
        } else {
            self.backend.interfaces().unwrap_or_else(|e| {
                warn!("Interface enumeration failed: {}", e);
                Vec::new()
            })
        };
        let iface = interface::resolve(self.config.interface.as_deref(), &available)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::NoInterfaceFound {
                available: available.iter().map(|i| i.name.clone()).collect(),
            })?;

        let artifact = match self.artifact.take() {
            Some(artifact) => artifact,
            None => {
                let artifact = model::load(&self.config.model_path, &self.config.scaler_path)?;
                info!("Model loaded successfully");
                artifact
            }
        };

        let source = match self.backend.open(&iface, &filter) {
            Ok(source) => source,
            Err(e) => {
                self.artifact = Some(artifact);
                return Err(PipelineError::CaptureStart(e));
            }
        };
        Ok((iface, artifact, source))
    }

    fn capture_loop(
        &self,
        artifact: &ModelArtifact,
        source: &mut dyn PacketSource,
        worker: &mut SinkWorker,
        summary: &mut RunSummary,
    ) -> Result<StopReason, PipelineError> {
        let mut consecutive_errors: u32 = 0;

        loop {
            if self.stop.is_stopped() {
                return Ok(StopReason::Interrupted);
            }
            if let Some(limit) = self.config.packet_limit {
                if summary.received >= limit {
                    return Ok(StopReason::PacketLimit);
                }
            }

            let delivery = match source.next_packet() {
                Ok(delivery) => {
                    consecutive_errors = 0;
                    delivery
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    summary.transient_errors += 1;
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        return Err(PipelineError::CaptureLost(e));
                    }
                    warn!("{} ({} in a row)", e, consecutive_errors);
                    continue;
                }
                Err(e) => return Err(PipelineError::CaptureLost(e)),
            };

            match delivery {
                Delivery::Packet(packet) => {
                    summary.received += 1;
                    self.handle_packet(artifact, &packet, worker, summary);
                }
                Delivery::Filtered => summary.filtered += 1,
                Delivery::Idle => {}
                Delivery::Exhausted => return Ok(StopReason::EndOfInput),
            }
        }
    }

    fn handle_packet(
        &self,
        artifact: &ModelArtifact,
        packet: &RawPacket<'_>,
        worker: &mut SinkWorker,
        summary: &mut RunSummary,
    ) {
        match detect(artifact, packet) {
            Ok(result) => {
                debug!(
                    "{} -> {} ({:.3})",
                    result.raw_packet_summary, result.label, result.score
                );
                match result.label {
                    Label::Malicious => summary.malicious += 1,
                    Label::Normal => summary.normal += 1,
                }
                summary.emitted += 1;
                worker.submit(result);
            }
            Err(NotApplicable::NoIpLayer) => summary.skipped_no_ip += 1,
            Err(e @ NotApplicable::Malformed(_)) => {
                summary.malformed += 1;
                if summary.malformed == 1 || summary.malformed % MALFORMED_WARN_EVERY == 0 {
                    warn!(
                        "Skipping packet #{}: {} ({} malformed so far)",
                        summary.received, e, summary.malformed
                    );
                }
            }
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
