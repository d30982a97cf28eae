//! Streaming man-in-the-middle detection over captured packets.
//!
//! Frames from a [`capture::CaptureBackend`] are decoded into a fixed
//! five-field [`FeatureVector`], scaled and classified by a pre-trained
//! [`ModelArtifact`], and handed to [`sink::ResultSink`]s on a worker thread.

pub mod capture;
pub mod check;
pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod features;
pub mod interface;
pub mod model;
pub mod packet;
pub mod pipeline;
pub mod sink;

#[cfg(test)]
mod tests;

pub use config::DetectorConfig;
pub use detection::DetectionResult;
pub use error::{CaptureError, ConfigError, LoadError, PipelineError, SinkError};
pub use features::{FeatureVector, FEATURE_COLUMNS, FEATURE_COUNT};
pub use model::{Label, ModelArtifact, Prediction};
pub use packet::{LinkType, NotApplicable, RawPacket};
pub use pipeline::{detect, Pipeline, PipelineState, RunSummary, StopHandle, StopReason};
