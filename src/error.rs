use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Which half of the model artifact a load failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Model,
    Scaler,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Model => write!(f, "model"),
            ArtifactKind::Scaler => write!(f, "scaler"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model file not found: {0}")]
    ModelFileMissing(PathBuf),

    #[error("scaler file not found: {0}")]
    ScalerFileMissing(PathBuf),

    #[error("cannot read {kind} file {path}: {source}")]
    Unreadable {
        kind: ArtifactKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot deserialize {kind} file {path}: {reason}")]
    DeserializationFailed {
        kind: ArtifactKind,
        path: PathBuf,
        reason: String,
    },

    #[error("{kind} artifact does not match the feature schema: {detail}")]
    SchemaMismatch { kind: ArtifactKind, detail: String },

    #[error("{kind} artifact has invalid parameters: {detail}")]
    InvalidParameters { kind: ArtifactKind, detail: String },
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("interface {0} not found")]
    InterfaceNotFound(String),

    #[error("permission denied while capturing on {0}")]
    PermissionDenied(String),

    #[error("unsupported channel type on {0}")]
    UnsupportedChannel(String),

    #[error("capture device {iface} failed: {source}")]
    DeviceLost {
        iface: String,
        #[source]
        source: io::Error,
    },

    #[error("transient capture error on {iface}: {source}")]
    Transient {
        iface: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot open capture on {iface}: {source}")]
    Open {
        iface: String,
        #[source]
        source: io::Error,
    },

    #[error("replay file {path}: {reason}")]
    Replay { path: PathBuf, reason: String },
}

impl CaptureError {
    /// Transient errors are retried by the capture loop; everything else ends it.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Transient { .. })
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid filter expression {expr:?}: {reason}")]
    Filter { expr: String, reason: String },

    #[error("feature columns {found:?} do not match the fixed schema {expected:?}")]
    FeatureColumns {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("cannot read sample file {path}: {source}")]
    Sample {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("sample file {path} is missing feature columns {missing:?}")]
    SampleColumns { path: PathBuf, missing: Vec<String> },

    #[error("cannot open output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: SinkError,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Fatal outcomes of a pipeline run. Per-packet failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to load model artifacts: {0}")]
    Load(#[from] LoadError),

    #[error("no usable capture interface found (available: {available:?})")]
    NoInterfaceFound { available: Vec<String> },

    #[error("capture could not start: {0}")]
    CaptureStart(#[source] CaptureError),

    #[error("capture failed mid-run: {0}")]
    CaptureLost(#[source] CaptureError),

    #[error("cannot start result sink worker: {0}")]
    Worker(#[source] io::Error),

    #[error("pipeline already ran; create a new one")]
    AlreadyRan,
}

impl PipelineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Config(_) => 2,
            PipelineError::Load(_) => 3,
            PipelineError::NoInterfaceFound { .. } => 4,
            PipelineError::CaptureStart(_) => 5,
            PipelineError::CaptureLost(_) => 6,
            PipelineError::Worker(_) | PipelineError::AlreadyRan => 1,
        }
    }
}
