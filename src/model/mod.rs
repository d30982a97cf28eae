//! Loaded model artifacts: the fitted scaler and the binary classifier.

pub mod artifact;
pub mod classifier;
pub mod scaler;

pub use artifact::{load, ModelArtifact};
pub use classifier::{Classifier, Label, LogisticModel, Prediction};
pub use scaler::{NormalizedVector, Scaler};
