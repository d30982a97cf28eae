use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::scaler::NormalizedVector;
use crate::error::{ArtifactKind, LoadError};
use crate::features::FEATURE_COUNT;

/// Human-facing verdict.
///
/// Training data encodes suspicious packets as class 0, so class 0 maps to
/// `Malicious` and class 1 to `Normal`. Keep this mapping in step with the
/// labeling used when the model was fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Malicious,
    Normal,
}

/// Label for each class index the classifier can emit.
const CLASS_LABELS: [Label; 2] = [Label::Malicious, Label::Normal];

impl Label {
    pub fn from_class(class: u8) -> Option<Label> {
        CLASS_LABELS.get(usize::from(class)).copied()
    }

    pub fn class(self) -> u8 {
        match self {
            Label::Malicious => 0,
            Label::Normal => 1,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Malicious => write!(f, "Malicious"),
            Label::Normal => write!(f, "Normal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub class: u8,
    pub label: Label,
    /// Probability of the predicted class.
    pub score: f64,
}

/// On-disk layout of a fitted classifier.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum ClassifierFile {
    LogisticRegression {
        #[serde(default)]
        feature_names: Option<Vec<String>>,
        classes: Vec<u8>,
        coefficients: Vec<f64>,
        intercept: f64,
    },
}

/// Binary logistic regression: `d = w·x + b`, class 1 when `d > 0`.
#[derive(Debug, Clone)]
pub struct LogisticModel {
    coefficients: Array1<f64>,
    intercept: f64,
}

impl LogisticModel {
    pub fn new(coefficients: Vec<f64>, intercept: f64) -> Result<Self, LoadError> {
        if coefficients.len() != FEATURE_COUNT {
            return Err(LoadError::SchemaMismatch {
                kind: ArtifactKind::Model,
                detail: format!(
                    "{} coefficients, expected {}",
                    coefficients.len(),
                    FEATURE_COUNT
                ),
            });
        }
        if !intercept.is_finite() || coefficients.iter().any(|w| !w.is_finite()) {
            return Err(LoadError::InvalidParameters {
                kind: ArtifactKind::Model,
                detail: "coefficients and intercept must be finite".to_string(),
            });
        }
        Ok(LogisticModel {
            coefficients: Array1::from(coefficients),
            intercept,
        })
    }

    pub fn decision_function(&self, x: &NormalizedVector) -> f64 {
        self.coefficients.dot(x.as_array()) + self.intercept
    }

    pub fn predict(&self, x: &NormalizedVector) -> Prediction {
        let d = self.decision_function(x);
        let p_one = sigmoid(d);
        let class = u8::from(d > 0.0);
        let score = if class == 1 { p_one } else { 1.0 - p_one };
        Prediction {
            class,
            label: CLASS_LABELS[usize::from(class)],
            score,
        }
    }
}

/// The classifier half of a model artifact.
#[derive(Debug, Clone)]
pub enum Classifier {
    LogisticRegression(LogisticModel),
}

impl Classifier {
    pub(crate) fn build(file: ClassifierFile) -> Result<(Self, Option<Vec<String>>), LoadError> {
        match file {
            ClassifierFile::LogisticRegression {
                feature_names,
                classes,
                coefficients,
                intercept,
            } => {
                if classes != [0, 1] {
                    return Err(LoadError::SchemaMismatch {
                        kind: ArtifactKind::Model,
                        detail: format!("classes {:?}, expected [0, 1]", classes),
                    });
                }
                let model = LogisticModel::new(coefficients, intercept)?;
                Ok((Classifier::LogisticRegression(model), feature_names))
            }
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Classifier::LogisticRegression(m) => m.coefficients.len(),
        }
    }

    pub fn predict(&self, x: &NormalizedVector) -> Prediction {
        match self {
            Classifier::LogisticRegression(m) => m.predict(x),
        }
    }
}

fn sigmoid(d: f64) -> f64 {
    if d >= 0.0 {
        1.0 / (1.0 + (-d).exp())
    } else {
        let e = d.exp();
        e / (1.0 + e)
    }
}
