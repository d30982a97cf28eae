use ndarray::Array1;
use serde::Deserialize;

use crate::error::{ArtifactKind, LoadError};
use crate::features::{FeatureVector, FEATURE_COUNT};

/// On-disk layout of a fitted standard scaler.
#[derive(Debug, Deserialize)]
pub(crate) struct ScalerFile {
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// Feature vector after scaling, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVector(Array1<f64>);

impl NormalizedVector {
    pub fn as_array(&self) -> &Array1<f64> {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }
}

/// Per-field affine transform `(x - mean) / scale` fixed at fit time.
#[derive(Debug, Clone)]
pub struct Scaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
    feature_names: Option<Vec<String>>,
}

impl Scaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, LoadError> {
        Self::build(ScalerFile {
            feature_names: None,
            mean,
            scale,
        })
    }

    pub(crate) fn build(file: ScalerFile) -> Result<Self, LoadError> {
        for (field, len) in [("mean", file.mean.len()), ("scale", file.scale.len())] {
            if len != FEATURE_COUNT {
                return Err(LoadError::SchemaMismatch {
                    kind: ArtifactKind::Scaler,
                    detail: format!("{} has {} entries, expected {}", field, len, FEATURE_COUNT),
                });
            }
        }
        if let Some(i) = file.mean.iter().position(|m| !m.is_finite()) {
            return Err(LoadError::InvalidParameters {
                kind: ArtifactKind::Scaler,
                detail: format!("mean[{}] is not finite", i),
            });
        }
        if let Some(i) = file.scale.iter().position(|s| !s.is_finite() || *s == 0.0) {
            return Err(LoadError::InvalidParameters {
                kind: ArtifactKind::Scaler,
                detail: format!("scale[{}] must be finite and non-zero", i),
            });
        }

        Ok(Scaler {
            mean: Array1::from(file.mean),
            scale: Array1::from(file.scale),
            feature_names: file.feature_names,
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    pub fn normalize(&self, vector: &FeatureVector) -> NormalizedVector {
        let raw = Array1::from(vector.to_array().to_vec());
        NormalizedVector((raw - &self.mean) / &self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_per_field_affine_transform() {
        let scaler = Scaler::new(
            vec![1000.0, 20000.0, 64.0, 500.0, 0.5],
            vec![100.0, 1000.0, 8.0, 250.0, 0.5],
        )
        .unwrap();
        let v = FeatureVector {
            source_port: 1100,
            destination_port: 19000,
            ttl: 72,
            length: 1000,
            flags: 0,
        };
        assert_eq!(scaler.normalize(&v).to_vec(), vec![1.0, -1.0, 1.0, 2.0, -1.0]);
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = Scaler::new(vec![0.0; 4], vec![1.0; 4]).unwrap_err();
        assert!(matches!(err, LoadError::SchemaMismatch { .. }));
    }

    #[test]
    fn rejects_zero_scale() {
        let err = Scaler::new(vec![0.0; 5], vec![1.0, 1.0, 0.0, 1.0, 1.0]).unwrap_err();
        match err {
            LoadError::InvalidParameters { detail, .. } => assert!(detail.contains("scale[2]")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
