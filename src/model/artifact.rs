use std::fs;
use std::io;
use std::path::Path;

use log::{debug, info};
use serde::de::DeserializeOwned;

use super::classifier::{Classifier, ClassifierFile, Prediction};
use super::scaler::{Scaler, ScalerFile};
use crate::error::{ArtifactKind, LoadError};
use crate::features::{FeatureVector, FEATURE_COLUMNS, FEATURE_COUNT};

/// A fitted (scaler, classifier) pair. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    scaler: Scaler,
    classifier: Classifier,
}

impl ModelArtifact {
    /// Pair an already-built scaler and classifier, checking they agree on width.
    pub fn new(scaler: Scaler, classifier: Classifier) -> Result<Self, LoadError> {
        if scaler.n_features() != FEATURE_COUNT {
            return Err(LoadError::SchemaMismatch {
                kind: ArtifactKind::Scaler,
                detail: format!("{} features, expected {}", scaler.n_features(), FEATURE_COUNT),
            });
        }
        if classifier.n_features() != scaler.n_features() {
            return Err(LoadError::SchemaMismatch {
                kind: ArtifactKind::Model,
                detail: format!(
                    "{} features, scaler has {}",
                    classifier.n_features(),
                    scaler.n_features()
                ),
            });
        }
        Ok(ModelArtifact { scaler, classifier })
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn classify(&self, vector: &FeatureVector) -> Prediction {
        self.classifier.predict(&self.scaler.normalize(vector))
    }
}

/// Load and validate the artifact pair. The model file is checked first.
pub fn load(model_path: &Path, scaler_path: &Path) -> Result<ModelArtifact, LoadError> {
    if !model_path.is_file() {
        return Err(LoadError::ModelFileMissing(model_path.to_path_buf()));
    }
    if !scaler_path.is_file() {
        return Err(LoadError::ScalerFileMissing(scaler_path.to_path_buf()));
    }

    info!("Loading classifier from {}", model_path.display());
    let model_file: ClassifierFile = read_json(ArtifactKind::Model, model_path)?;
    info!("Loading scaler from {}", scaler_path.display());
    let scaler_file: ScalerFile = read_json(ArtifactKind::Scaler, scaler_path)?;

    let scaler = Scaler::build(scaler_file)?;
    check_feature_names(ArtifactKind::Scaler, scaler.feature_names())?;

    let (classifier, model_names) = Classifier::build(model_file)?;
    check_feature_names(ArtifactKind::Model, model_names.as_deref())?;

    let artifact = ModelArtifact::new(scaler, classifier)?;
    debug!("Artifacts validated against {:?}", FEATURE_COLUMNS);
    Ok(artifact)
}

fn read_json<T: DeserializeOwned>(kind: ArtifactKind, path: &Path) -> Result<T, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => match kind {
            ArtifactKind::Model => LoadError::ModelFileMissing(path.to_path_buf()),
            ArtifactKind::Scaler => LoadError::ScalerFileMissing(path.to_path_buf()),
        },
        _ => LoadError::Unreadable {
            kind,
            path: path.to_path_buf(),
            source,
        },
    })?;
    serde_json::from_str(&text).map_err(|e| LoadError::DeserializationFailed {
        kind,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn check_feature_names(kind: ArtifactKind, names: Option<&[String]>) -> Result<(), LoadError> {
    let Some(names) = names else {
        return Ok(());
    };
    if names.iter().map(String::as_str).ne(FEATURE_COLUMNS.iter().copied()) {
        return Err(LoadError::SchemaMismatch {
            kind,
            detail: format!("feature names {:?}, expected {:?}", names, FEATURE_COLUMNS),
        });
    }
    Ok(())
}
