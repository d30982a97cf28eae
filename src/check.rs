//! Offline scoring of a labeled feature CSV against the loaded artifact.

use std::io;
use std::path::Path;

use log::{debug, warn};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::features::{FeatureVector, FEATURE_COLUMNS};
use crate::model::{Label, ModelArtifact};

#[derive(Debug, Deserialize)]
struct SampleRow {
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
    #[serde(rename = "Label", default)]
    label: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub rows: usize,
    /// Rows that could not be read as a feature vector.
    pub skipped: usize,
    pub malicious: usize,
    pub normal: usize,
    /// Rows carrying a `Label` column value.
    pub labeled: usize,
    /// Labeled rows whose label maps to the predicted one.
    pub agreeing: usize,
}

impl CheckReport {
    pub fn agreement(&self) -> Option<f64> {
        if self.labeled == 0 {
            None
        } else {
            Some(self.agreeing as f64 / self.labeled as f64)
        }
    }
}

pub fn check_sample(
    artifact: &ModelArtifact,
    path: &Path,
    limit: Option<usize>,
) -> Result<CheckReport, ConfigError> {
    let sample_err = |source| ConfigError::Sample {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(sample_err)?;
    let missing = missing_columns(reader.headers().map_err(sample_err)?);
    if !missing.is_empty() {
        return Err(ConfigError::SampleColumns {
            path: path.to_path_buf(),
            missing,
        });
    }
    score_rows(artifact, reader, limit).map_err(sample_err)
}

/// Feature columns absent from a sample header row.
fn missing_columns(headers: &csv::StringRecord) -> Vec<String> {
    FEATURE_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h.trim() == **column))
        .map(|column| column.to_string())
        .collect()
}

fn score_rows<R: io::Read>(
    artifact: &ModelArtifact,
    mut reader: csv::Reader<R>,
    limit: Option<usize>,
) -> Result<CheckReport, csv::Error> {
    let mut report = CheckReport::default();
    for (line, row) in reader.deserialize::<SampleRow>().enumerate() {
        if limit.is_some_and(|limit| report.rows >= limit) {
            break;
        }
        report.rows += 1;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                report.skipped += 1;
                debug!("Skipping sample row {}: {}", line + 1, e);
                continue;
            }
        };
        let vector = FeatureVector {
            source_port: row.source_port,
            destination_port: row.destination_port,
            ttl: row.ttl,
            length: row.length,
            flags: row.flags,
        };
        let prediction = artifact.classify(&vector);
        match prediction.label {
            Label::Malicious => report.malicious += 1,
            Label::Normal => report.normal += 1,
        }
        if let Some(label) = row.label {
            report.labeled += 1;
            if Label::from_class(label) == Some(prediction.label) {
                report.agreeing += 1;
            }
        }
    }
    if report.skipped > 0 {
        warn!("{} of {} sample rows were unreadable", report.skipped, report.rows);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Classifier, LogisticModel, Scaler};

    fn artifact() -> ModelArtifact {
        let scaler = Scaler::new(
            vec![30000.0, 30000.0, 64.0, 600.0, 0.5],
            vec![15000.0, 15000.0, 32.0, 400.0, 0.5],
        )
        .unwrap();
        let model = LogisticModel::new(vec![0.0, -1.5, 1.2, -1.0, 2.0], 0.3).unwrap();
        ModelArtifact::new(scaler, Classifier::LogisticRegression(model)).unwrap()
    }

    fn reader(text: &str) -> csv::Reader<&[u8]> {
        csv::Reader::from_reader(text.as_bytes())
    }

    #[test]
    fn scores_rows_and_compares_labels() {
        let text = "Source Port,Destination Port,TTL,Length,Flags,Label\n\
                    443,51000,20,1500,0,0\n\
                    5353,5353,64,120,1,1\n\
                    5353,5353,64,120,1,0\n";
        let report = score_rows(&artifact(), reader(text), None).unwrap();
        assert_eq!(report.rows, 3);
        assert_eq!(report.malicious, 1);
        assert_eq!(report.normal, 2);
        assert_eq!(report.labeled, 3);
        assert_eq!(report.agreeing, 2);
    }

    #[test]
    fn label_column_is_optional() {
        let text = "Source Port,Destination Port,TTL,Length,Flags\n443,51000,20,1500,0\n";
        let report = score_rows(&artifact(), reader(text), None).unwrap();
        assert_eq!(report.rows, 1);
        assert_eq!(report.labeled, 0);
        assert_eq!(report.agreement(), None);
    }

    #[test]
    fn bad_rows_are_skipped_and_limit_applies() {
        let text = "Source Port,Destination Port,TTL,Length,Flags\n\
                    443,51000,twenty,1500,0\n\
                    443,51000,20,1500,0\n\
                    443,51000,20,1500,0\n";
        let report = score_rows(&artifact(), reader(text), Some(2)).unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.malicious, 1);
    }

    #[test]
    fn sample_without_feature_columns_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sample.csv");
        std::fs::write(&path, "src,dst,ttl,len,flags\n443,51000,20,1500,0\n1,2,3,4,0\n").unwrap();

        match check_sample(&artifact(), &path, None) {
            Err(ConfigError::SampleColumns { missing, .. }) => {
                assert_eq!(missing, FEATURE_COLUMNS.map(String::from).to_vec());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn partially_matching_header_names_the_gap() {
        let headers = csv::StringRecord::from(vec!["Source Port", "Destination Port", "TTL", "Label"]);
        assert_eq!(missing_columns(&headers), ["Length", "Flags"]);
    }

    #[test]
    fn missing_sample_is_a_config_error() {
        let err = check_sample(&artifact(), Path::new("/nonexistent/sample.csv"), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Sample { .. }));
    }
}
