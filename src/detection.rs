use chrono::{DateTime, Local};

use crate::features::FeatureVector;
use crate::model::{Label, Prediction};

/// Verdict for one packet. Owns copies of everything it reports.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub timestamp: DateTime<Local>,
    pub feature_vector: FeatureVector,
    pub label: Label,
    pub class: u8,
    pub score: f64,
    pub raw_packet_summary: String,
}

impl DetectionResult {
    pub fn new(
        feature_vector: FeatureVector,
        prediction: Prediction,
        raw_packet_summary: String,
    ) -> Self {
        DetectionResult {
            timestamp: Local::now(),
            feature_vector,
            label: prediction.label,
            class: prediction.class,
            score: prediction.score,
            raw_packet_summary,
        }
    }

    pub fn is_malicious(&self) -> bool {
        self.label == Label::Malicious
    }

    pub fn timestamp_string(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
