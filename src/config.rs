use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::capture::PacketFilter;
use crate::error::ConfigError;
use crate::features::FEATURE_COLUMNS;

pub const DEFAULT_FILTER: &str = "ip";
pub const DEFAULT_MODEL_PATH: &str = "models/logistic_model.json";
pub const DEFAULT_SCALER_PATH: &str = "models/scaler.json";

/// Detector settings. Every field has a default, so a config file only
/// needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Capture interface; auto-selected when unset.
    pub interface: Option<String>,
    pub filter: String,
    /// Stop after this many packets that passed the filter.
    pub packet_limit: Option<u64>,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub feature_columns: Vec<String>,
    pub csv_output: Option<PathBuf>,
    /// Replay a pcap file instead of capturing live.
    pub replay: Option<PathBuf>,
    pub sink_capacity: usize,
    #[serde(deserialize_with = "human_duration")]
    pub sink_timeout: Duration,
    #[serde(deserialize_with = "human_duration")]
    pub read_timeout: Duration,
    pub max_consecutive_errors: u32,
    pub promiscuous: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interface: None,
            filter: DEFAULT_FILTER.to_string(),
            packet_limit: None,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            scaler_path: PathBuf::from(DEFAULT_SCALER_PATH),
            feature_columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            csv_output: None,
            replay: None,
            sink_capacity: 1024,
            sink_timeout: Duration::from_millis(50),
            read_timeout: Duration::from_millis(250),
            max_consecutive_errors: 32,
            promiscuous: true,
        }
    }
}

impl DetectorConfig {
    pub fn load_config_path<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_config(file).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_config<R>(reader: R) -> Result<Self, serde_yaml::Error>
    where
        R: io::Read,
    {
        serde_yaml::from_reader(reader)
    }

    /// Check the settings and compile the capture filter.
    pub fn validate(&self) -> Result<PacketFilter, ConfigError> {
        if self
            .feature_columns
            .iter()
            .map(String::as_str)
            .ne(FEATURE_COLUMNS.iter().copied())
        {
            return Err(ConfigError::FeatureColumns {
                expected: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
                found: self.feature_columns.clone(),
            });
        }
        if self.sink_capacity == 0 {
            return Err(ConfigError::Invalid("sink_capacity must be at least 1".into()));
        }
        if self.max_consecutive_errors == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_errors must be at least 1".into(),
            ));
        }
        if self.packet_limit == Some(0) {
            return Err(ConfigError::Invalid("packet_limit must be at least 1".into()));
        }
        PacketFilter::parse(&self.filter)
    }
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DetectorConfig::default();
        let filter = config.validate().unwrap();
        assert_eq!(filter.as_str(), "ip");
        assert_eq!(config.packet_limit, None);
    }

    #[test]
    fn yaml_overrides_only_given_keys() {
        let yaml = "
interface: eth1
packet_limit: 50
model_path: /opt/mitm/lr.json
sink_timeout: 10ms
";
        let config = DetectorConfig::load_config(yaml.as_bytes()).unwrap();
        assert_eq!(config.interface.as_deref(), Some("eth1"));
        assert_eq!(config.packet_limit, Some(50));
        assert_eq!(config.model_path, PathBuf::from("/opt/mitm/lr.json"));
        assert_eq!(config.sink_timeout, Duration::from_millis(10));
        assert_eq!(config.scaler_path, PathBuf::from(DEFAULT_SCALER_PATH));
        assert_eq!(config.filter, DEFAULT_FILTER);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(DetectorConfig::load_config("modle_path: x.json".as_bytes()).is_err());
    }

    #[test]
    fn feature_columns_must_match_schema() {
        let config = DetectorConfig {
            feature_columns: vec![
                "Destination Port".into(),
                "Source Port".into(),
                "TTL".into(),
                "Length".into(),
                "Flags".into(),
            ],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FeatureColumns { .. })
        ));
    }

    #[test]
    fn bad_filter_is_a_config_error() {
        let config = DetectorConfig {
            filter: "ip and".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Filter { .. })));
    }

    #[test]
    fn missing_config_file_names_the_path() {
        let err = DetectorConfig::load_config_path("/nonexistent/mitm.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mitm.yaml"));
    }
}
