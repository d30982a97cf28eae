use serde::Serialize;

use crate::packet::{self, NotApplicable, RawPacket};

pub const FEATURE_COUNT: usize = 5;

/// Column names the scaler and classifier were fit on, in vector order.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] =
    ["Source Port", "Destination Port", "TTL", "Length", "Flags"];

/// Per-packet features in the fixed training order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FeatureVector {
    #[serde(rename = "Source Port")]
    pub source_port: u16,
    #[serde(rename = "Destination Port")]
    pub destination_port: u16,
    #[serde(rename = "TTL")]
    pub ttl: u8,
    #[serde(rename = "Length")]
    pub length: u32,
    #[serde(rename = "Flags")]
    pub flags: u8,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.source_port as f64,
            self.destination_port as f64,
            self.ttl as f64,
            self.length as f64,
            self.flags as f64,
        ]
    }
}

impl std::fmt::Display for FeatureVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}, {}]",
            self.source_port, self.destination_port, self.ttl, self.length, self.flags
        )
    }
}

/// Derive the feature vector for one frame.
///
/// Ports come from TCP when present, else UDP, else both are 0. `length` is
/// the whole captured frame and `flags` collapses the IPv4 flag bits to
/// "don't fragment set".
pub fn extract(packet: &RawPacket<'_>) -> Result<FeatureVector, NotApplicable> {
    packet::decode(packet).map(|decoded| from_decoded(&decoded))
}

pub fn from_decoded(decoded: &packet::DecodedPacket) -> FeatureVector {
    let (source_port, destination_port) = decoded.transport.ports();
    FeatureVector {
        source_port,
        destination_port,
        ttl: decoded.ip.ttl,
        length: u32::try_from(decoded.frame_len).unwrap_or(u32::MAX),
        flags: u8::from(decoded.ip.flags.dont_fragment()),
    }
}
