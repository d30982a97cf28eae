use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use log::info;
use pcap_file::pcap::PcapReader;
use pcap_file::DataLink;

use super::{CaptureBackend, Delivery, InterfaceInfo, PacketFilter, PacketSource};
use crate::error::CaptureError;
use crate::packet::{LinkType, RawPacket};

/// One scripted step of an in-memory replay.
#[derive(Debug, Clone)]
pub enum ReplayEvent {
    Frame(LinkType, Vec<u8>),
    Idle,
    TransientError,
    DeviceLost,
    PermissionRevoked,
}

impl ReplayEvent {
    pub fn ethernet(frame: Vec<u8>) -> Self {
        ReplayEvent::Frame(LinkType::Ethernet, frame)
    }
}

#[derive(Debug, Clone)]
enum ReplayInput {
    Script(Vec<ReplayEvent>),
    Pcap(PathBuf),
}

/// Offline capture source: scripted frames or a pcap file.
///
/// Every open starts the input from the beginning.
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    interfaces: Vec<InterfaceInfo>,
    input: ReplayInput,
}

impl ReplayBackend {
    pub fn scripted(events: Vec<ReplayEvent>) -> Self {
        ReplayBackend {
            interfaces: vec![InterfaceInfo::named("replay0")],
            input: ReplayInput::Script(events),
        }
    }

    pub fn pcap(path: impl Into<PathBuf>) -> Self {
        ReplayBackend {
            interfaces: vec![InterfaceInfo::named("replay0")],
            input: ReplayInput::Pcap(path.into()),
        }
    }

    pub fn with_interfaces(mut self, interfaces: Vec<InterfaceInfo>) -> Self {
        self.interfaces = interfaces;
        self
    }
}

impl CaptureBackend for ReplayBackend {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
        Ok(self.interfaces.clone())
    }

    fn open(
        &self,
        iface: &str,
        filter: &PacketFilter,
    ) -> Result<Box<dyn PacketSource>, CaptureError> {
        match &self.input {
            ReplayInput::Script(events) => Ok(Box::new(ScriptSource {
                iface: iface.to_string(),
                filter: filter.clone(),
                events: events.iter().cloned().collect(),
                current: Vec::new(),
            })),
            ReplayInput::Pcap(path) => {
                let source = PcapSource::open(path, filter.clone())?;
                info!("Replaying {} ({:?} framing)", path.display(), source.link);
                Ok(Box::new(source))
            }
        }
    }
}

struct ScriptSource {
    iface: String,
    filter: PacketFilter,
    events: VecDeque<ReplayEvent>,
    current: Vec<u8>,
}

impl PacketSource for ScriptSource {
    fn next_packet(&mut self) -> Result<Delivery<'_>, CaptureError> {
        let link = match self.events.pop_front() {
            None => return Ok(Delivery::Exhausted),
            Some(ReplayEvent::Idle) => return Ok(Delivery::Idle),
            Some(ReplayEvent::TransientError) => {
                return Err(CaptureError::Transient {
                    iface: self.iface.clone(),
                    source: io::Error::new(io::ErrorKind::Other, "scripted transient error"),
                })
            }
            Some(ReplayEvent::DeviceLost) => {
                return Err(CaptureError::DeviceLost {
                    iface: self.iface.clone(),
                    source: io::Error::new(io::ErrorKind::NotConnected, "scripted device loss"),
                })
            }
            Some(ReplayEvent::PermissionRevoked) => {
                return Err(CaptureError::PermissionDenied(self.iface.clone()))
            }
            Some(ReplayEvent::Frame(link, data)) => {
                self.current = data;
                link
            }
        };

        let packet = RawPacket {
            link,
            data: &self.current,
        };
        if self.filter.matches(&packet) {
            Ok(Delivery::Packet(packet))
        } else {
            Ok(Delivery::Filtered)
        }
    }
}

struct PcapSource {
    path: PathBuf,
    link: LinkType,
    filter: PacketFilter,
    reader: PcapReader<BufReader<File>>,
    current: Vec<u8>,
}

impl PcapSource {
    fn open(path: &Path, filter: PacketFilter) -> Result<Self, CaptureError> {
        let replay_err = |reason: String| CaptureError::Replay {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| replay_err(e.to_string()))?;
        let reader = PcapReader::new(BufReader::new(file)).map_err(|e| replay_err(e.to_string()))?;
        let link = match reader.header().datalink {
            DataLink::ETHERNET => LinkType::Ethernet,
            DataLink::RAW | DataLink::IPV4 => LinkType::RawIp,
            other => return Err(replay_err(format!("unsupported link type {:?}", other))),
        };
        Ok(PcapSource {
            path: path.to_path_buf(),
            link,
            filter,
            reader,
            current: Vec::new(),
        })
    }
}

impl PacketSource for PcapSource {
    fn next_packet(&mut self) -> Result<Delivery<'_>, CaptureError> {
        match self.reader.next_packet() {
            None => return Ok(Delivery::Exhausted),
            Some(Err(e)) => {
                return Err(CaptureError::Replay {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })
            }
            Some(Ok(record)) => {
                self.current.clear();
                self.current.extend_from_slice(&record.data);
            }
        }

        let packet = RawPacket {
            link: self.link,
            data: &self.current,
        };
        if self.filter.matches(&packet) {
            Ok(Delivery::Packet(packet))
        } else {
            Ok(Delivery::Filtered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::synth::{arp_frame, ipv4_frame, L4};

    #[test]
    fn scripted_source_applies_filter_and_ends() {
        let backend = ReplayBackend::scripted(vec![
            ReplayEvent::ethernet(arp_frame()),
            ReplayEvent::Idle,
            ReplayEvent::ethernet(ipv4_frame(L4::Udp { src: 1, dst: 2 }, 64, 60, false)),
        ]);
        let filter = PacketFilter::parse("ip").unwrap();
        let mut source = backend.open("replay0", &filter).unwrap();

        assert!(matches!(source.next_packet(), Ok(Delivery::Filtered)));
        assert!(matches!(source.next_packet(), Ok(Delivery::Idle)));
        match source.next_packet() {
            Ok(Delivery::Packet(p)) => assert_eq!(p.len(), 60),
            other => panic!("expected a packet, got {other:?}"),
        }
        assert!(matches!(source.next_packet(), Ok(Delivery::Exhausted)));
    }

    #[test]
    fn scripted_errors_keep_their_class() {
        let backend = ReplayBackend::scripted(vec![
            ReplayEvent::TransientError,
            ReplayEvent::PermissionRevoked,
        ]);
        let mut source = backend.open("replay0", &PacketFilter::any()).unwrap();
        assert!(source.next_packet().unwrap_err().is_transient());
        assert!(matches!(
            source.next_packet(),
            Err(CaptureError::PermissionDenied(_))
        ));
    }

    #[test]
    fn missing_pcap_is_an_open_error() {
        let backend = ReplayBackend::pcap("/nonexistent/capture.pcap");
        assert!(matches!(
            backend.open("replay0", &PacketFilter::any()),
            Err(CaptureError::Replay { .. })
        ));
    }
}
