use std::io::{self, ErrorKind};
use std::time::Duration;

use log::{debug, info};
use pnet::datalink::{self, Channel::Ethernet, DataLinkReceiver, NetworkInterface};

use super::{CaptureBackend, Delivery, InterfaceInfo, PacketFilter, PacketSource};
use crate::error::CaptureError;
use crate::packet::{LinkType, RawPacket};

#[derive(Debug, Clone)]
pub struct LiveCaptureConfig {
    /// Upper bound on how long a read blocks before the loop re-checks for stop.
    pub read_timeout: Duration,
    pub read_buffer_size: usize,
    pub promiscuous: bool,
}

impl Default for LiveCaptureConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(250),
            read_buffer_size: 65536,
            promiscuous: true,
        }
    }
}

/// Live capture through `pnet::datalink`.
#[derive(Debug, Clone, Default)]
pub struct PnetBackend {
    config: LiveCaptureConfig,
}

impl PnetBackend {
    pub fn new(config: LiveCaptureConfig) -> Self {
        Self { config }
    }
}

impl CaptureBackend for PnetBackend {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
        Ok(datalink::interfaces()
            .into_iter()
            .map(|iface| InterfaceInfo {
                is_loopback: iface.is_loopback(),
                is_up: iface.is_up(),
                description: iface.description.clone(),
                name: iface.name,
            })
            .collect())
    }

    fn open(
        &self,
        iface: &str,
        filter: &PacketFilter,
    ) -> Result<Box<dyn PacketSource>, CaptureError> {
        let interface: NetworkInterface = datalink::interfaces()
            .into_iter()
            .find(|i| i.name == iface)
            .ok_or_else(|| CaptureError::InterfaceNotFound(iface.to_string()))?;

        let config = datalink::Config {
            read_timeout: Some(self.config.read_timeout),
            read_buffer_size: self.config.read_buffer_size,
            promiscuous: self.config.promiscuous,
            ..Default::default()
        };

        let rx = match datalink::channel(&interface, config) {
            Ok(Ethernet(_, rx)) => rx,
            Ok(_) => return Err(CaptureError::UnsupportedChannel(iface.to_string())),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(CaptureError::PermissionDenied(iface.to_string()))
            }
            Err(source) => {
                return Err(CaptureError::Open {
                    iface: iface.to_string(),
                    source,
                })
            }
        };

        // Point-to-point links (tun, ppp) deliver bare IP datagrams.
        let link = if interface.is_point_to_point() {
            LinkType::RawIp
        } else {
            LinkType::Ethernet
        };
        info!(
            "Opened {} ({:?} framing, filter: {})",
            interface.name, link, filter
        );

        Ok(Box::new(PnetSource {
            iface: interface.name,
            link,
            filter: filter.clone(),
            rx,
        }))
    }
}

struct PnetSource {
    iface: String,
    link: LinkType,
    filter: PacketFilter,
    rx: Box<dyn DataLinkReceiver>,
}

impl PacketSource for PnetSource {
    fn next_packet(&mut self) -> Result<Delivery<'_>, CaptureError> {
        match self.rx.next() {
            Ok(frame) => {
                let packet = RawPacket {
                    link: self.link,
                    data: frame,
                };
                if self.filter.matches(&packet) {
                    Ok(Delivery::Packet(packet))
                } else {
                    Ok(Delivery::Filtered)
                }
            }
            Err(e) => classify_read_error(&self.iface, e),
        }
    }
}

fn classify_read_error(iface: &str, e: io::Error) -> Result<Delivery<'static>, CaptureError> {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => Ok(Delivery::Idle),
        ErrorKind::PermissionDenied => Err(CaptureError::PermissionDenied(iface.to_string())),
        _ if device_gone(&e) => Err(CaptureError::DeviceLost {
            iface: iface.to_string(),
            source: e,
        }),
        _ => {
            debug!("read error on {}: {}", iface, e);
            Err(CaptureError::Transient {
                iface: iface.to_string(),
                source: e,
            })
        }
    }
}

#[cfg(unix)]
fn device_gone(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::ENODEV) | Some(libc::ENXIO) | Some(libc::ENETDOWN)
    )
}

#[cfg(not(unix))]
fn device_gone(_e: &io::Error) -> bool {
    false
}
