//! Layer decoding for captured frames.
//!
//! A frame is resolved once into an explicit layer stack (link, IPv4,
//! transport) so later stages match on variants instead of re-probing bytes.
//! Nothing here borrows from the frame after `decode` returns.

use std::fmt;
use std::net::Ipv4Addr;

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{Ipv4Flags, Ipv4Packet};
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;
use thiserror::Error;

const IPV4_MIN_HEADER: usize = 20;
const IP_FLAG_EVIL: u8 = 0b100;

/// Framing of the bytes delivered by a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    RawIp,
}

/// One captured frame, borrowed from the capture source for a single callback.
#[derive(Debug, Clone, Copy)]
pub struct RawPacket<'a> {
    pub link: LinkType,
    pub data: &'a [u8],
}

impl<'a> RawPacket<'a> {
    pub fn ethernet(data: &'a [u8]) -> Self {
        RawPacket {
            link: LinkType::Ethernet,
            data,
        }
    }

    pub fn raw_ip(data: &'a [u8]) -> Self {
        RawPacket {
            link: LinkType::RawIp,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Why a frame produced no feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NotApplicable {
    #[error("frame carries no IPv4 layer")]
    NoIpLayer,

    #[error("malformed {0} header")]
    Malformed(&'static str),
}

/// The three IPv4 flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpFlags(u8);

impl IpFlags {
    pub fn from_bits(bits: u8) -> Self {
        IpFlags(bits & 0b111)
    }

    pub fn dont_fragment(self) -> bool {
        self.0 & Ipv4Flags::DontFragment != 0
    }

    pub fn more_fragments(self) -> bool {
        self.0 & Ipv4Flags::MoreFragments != 0
    }

    /// Symbolic names of the set bits, e.g. `["DF"]` or `["MF", "evil"]`.
    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(3);
        if self.more_fragments() {
            names.push("MF");
        }
        if self.dont_fragment() {
            names.push("DF");
        }
        if self.0 & IP_FLAG_EVIL != 0 {
            names.push("evil");
        }
        names
    }
}

impl fmt::Display for IpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join("+"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Layer {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
    pub flags: IpFlags,
    pub fragment_offset: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp {
        source_port: u16,
        destination_port: u16,
    },
    Udp {
        source_port: u16,
        destination_port: u16,
    },
    None,
}

impl Transport {
    /// Source and destination ports, `(0, 0)` when there is no TCP/UDP layer.
    pub fn ports(&self) -> (u16, u16) {
        match *self {
            Transport::Tcp {
                source_port,
                destination_port,
            }
            | Transport::Udp {
                source_port,
                destination_port,
            } => (source_port, destination_port),
            Transport::None => (0, 0),
        }
    }
}

/// A frame resolved into owned layer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPacket {
    pub link: LinkType,
    pub frame_len: usize,
    pub vlan: Option<u16>,
    pub ip: Ipv4Layer,
    pub transport: Transport,
}

impl DecodedPacket {
    /// One-line description, e.g. `Ether / IP / TCP 10.0.0.1:443 > 10.0.0.2:51000 DF`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if self.link == LinkType::Ethernet {
            out.push_str("Ether / ");
        }
        if let Some(vlan) = self.vlan {
            out.push_str(&format!("Dot1Q {} / ", vlan));
        }
        out.push_str("IP / ");
        match self.transport {
            Transport::Tcp {
                source_port,
                destination_port,
            } => out.push_str(&format!(
                "TCP {}:{} > {}:{}",
                self.ip.source, source_port, self.ip.destination, destination_port
            )),
            Transport::Udp {
                source_port,
                destination_port,
            } => out.push_str(&format!(
                "UDP {}:{} > {}:{}",
                self.ip.source, source_port, self.ip.destination, destination_port
            )),
            Transport::None => out.push_str(&format!(
                "proto={} {} > {}",
                self.ip.protocol, self.ip.source, self.ip.destination
            )),
        }
        let flags = self.ip.flags.to_string();
        if !flags.is_empty() {
            out.push(' ');
            out.push_str(&flags);
        }
        out
    }
}

/// Resolve a frame into its layers.
pub fn decode(packet: &RawPacket<'_>) -> Result<DecodedPacket, NotApplicable> {
    let (ip_bytes, vlan) = match packet.link {
        LinkType::Ethernet => ethernet_payload(packet.data)?,
        LinkType::RawIp => (packet.data, None),
    };

    let (ip, transport_bytes) = decode_ipv4(ip_bytes)?;

    // Transport headers only exist in the first fragment.
    let transport = if ip.fragment_offset != 0 {
        Transport::None
    } else {
        decode_transport(ip.protocol, transport_bytes)
    };

    Ok(DecodedPacket {
        link: packet.link,
        frame_len: packet.data.len(),
        vlan,
        ip,
        transport,
    })
}

fn ethernet_payload(data: &[u8]) -> Result<(&[u8], Option<u16>), NotApplicable> {
    let eth = EthernetPacket::new(data).ok_or(NotApplicable::NoIpLayer)?;
    let header = EthernetPacket::minimum_packet_size();
    match eth.get_ethertype() {
        EtherTypes::Ipv4 => Ok((&data[header..], None)),
        EtherTypes::Vlan => {
            let tagged = &data[header..];
            let vlan = VlanPacket::new(tagged).ok_or(NotApplicable::Malformed("802.1Q"))?;
            if vlan.get_ethertype() != EtherTypes::Ipv4 {
                return Err(NotApplicable::NoIpLayer);
            }
            let offset = VlanPacket::minimum_packet_size();
            Ok((&tagged[offset..], Some(vlan.get_vlan_identifier())))
        }
        _ => Err(NotApplicable::NoIpLayer),
    }
}

fn decode_ipv4(bytes: &[u8]) -> Result<(Ipv4Layer, &[u8]), NotApplicable> {
    if bytes.first().map(|b| b >> 4) != Some(4) {
        return Err(NotApplicable::NoIpLayer);
    }
    let ipv4 = Ipv4Packet::new(bytes).ok_or(NotApplicable::Malformed("IPv4"))?;

    let header_len = ipv4.get_header_length() as usize * 4;
    if header_len < IPV4_MIN_HEADER || header_len > bytes.len() {
        return Err(NotApplicable::Malformed("IPv4"));
    }

    // Trust total_length only as far as the captured bytes go.
    let total_length = ipv4.get_total_length() as usize;
    let end = total_length.clamp(header_len, bytes.len());

    let layer = Ipv4Layer {
        source: ipv4.get_source(),
        destination: ipv4.get_destination(),
        protocol: ipv4.get_next_level_protocol().0,
        ttl: ipv4.get_ttl(),
        flags: IpFlags::from_bits(ipv4.get_flags()),
        fragment_offset: ipv4.get_fragment_offset(),
    };
    Ok((layer, &bytes[header_len..end]))
}

/// Ports are only taken from a complete TCP/UDP header. A header cut short
/// after the port fields still yields `Transport::None`, unlike dissectors
/// that report partial layers.
fn decode_transport(protocol: u8, bytes: &[u8]) -> Transport {
    if protocol == IpNextHeaderProtocols::Tcp.0 {
        if let Some(tcp) = TcpPacket::new(bytes) {
            return Transport::Tcp {
                source_port: tcp.get_source(),
                destination_port: tcp.get_destination(),
            };
        }
    } else if protocol == IpNextHeaderProtocols::Udp.0 {
        if let Some(udp) = UdpPacket::new(bytes) {
            return Transport::Udp {
                source_port: udp.get_source(),
                destination_port: udp.get_destination(),
            };
        }
    }
    Transport::None
}

/// Byte-level frame builder used by tests and benchmarks.
#[cfg(any(test, feature = "synth"))]
pub mod synth {
    use std::net::Ipv4Addr;

    #[derive(Debug, Clone, Copy)]
    pub enum L4 {
        Tcp { src: u16, dst: u16 },
        Udp { src: u16, dst: u16 },
        Other(u8),
    }

    /// Build an Ethernet/IPv4 frame whose total captured length is `frame_len`.
    pub fn ipv4_frame(l4: L4, ttl: u8, frame_len: usize, dont_fragment: bool) -> Vec<u8> {
        let (protocol, l4_header) = match l4 {
            L4::Tcp { src, dst } => {
                let mut h = vec![0u8; 20];
                h[0..2].copy_from_slice(&src.to_be_bytes());
                h[2..4].copy_from_slice(&dst.to_be_bytes());
                h[12] = 5 << 4;
                h[13] = 0x18;
                (6u8, h)
            }
            L4::Udp { src, dst } => {
                let mut h = vec![0u8; 8];
                h[0..2].copy_from_slice(&src.to_be_bytes());
                h[2..4].copy_from_slice(&dst.to_be_bytes());
                (17u8, h)
            }
            L4::Other(proto) => (proto, Vec::new()),
        };

        let min_len = 14 + 20 + l4_header.len();
        let frame_len = frame_len.max(min_len);
        let mut frame = vec![0u8; frame_len];

        frame[0..6].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        frame[6..12].copy_from_slice(&[0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb]);
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());

        let ip = &mut frame[14..];
        let total_length = (frame_len - 14) as u16;
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&total_length.to_be_bytes());
        ip[6] = if dont_fragment { 0x40 } else { 0x00 };
        ip[8] = ttl;
        ip[9] = protocol;
        ip[12..16].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
        ip[16..20].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 2).octets());
        ip[20..20 + l4_header.len()].copy_from_slice(&l4_header);

        frame
    }

    /// An Ethernet frame carrying an ARP payload (no IP layer).
    pub fn arp_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 42];
        frame[0..6].copy_from_slice(&[0xff; 6]);
        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        frame
    }
}
