//! Capture sources.
//!
//! A `CaptureBackend` enumerates interfaces and opens a `PacketSource` on one
//! of them. Sources are pulled one frame at a time; a frame borrowed from a
//! source is only valid until the next call.

pub mod filter;
pub mod live;
pub mod replay;

use crate::error::CaptureError;
use crate::packet::RawPacket;

pub use filter::PacketFilter;
pub use live::PnetBackend;
pub use replay::{ReplayBackend, ReplayEvent};

/// Outcome of one pull from a packet source.
#[derive(Debug)]
pub enum Delivery<'a> {
    /// A frame that passed the capture filter.
    Packet(RawPacket<'a>),
    /// A frame was read but rejected by the capture filter.
    Filtered,
    /// No frame arrived within the read timeout.
    Idle,
    /// The source has no more frames (end of a replay).
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub description: String,
    pub is_loopback: bool,
    pub is_up: bool,
}

impl InterfaceInfo {
    pub fn named(name: impl Into<String>) -> Self {
        InterfaceInfo {
            name: name.into(),
            description: String::new(),
            is_loopback: false,
            is_up: true,
        }
    }
}

pub trait PacketSource {
    fn next_packet(&mut self) -> Result<Delivery<'_>, CaptureError>;
}

pub trait CaptureBackend {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError>;

    fn open(
        &self,
        iface: &str,
        filter: &PacketFilter,
    ) -> Result<Box<dyn PacketSource>, CaptureError>;
}

impl<B: CaptureBackend + ?Sized> CaptureBackend for Box<B> {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
        (**self).interfaces()
    }

    fn open(
        &self,
        iface: &str,
        filter: &PacketFilter,
    ) -> Result<Box<dyn PacketSource>, CaptureError> {
        (**self).open(iface, filter)
    }
}
