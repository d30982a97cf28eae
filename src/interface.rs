use log::{debug, info};

use crate::capture::InterfaceInfo;

/// Name prefixes of conventional wired Ethernet interfaces
/// (Linux `eth0`/`enp3s0`/`eno1`, BSD `em0`, macOS `en0`).
const ETHERNET_PREFIXES: [&str; 3] = ["eth", "en", "em"];

/// Resolve the capture interface.
///
/// An explicit name is used verbatim; whether it exists is left to the
/// capture source. Otherwise the first Ethernet-like interface wins, then the
/// first interface of any kind.
pub fn resolve<'a>(configured: Option<&'a str>, available: &'a [InterfaceInfo]) -> Option<&'a str> {
    if let Some(name) = configured {
        debug!("Using configured interface {}", name);
        return Some(name);
    }

    if let Some(iface) = available.iter().find(|i| is_ethernet_like(i)) {
        info!("Auto-selected Ethernet-like interface {}", iface.name);
        return Some(&iface.name);
    }

    let first = available.first().map(|i| i.name.as_str());
    if let Some(name) = first {
        info!("No Ethernet-like interface, falling back to {}", name);
    }
    first
}

pub fn is_ethernet_like(iface: &InterfaceInfo) -> bool {
    if iface.is_loopback {
        return false;
    }
    let name = iface.name.to_ascii_lowercase();
    ETHERNET_PREFIXES.iter().any(|p| name.starts_with(p))
        || iface.description.to_ascii_lowercase().contains("ethernet")
}
