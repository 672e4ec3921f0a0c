//! Interface enumeration.
//!
//! This module defines the `InterfaceSource` trait and the enumeration
//! logic on top of it. The system implementation reads `getifaddrs`; tests
//! supply fixtures.

pub(crate) mod system;

pub use system::SystemInterfaces;

use std::io;

use tracing::error;

use crate::error::AgentError;
use crate::protocol::{InterfaceFlags, InterfaceRecord, LinkType};

// ARPHRD_* hardware families from <net/if_arp.h>
pub const ARPHRD_ETHER: u16 = 1;
pub const ARPHRD_PPP: u16 = 512;
pub const ARPHRD_LOOPBACK: u16 = 772;
pub const ARPHRD_NONE: u16 = 0xfffe;

// IFF_* flag bits from <net/if.h>
pub const IFF_UP: u32 = 0x1;
pub const IFF_PROMISC: u32 = 0x100;

/// One entry of the OS interface-address list.
///
/// An interface appears once per address family, so the same name can show
/// up several times; only the link-layer entry is of interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEntry {
    pub name: String,
    pub flags: u32,
    pub link_layer: bool,
}

impl AddressEntry {
    pub fn is_up(&self) -> bool {
        self.flags & IFF_UP != 0
    }

    pub fn is_promiscuous(&self) -> bool {
        self.flags & IFF_PROMISC != 0
    }
}

/// Source of interface information.
pub trait InterfaceSource {
    /// List interface-address entries.
    fn entries(&self) -> io::Result<Vec<AddressEntry>>;

    /// Hardware address family (ARPHRD_*) of the named interface.
    fn hardware_type(&self, name: &str) -> io::Result<u16>;
}

/// Map an ARPHRD hardware family to the link type reported to the controller.
pub fn map_hardware_type(hardware: u16) -> LinkType {
    match hardware {
        ARPHRD_ETHER | ARPHRD_LOOPBACK => LinkType::Ethernet,
        ARPHRD_PPP => LinkType::LinuxCooked,
        ARPHRD_NONE => LinkType::RawIp,
        _ => LinkType::Unsupported,
    }
}

/// List the link-layer interfaces that are administratively up.
///
/// The returned vector's length is the count announced in the response.
pub fn enumerate(source: &dyn InterfaceSource) -> Result<Vec<InterfaceRecord>, AgentError> {
    let entries = source.entries().map_err(|e| {
        error!("getifaddrs: {}", e);
        AgentError::os("getifaddrs", e)
    })?;

    entries
        .iter()
        .filter(|entry| entry.link_layer && entry.is_up())
        .map(|entry| {
            let hardware = source.hardware_type(&entry.name).map_err(|e| {
                error!("ioctl[SIOCGIFHWADDR] on {}: {}", entry.name, e);
                AgentError::os("ioctl[SIOCGIFHWADDR]", e)
            })?;

            let mut flags = InterfaceFlags::empty();
            if entry.is_promiscuous() {
                flags.insert(InterfaceFlags::PROMISCUOUS);
            }

            Ok(InterfaceRecord {
                name: truncate_name(&entry.name),
                link_type: map_hardware_type(hardware),
                flags,
            })
        })
        .collect()
}

fn truncate_name(name: &str) -> String {
    crate::protocol::decode_name(&crate::protocol::encode_name(name))
}
