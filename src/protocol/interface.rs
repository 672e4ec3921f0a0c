//! Interface records carried in an IFLIST response.

use std::fmt;

/// Wire size of an interface name, matching the kernel's IFNAMSIZ.
pub const NAME_LEN: usize = 16;

/// Encoded size of one [`InterfaceRecord`].
pub const RECORD_LEN: usize = NAME_LEN + 1 + 4;

/// Framing of captured data, as a pcap DLT number on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    Ethernet,
    RawIp,
    LinuxCooked,
    Unsupported,
}

impl LinkType {
    pub fn as_u8(self) -> u8 {
        match self {
            LinkType::Ethernet => 1,
            LinkType::RawIp => 12,
            LinkType::LinuxCooked => 113,
            LinkType::Unsupported => 255,
        }
    }

    /// Unknown tags decode as `Unsupported`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkType::Ethernet,
            12 => LinkType::RawIp,
            113 => LinkType::LinuxCooked,
            _ => LinkType::Unsupported,
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkType::Ethernet => write!(f, "EN10MB"),
            LinkType::RawIp => write!(f, "RAW"),
            LinkType::LinuxCooked => write!(f, "LINUX_SLL"),
            LinkType::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Per-interface flag bits. Values follow the kernel's IFF_* bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceFlags(u32);

impl InterfaceFlags {
    pub const PROMISCUOUS: InterfaceFlags = InterfaceFlags(0x100);

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Keep only the bits the protocol defines.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::PROMISCUOUS.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: InterfaceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: InterfaceFlags) {
        self.0 |= other.0;
    }
}

/// One interface as reported to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub name: String,
    pub link_type: LinkType,
    pub flags: InterfaceFlags,
}

impl InterfaceRecord {
    pub fn is_promiscuous(&self) -> bool {
        self.flags.contains(InterfaceFlags::PROMISCUOUS)
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[..NAME_LEN].copy_from_slice(&encode_name(&self.name));
        buf[NAME_LEN] = self.link_type.as_u8();
        buf[NAME_LEN + 1..].copy_from_slice(&self.flags.bits().to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; RECORD_LEN]) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&buf[..NAME_LEN]);
        let flags = u32::from_be_bytes([
            buf[NAME_LEN + 1],
            buf[NAME_LEN + 2],
            buf[NAME_LEN + 3],
            buf[NAME_LEN + 4],
        ]);

        Self {
            name: decode_name(&name),
            link_type: LinkType::from_u8(buf[NAME_LEN]),
            flags: InterfaceFlags::from_bits_truncate(flags),
        }
    }
}

/// Copy a name into a fixed NUL-padded field, truncating to `NAME_LEN` bytes.
pub fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut buf = [0u8; NAME_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_LEN);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

/// Read a NUL-padded name field. The field may be full with no terminator.
pub fn decode_name(buf: &[u8; NAME_LEN]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
