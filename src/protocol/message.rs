//! Control message header.
//!
//! Every message starts with a fixed `HEADER_LEN` byte header: a one byte
//! code followed by a zero padded, code specific payload. Variable length
//! payloads (interface records, filter instructions) follow the header as a
//! run of fixed size records whose count the header declares.

use super::filter::MAX_INSTRUCTIONS;
use super::interface::{decode_name, encode_name, NAME_LEN};
use crate::error::ProtocolError;

pub const HEADER_LEN: usize = 24;

const CODE_IFLIST_REQUEST: u8 = 0x01;
const CODE_IFLIST_RESPONSE: u8 = 0x02;
const CODE_MIRROR_REQUEST: u8 = 0x03;

// MIRROR_REQUEST payload offsets
const MIRROR_INTERFACE: usize = 1;
const MIRROR_PROMISC: usize = MIRROR_INTERFACE + NAME_LEN;
const MIRROR_PORT: usize = MIRROR_PROMISC + 1;
const MIRROR_FILTER_LEN: usize = MIRROR_PORT + 2;

const _: () = assert!(MIRROR_FILTER_LEN + 4 == HEADER_LEN);

/// Fixed part of a mirror request. The filter program follows on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorHeader {
    pub interface: Option<String>,
    pub promiscuous: bool,
    pub port: u16,
    pub filter_len: u32,
}

/// A decoded control message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    IflistRequest,
    IflistResponse { count: u32 },
    MirrorRequest(MirrorHeader),
}

impl ControlMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::IflistRequest => "IFLIST_REQUEST",
            ControlMessage::IflistResponse { .. } => "IFLIST_RESPONSE",
            ControlMessage::MirrorRequest(_) => "MIRROR_REQUEST",
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];

        match self {
            ControlMessage::IflistRequest => buf[0] = CODE_IFLIST_REQUEST,
            ControlMessage::IflistResponse { count } => {
                buf[0] = CODE_IFLIST_RESPONSE;
                buf[1..5].copy_from_slice(&count.to_be_bytes());
            }
            ControlMessage::MirrorRequest(mirror) => {
                buf[0] = CODE_MIRROR_REQUEST;
                if let Some(name) = &mirror.interface {
                    buf[MIRROR_INTERFACE..MIRROR_PROMISC].copy_from_slice(&encode_name(name));
                }
                buf[MIRROR_PROMISC] = mirror.promiscuous as u8;
                buf[MIRROR_PORT..MIRROR_FILTER_LEN].copy_from_slice(&mirror.port.to_be_bytes());
                buf[MIRROR_FILTER_LEN..].copy_from_slice(&mirror.filter_len.to_be_bytes());
            }
        }

        buf
    }

    /// Decode a header. The code is checked first and selects the payload layout.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        match buf[0] {
            CODE_IFLIST_REQUEST => Ok(ControlMessage::IflistRequest),
            CODE_IFLIST_RESPONSE => Ok(ControlMessage::IflistResponse {
                count: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            }),
            CODE_MIRROR_REQUEST => decode_mirror(buf).map(ControlMessage::MirrorRequest),
            code => Err(ProtocolError::UnknownCode(code)),
        }
    }
}

fn decode_mirror(buf: &[u8; HEADER_LEN]) -> Result<MirrorHeader, ProtocolError> {
    let mut name = [0u8; NAME_LEN];
    name.copy_from_slice(&buf[MIRROR_INTERFACE..MIRROR_PROMISC]);

    let interface = if name[0] == 0 {
        None
    } else {
        Some(decode_name(&name))
    };

    let filter_len = u32::from_be_bytes([
        buf[MIRROR_FILTER_LEN],
        buf[MIRROR_FILTER_LEN + 1],
        buf[MIRROR_FILTER_LEN + 2],
        buf[MIRROR_FILTER_LEN + 3],
    ]);
    if filter_len > MAX_INSTRUCTIONS {
        return Err(ProtocolError::FilterTooLong {
            declared: filter_len,
            limit: MAX_INSTRUCTIONS,
        });
    }

    Ok(MirrorHeader {
        interface,
        promiscuous: buf[MIRROR_PROMISC] != 0,
        port: u16::from_be_bytes([buf[MIRROR_PORT], buf[MIRROR_PORT + 1]]),
        filter_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iflist_request_is_bare_code() {
        let buf = ControlMessage::IflistRequest.encode();
        assert_eq!(buf[0], 0x01);
        assert!(buf[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn iflist_response_count() {
        let buf = ControlMessage::IflistResponse { count: 0x0102_0304 }.encode();
        assert_eq!(&buf[..5], &[0x02, 1, 2, 3, 4]);
        assert_eq!(
            ControlMessage::decode(&buf).unwrap(),
            ControlMessage::IflistResponse { count: 0x0102_0304 }
        );
    }

    #[test]
    fn mirror_request_layout() {
        let msg = ControlMessage::MirrorRequest(MirrorHeader {
            interface: Some("eth0".to_string()),
            promiscuous: true,
            port: 9000,
            filter_len: 4,
        });
        let buf = msg.encode();
        assert_eq!(buf[0], 0x03);
        assert_eq!(&buf[1..5], b"eth0");
        assert_eq!(buf[17], 1);
        assert_eq!(&buf[18..20], &9000u16.to_be_bytes());
        assert_eq!(&buf[20..24], &[0, 0, 0, 4]);
        assert_eq!(ControlMessage::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn empty_interface_means_any() {
        let msg = ControlMessage::MirrorRequest(MirrorHeader {
            interface: None,
            promiscuous: false,
            port: 9000,
            filter_len: 0,
        });
        match ControlMessage::decode(&msg.encode()).unwrap() {
            ControlMessage::MirrorRequest(header) => assert_eq!(header.interface, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_code_rejected() {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = 0x7f;
        assert!(matches!(
            ControlMessage::decode(&buf),
            Err(ProtocolError::UnknownCode(0x7f))
        ));
        buf[0] = 0;
        assert!(matches!(
            ControlMessage::decode(&buf),
            Err(ProtocolError::UnknownCode(0))
        ));
    }

    #[test]
    fn oversized_filter_rejected_before_reading() {
        let mut buf = ControlMessage::MirrorRequest(MirrorHeader {
            interface: None,
            promiscuous: false,
            port: 1,
            filter_len: 0,
        })
        .encode();
        buf[20..24].copy_from_slice(&(MAX_INSTRUCTIONS + 1).to_be_bytes());
        assert!(matches!(
            ControlMessage::decode(&buf),
            Err(ProtocolError::FilterTooLong { declared: 4097, .. })
        ));
    }
}
