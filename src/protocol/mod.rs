//! Control channel protocol.
//!
//! Message layout lives in [`message`], record layouts in [`interface`] and
//! [`filter`]. The functions here move complete messages over a stream with
//! the transport helpers, keeping the declared record count and the records
//! actually transferred in step.

mod filter;
mod interface;
mod message;

pub use filter::{FilterInstruction, FilterProgram, INSTRUCTION_LEN, MAX_INSTRUCTIONS};
pub use interface::{
    decode_name, encode_name, InterfaceFlags, InterfaceRecord, LinkType, NAME_LEN, RECORD_LEN,
};
pub use message::{ControlMessage, MirrorHeader, HEADER_LEN};

use std::io::{Read, Write};

use crate::error::{AgentError, ProtocolError, TransportError};
use crate::transport::{read_all, write_all};

/// Records preallocated before any arrive; a declared count is untrusted.
const PREALLOC_RECORDS: usize = 256;

/// A complete mirror request: header fields plus the filter program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRequest {
    pub interface: Option<String>,
    pub promiscuous: bool,
    pub destination_port: u16,
    pub filter: FilterProgram,
}

impl MirrorRequest {
    pub fn header(&self) -> Result<MirrorHeader, ProtocolError> {
        let filter_len = u32::try_from(self.filter.len()).unwrap_or(u32::MAX);
        if filter_len > MAX_INSTRUCTIONS {
            return Err(ProtocolError::FilterTooLong {
                declared: filter_len,
                limit: MAX_INSTRUCTIONS,
            });
        }

        Ok(MirrorHeader {
            interface: self.interface.clone(),
            promiscuous: self.promiscuous,
            port: self.destination_port,
            filter_len,
        })
    }
}

/// Read and decode one message header.
pub fn read_message<R: Read + ?Sized>(stream: &mut R) -> Result<ControlMessage, AgentError> {
    let mut buf = [0u8; HEADER_LEN];
    read_all(stream, &mut buf)?;
    Ok(ControlMessage::decode(&buf)?)
}

pub fn write_message<W: Write + ?Sized>(
    stream: &mut W,
    message: &ControlMessage,
) -> Result<(), TransportError> {
    write_all(stream, &message.encode())
}

/// Write an IFLIST response. The record array is omitted when empty.
pub fn write_interface_list<W: Write + ?Sized>(
    stream: &mut W,
    records: &[InterfaceRecord],
) -> Result<(), AgentError> {
    let count =
        u32::try_from(records.len()).map_err(|_| ProtocolError::CountOverflow(records.len()))?;

    write_message(stream, &ControlMessage::IflistResponse { count })?;
    if count > 0 {
        let body: Vec<u8> = records.iter().flat_map(|r| r.encode()).collect();
        write_all(stream, &body)?;
    }
    Ok(())
}

/// Read exactly `count` interface records.
pub fn read_interface_list<R: Read + ?Sized>(
    stream: &mut R,
    count: u32,
) -> Result<Vec<InterfaceRecord>, TransportError> {
    let mut records = Vec::with_capacity((count as usize).min(PREALLOC_RECORDS));
    let mut buf = [0u8; RECORD_LEN];
    for _ in 0..count {
        read_all(stream, &mut buf)?;
        records.push(InterfaceRecord::decode(&buf));
    }
    Ok(records)
}

/// Write a MIRROR_REQUEST header followed by its filter program.
pub fn write_mirror_request<W: Write + ?Sized>(
    stream: &mut W,
    request: &MirrorRequest,
) -> Result<(), AgentError> {
    let header = request.header()?;
    write_message(stream, &ControlMessage::MirrorRequest(header))?;
    if !request.filter.is_empty() {
        let body: Vec<u8> = request
            .filter
            .instructions()
            .iter()
            .flat_map(|i| i.encode())
            .collect();
        write_all(stream, &body)?;
    }
    Ok(())
}

/// Read exactly `len` filter instructions.
pub fn read_filter_program<R: Read + ?Sized>(
    stream: &mut R,
    len: u32,
) -> Result<FilterProgram, TransportError> {
    let mut instructions = Vec::with_capacity((len as usize).min(MAX_INSTRUCTIONS as usize));
    let mut buf = [0u8; INSTRUCTION_LEN];
    for _ in 0..len {
        read_all(stream, &mut buf)?;
        instructions.push(FilterInstruction::decode(&buf));
    }
    Ok(FilterProgram::new(instructions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn records() -> Vec<InterfaceRecord> {
        vec![
            InterfaceRecord {
                name: "lo".to_string(),
                link_type: LinkType::Ethernet,
                flags: InterfaceFlags::empty(),
            },
            InterfaceRecord {
                name: "ppp0".to_string(),
                link_type: LinkType::LinuxCooked,
                flags: InterfaceFlags::PROMISCUOUS,
            },
        ]
    }

    #[test]
    fn interface_list_count_matches_records() {
        let mut wire = Vec::new();
        write_interface_list(&mut wire, &records()).unwrap();
        assert_eq!(wire.len(), HEADER_LEN + 2 * RECORD_LEN);

        let mut cursor = Cursor::new(wire);
        let count = match read_message(&mut cursor).unwrap() {
            ControlMessage::IflistResponse { count } => count,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(count, 2);
        assert_eq!(read_interface_list(&mut cursor, count).unwrap(), records());
    }

    #[test]
    fn empty_interface_list_is_header_only() {
        let mut wire = Vec::new();
        write_interface_list(&mut wire, &[]).unwrap();
        assert_eq!(wire.len(), HEADER_LEN);
    }

    #[test]
    fn truncated_record_run_is_an_error() {
        let mut wire = Vec::new();
        write_interface_list(&mut wire, &records()).unwrap();
        wire.truncate(HEADER_LEN + RECORD_LEN + 5);

        let mut cursor = Cursor::new(&wire[HEADER_LEN..]);
        assert!(matches!(
            read_interface_list(&mut cursor, 2),
            Err(TransportError::ShortTransfer {
                expected: RECORD_LEN,
                actual: 5
            })
        ));
    }

    #[test]
    fn huge_declared_count_fails_on_missing_records() {
        let mut wire = Vec::new();
        write_message(&mut wire, &ControlMessage::IflistResponse { count: u32::MAX }).unwrap();
        wire.extend_from_slice(&[0u8; 5]);

        let mut cursor = Cursor::new(wire);
        let count = match read_message(&mut cursor).unwrap() {
            ControlMessage::IflistResponse { count } => count,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(count, u32::MAX);
        assert!(matches!(
            read_interface_list(&mut cursor, count),
            Err(TransportError::ShortTransfer {
                expected: RECORD_LEN,
                actual: 5
            })
        ));
    }

    #[test]
    fn huge_filter_length_fails_on_missing_records() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(
            read_filter_program(&mut cursor, u32::MAX),
            Err(TransportError::Eof)
        ));
    }

    #[test]
    fn mirror_request_carries_filter() {
        let request = MirrorRequest {
            interface: Some("eth0".to_string()),
            promiscuous: true,
            destination_port: 9000,
            filter: FilterProgram::parse_ddd("2\n6 0 0 65535\n6 0 0 0\n").unwrap(),
        };
        let mut wire = Vec::new();
        write_mirror_request(&mut wire, &request).unwrap();
        assert_eq!(wire.len(), HEADER_LEN + 2 * INSTRUCTION_LEN);

        let mut cursor = Cursor::new(wire);
        let header = match read_message(&mut cursor).unwrap() {
            ControlMessage::MirrorRequest(header) => header,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(header.filter_len, 2);
        let filter = read_filter_program(&mut cursor, header.filter_len).unwrap();
        assert_eq!(filter, request.filter);
    }

    #[test]
    fn missing_filter_records_fail() {
        let mut cursor = Cursor::new(vec![0u8; INSTRUCTION_LEN]);
        assert!(matches!(
            read_filter_program(&mut cursor, 2),
            Err(TransportError::Eof)
        ));
    }

    #[test]
    fn empty_stream_header_is_eof() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(
            read_message(&mut cursor),
            Err(AgentError::Transport(TransportError::Eof))
        ));
    }
}
