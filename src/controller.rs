//! Controller side of the protocol.
//!
//! Issues one request per connection and decodes the replayed frames for
//! display.

use std::io::{Read, Write};

use pnet::packet::arp::ArpPacket;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use tracing::{debug, info};

use crate::error::{AgentError, ProtocolError};
use crate::protocol::{
    read_interface_list, read_message, write_message, write_mirror_request, ControlMessage,
    InterfaceRecord, LinkType, MirrorRequest,
};

/// Ask the agent for its interface list.
pub fn request_interfaces<S: Read + Write + ?Sized>(
    stream: &mut S,
) -> Result<Vec<InterfaceRecord>, AgentError> {
    write_message(stream, &ControlMessage::IflistRequest)?;

    let count = match read_message(stream)? {
        ControlMessage::IflistResponse { count } => count,
        other => return Err(ProtocolError::Unexpected(other.name()).into()),
    };
    debug!("agent reports {} interfaces", count);

    Ok(read_interface_list(stream, count)?)
}

/// Send a mirror request. The session lasts until `stream` is closed.
pub fn start_mirror<S: Write + ?Sized>(
    stream: &mut S,
    request: &MirrorRequest,
) -> Result<(), AgentError> {
    write_mirror_request(stream, request)?;
    info!(
        "requested mirror of {} to port {} ({} filter instructions)",
        request.interface.as_deref().unwrap_or("any"),
        request.destination_port,
        request.filter.len()
    );
    Ok(())
}

/// One-line description of a replayed frame.
///
/// `link` is the link type of the captured interface. Captures on all
/// interfaces arrive without a link header and are decoded as raw IP.
pub fn summarize_frame(link: LinkType, frame: &[u8]) -> String {
    let body = match link {
        LinkType::Ethernet => summarize_ethernet(frame),
        LinkType::RawIp => summarize_ip(frame),
        LinkType::LinuxCooked | LinkType::Unsupported => format!("{} frame", link),
    };
    format!("{} ({} bytes)", body, frame.len())
}

fn summarize_ethernet(frame: &[u8]) -> String {
    let Some(ethernet) = EthernetPacket::new(frame) else {
        return "truncated ethernet frame".to_string();
    };
    format!(
        "{} > {} {}",
        ethernet.get_source(),
        ethernet.get_destination(),
        summarize_ethertype(ethernet.get_ethertype(), ethernet.payload())
    )
}

fn summarize_ethertype(ethertype: EtherType, payload: &[u8]) -> String {
    if ethertype == EtherTypes::Ipv4 {
        summarize_ipv4(payload)
    } else if ethertype == EtherTypes::Ipv6 {
        summarize_ipv6(payload)
    } else if ethertype == EtherTypes::Arp {
        match ArpPacket::new(payload) {
            Some(arp) => format!(
                "ARP {} > {}",
                arp.get_sender_proto_addr(),
                arp.get_target_proto_addr()
            ),
            None => "ARP (truncated)".to_string(),
        }
    } else {
        format!("ethertype {:#06x}", ethertype.0)
    }
}

fn summarize_ip(packet: &[u8]) -> String {
    match packet.first().map(|b| b >> 4) {
        Some(4) => summarize_ipv4(packet),
        Some(6) => summarize_ipv6(packet),
        Some(version) => format!("IP version {}", version),
        None => "empty frame".to_string(),
    }
}

fn summarize_ipv4(packet: &[u8]) -> String {
    match Ipv4Packet::new(packet) {
        Some(ip) => format!(
            "IPv4 {} > {}: {}",
            ip.get_source(),
            ip.get_destination(),
            summarize_transport(ip.get_next_level_protocol(), ip.payload())
        ),
        None => "IPv4 (truncated)".to_string(),
    }
}

fn summarize_ipv6(packet: &[u8]) -> String {
    match Ipv6Packet::new(packet) {
        Some(ip) => format!(
            "IPv6 {} > {}: {}",
            ip.get_source(),
            ip.get_destination(),
            summarize_transport(ip.get_next_header(), ip.payload())
        ),
        None => "IPv6 (truncated)".to_string(),
    }
}

fn summarize_transport(protocol: IpNextHeaderProtocol, payload: &[u8]) -> String {
    if protocol == IpNextHeaderProtocols::Tcp {
        match TcpPacket::new(payload) {
            Some(tcp) => format!("tcp {} > {}", tcp.get_source(), tcp.get_destination()),
            None => "tcp (truncated)".to_string(),
        }
    } else if protocol == IpNextHeaderProtocols::Udp {
        match UdpPacket::new(payload) {
            Some(udp) => format!("udp {} > {}", udp.get_source(), udp.get_destination()),
            None => "udp (truncated)".to_string(),
        }
    } else if protocol == IpNextHeaderProtocols::Icmp {
        "icmp".to_string()
    } else if protocol == IpNextHeaderProtocols::Icmpv6 {
        "icmp6".to_string()
    } else {
        format!("protocol {}", protocol.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{write_interface_list, FilterProgram, InterfaceFlags, HEADER_LEN};
    use pnet::packet::ethernet::MutableEthernetPacket;
    use pnet::packet::ipv4::MutableIpv4Packet;
    use pnet::packet::ipv6::MutableIpv6Packet;
    use pnet::packet::tcp::MutableTcpPacket;
    use pnet::packet::udp::MutableUdpPacket;
    use pnet::util::MacAddr;
    use std::io::{self, Cursor};
    use std::net::{Ipv4Addr, Ipv6Addr};

    /// Scripted agent: reads from `input`, records what the controller wrote.
    struct FakeAgent {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for FakeAgent {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for FakeAgent {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn udp_over_ipv4() -> Vec<u8> {
        let mut buf = vec![0u8; 14 + 20 + 8];
        {
            let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
            eth.set_source(MacAddr::new(0x00, 0x11, 0x22, 0x33, 0x44, 0x55));
            eth.set_destination(MacAddr::new(0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb));
            eth.set_ethertype(EtherTypes::Ipv4);
        }
        {
            let mut ip = MutableIpv4Packet::new(&mut buf[14..]).unwrap();
            ip.set_version(4);
            ip.set_header_length(5);
            ip.set_total_length(28);
            ip.set_ttl(64);
            ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
            ip.set_source(Ipv4Addr::new(10, 0, 0, 1));
            ip.set_destination(Ipv4Addr::new(10, 0, 0, 2));
        }
        {
            let mut udp = MutableUdpPacket::new(&mut buf[34..]).unwrap();
            udp.set_source(5353);
            udp.set_destination(53);
            udp.set_length(8);
        }
        buf
    }

    fn tcp_over_ipv6() -> Vec<u8> {
        let mut buf = vec![0u8; 40 + 20];
        {
            let mut ip = MutableIpv6Packet::new(&mut buf).unwrap();
            ip.set_version(6);
            ip.set_payload_length(20);
            ip.set_next_header(IpNextHeaderProtocols::Tcp);
            ip.set_hop_limit(64);
            ip.set_source(Ipv6Addr::LOCALHOST);
            ip.set_destination(Ipv6Addr::LOCALHOST);
        }
        {
            let mut tcp = MutableTcpPacket::new(&mut buf[40..]).unwrap();
            tcp.set_source(40000);
            tcp.set_destination(443);
            tcp.set_data_offset(5);
        }
        buf
    }

    mod request_tests {
        use super::*;

        #[test]
        fn interface_list_round_trip() {
            let records = vec![InterfaceRecord {
                name: "eth0".to_string(),
                link_type: LinkType::Ethernet,
                flags: InterfaceFlags::PROMISCUOUS,
            }];
            let mut response = Vec::new();
            write_interface_list(&mut response, &records).unwrap();

            let mut agent = FakeAgent {
                input: Cursor::new(response),
                written: Vec::new(),
            };
            assert_eq!(request_interfaces(&mut agent).unwrap(), records);
            assert_eq!(agent.written.len(), HEADER_LEN);
            assert_eq!(agent.written[0], 0x01);
        }

        #[test]
        fn wrong_response_is_protocol_error() {
            let mut agent = FakeAgent {
                input: Cursor::new(ControlMessage::IflistRequest.encode().to_vec()),
                written: Vec::new(),
            };
            assert!(matches!(
                request_interfaces(&mut agent),
                Err(AgentError::Protocol(ProtocolError::Unexpected(_)))
            ));
        }

        #[test]
        fn agent_closing_early_is_transport_error() {
            let mut agent = FakeAgent {
                input: Cursor::new(Vec::new()),
                written: Vec::new(),
            };
            let err = request_interfaces(&mut agent).unwrap_err();
            assert_eq!(err.exit_code(), crate::error::exit::DATAERR);
        }

        #[test]
        fn mirror_request_written_with_filter() {
            let request = MirrorRequest {
                interface: None,
                promiscuous: false,
                destination_port: 9000,
                filter: FilterProgram::parse_ddd("1\n6 0 0 262144\n").unwrap(),
            };
            let mut wire = Vec::new();
            start_mirror(&mut wire, &request).unwrap();
            assert_eq!(wire.len(), HEADER_LEN + 8);
            assert_eq!(wire[0], 0x03);
            assert_eq!(&wire[18..20], &9000u16.to_be_bytes());
        }
    }

    mod summary_tests {
        use super::*;

        #[test]
        fn ethernet_ipv4_udp() {
            let summary = summarize_frame(LinkType::Ethernet, &udp_over_ipv4());
            assert_eq!(
                summary,
                "00:11:22:33:44:55 > 66:77:88:99:aa:bb IPv4 10.0.0.1 > 10.0.0.2: udp 5353 > 53 (42 bytes)"
            );
        }

        #[test]
        fn raw_ipv6_tcp() {
            let summary = summarize_frame(LinkType::RawIp, &tcp_over_ipv6());
            assert_eq!(summary, "IPv6 ::1 > ::1: tcp 40000 > 443 (60 bytes)");
        }

        #[test]
        fn raw_ip_without_link_header() {
            let frame = udp_over_ipv4();
            let summary = summarize_frame(LinkType::RawIp, &frame[14..]);
            assert!(summary.starts_with("IPv4 10.0.0.1 > 10.0.0.2: udp"));
        }

        #[test]
        fn short_and_unknown_frames() {
            assert_eq!(
                summarize_frame(LinkType::Ethernet, &[0u8; 6]),
                "truncated ethernet frame (6 bytes)"
            );
            assert_eq!(summarize_frame(LinkType::RawIp, &[]), "empty frame (0 bytes)");

            let mut frame = udp_over_ipv4();
            frame[12..14].copy_from_slice(&0x88ccu16.to_be_bytes());
            assert!(summarize_frame(LinkType::Ethernet, &frame).contains("ethertype 0x88cc"));
        }
    }
}
