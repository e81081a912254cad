//! Wire format of a TCP segment inside IPv4 inside Ethernet.
//!
//! Checksums follow the usual rules: the IPv4 header checksum is the 16 bit
//! one's complement sum over the header, the TCP checksum covers the pseudo
//! header (source, destination, protocol, TCP length) followed by the TCP
//! header and payload. Frames shorter than the Ethernet minimum are padded
//! with zeros that no checksum covers.

use std::fmt::Display;
use std::net::Ipv4Addr;

use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::tcp::{self, MutableTcpPacket, TcpPacket};
use pnet::packet::MutablePacket;
use pnet::util::MacAddr;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
pub const MIN_FRAME_LEN: usize = 60;

/// Header fields of an outgoing segment.
#[derive(Clone, Debug)]
pub struct SegmentHeader {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub urgent_ptr: u16,
    pub identification: u16,
    pub fragment_offset: u16,
    pub ttl: u8,
}

/// A validated incoming segment borrowing its payload from the frame.
#[derive(Clone, Debug)]
pub struct Segment<'a> {
    pub src_mac: MacAddr,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub payload: &'a [u8],
}

impl Segment<'_> {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    Truncated,
    NotIpv4,
    NotTcp,
    Ipv4Checksum { expected: u16, found: u16 },
    TcpChecksum { expected: u16, found: u16 },
}

impl SegmentError {
    pub fn is_checksum(&self) -> bool {
        matches!(
            self,
            SegmentError::Ipv4Checksum { .. } | SegmentError::TcpChecksum { .. }
        )
    }
}

impl Display for SegmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentError::Truncated => f.write_str("truncated frame"),
            SegmentError::NotIpv4 => f.write_str("not an IPv4 frame"),
            SegmentError::NotTcp => f.write_str("not a TCP packet"),
            SegmentError::Ipv4Checksum { expected, found } => {
                write!(f, "IPv4 header sum error: {:04X} -> {:04X}", found, expected)
            }
            SegmentError::TcpChecksum { expected, found } => {
                write!(f, "TCP sum error: {:04X} -> {:04X}", found, expected)
            }
        }
    }
}

/// Total frame size for a segment carrying `payload_len` bytes.
pub fn frame_len(payload_len: usize) -> usize {
    (ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + TCP_HEADER_LEN + payload_len).max(MIN_FRAME_LEN)
}

/// Writes a full frame into `buffer` and returns its length.
///
/// Returns `None` when `buffer` is shorter than `frame_len(payload.len())`.
pub fn build(buffer: &mut [u8], header: &SegmentHeader, payload: &[u8]) -> Option<usize> {
    let tcp_len = TCP_HEADER_LEN + payload.len();
    let ipv4_len = IPV4_HEADER_LEN + tcp_len;
    let len = frame_len(payload.len());

    let buffer = buffer.get_mut(..len)?;
    buffer.fill(0);

    let mut ethernet_packet = MutableEthernetPacket::new(buffer)?;
    ethernet_packet.set_destination(header.dst_mac);
    ethernet_packet.set_source(header.src_mac);
    ethernet_packet.set_ethertype(EtherTypes::Ipv4);

    let mut ipv4_packet = MutableIpv4Packet::new(&mut ethernet_packet.payload_mut()[..ipv4_len])?;
    ipv4_packet.set_version(4);
    ipv4_packet.set_header_length(5);
    ipv4_packet.set_dscp(0);
    ipv4_packet.set_ecn(0);
    ipv4_packet.set_total_length(ipv4_len as u16);
    ipv4_packet.set_identification(header.identification);
    ipv4_packet.set_flags(0);
    ipv4_packet.set_fragment_offset(header.fragment_offset);
    ipv4_packet.set_ttl(header.ttl);
    ipv4_packet.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
    ipv4_packet.set_checksum(0);
    ipv4_packet.set_source(header.src_addr);
    ipv4_packet.set_destination(header.dst_addr);

    {
        let mut tcp_packet = MutableTcpPacket::new(ipv4_packet.payload_mut())?;
        tcp_packet.set_source(header.src_port);
        tcp_packet.set_destination(header.dst_port);
        tcp_packet.set_sequence(header.seq);
        tcp_packet.set_acknowledgement(header.ack);
        tcp_packet.set_data_offset((TCP_HEADER_LEN / 4) as u8);
        tcp_packet.set_reserved(0);
        tcp_packet.set_flags(header.flags);
        tcp_packet.set_window(header.window);
        tcp_packet.set_checksum(0);
        tcp_packet.set_urgent_ptr(header.urgent_ptr);
        tcp_packet.set_payload(payload);
        tcp_packet.set_checksum(tcp::ipv4_checksum(
            &tcp_packet.to_immutable(),
            &header.src_addr,
            &header.dst_addr,
        ));
    }

    ipv4_packet.set_checksum(ipv4::checksum(&ipv4_packet.to_immutable()));
    Some(len)
}

/// Validates a received frame and extracts its TCP segment.
///
/// The IPv4 header checksum is checked first, then the TCP checksum over the
/// pseudo header and the segment as delimited by the IPv4 total length, so
/// Ethernet padding is ignored.
pub fn parse(frame: &[u8]) -> Result<Segment<'_>, SegmentError> {
    let ethernet_packet = EthernetPacket::new(frame).ok_or(SegmentError::Truncated)?;
    if ethernet_packet.get_ethertype() != EtherTypes::Ipv4 {
        return Err(SegmentError::NotIpv4);
    }

    let ip_bytes = &frame[ETHERNET_HEADER_LEN..];
    let ipv4_packet = Ipv4Packet::new(ip_bytes).ok_or(SegmentError::Truncated)?;
    if ipv4_packet.get_version() != 4 {
        return Err(SegmentError::NotIpv4);
    }
    if ipv4_packet.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
        return Err(SegmentError::NotTcp);
    }

    let header_len = ipv4_packet.get_header_length() as usize * 4;
    let total_len = ipv4_packet.get_total_length() as usize;
    if header_len < IPV4_HEADER_LEN
        || total_len < header_len + TCP_HEADER_LEN
        || total_len > ip_bytes.len()
    {
        return Err(SegmentError::Truncated);
    }

    let expected = ipv4::checksum(&ipv4_packet);
    if expected != ipv4_packet.get_checksum() {
        return Err(SegmentError::Ipv4Checksum {
            expected,
            found: ipv4_packet.get_checksum(),
        });
    }

    let src_addr = ipv4_packet.get_source();
    let dst_addr = ipv4_packet.get_destination();

    let tcp_bytes = &ip_bytes[header_len..total_len];
    let tcp_packet = TcpPacket::new(tcp_bytes).ok_or(SegmentError::Truncated)?;
    let data_offset = tcp_packet.get_data_offset() as usize * 4;
    if data_offset < TCP_HEADER_LEN || data_offset > tcp_bytes.len() {
        return Err(SegmentError::Truncated);
    }

    let expected = tcp::ipv4_checksum(&tcp_packet, &src_addr, &dst_addr);
    if expected != tcp_packet.get_checksum() {
        return Err(SegmentError::TcpChecksum {
            expected,
            found: tcp_packet.get_checksum(),
        });
    }

    Ok(Segment {
        src_mac: ethernet_packet.get_source(),
        src_addr,
        dst_addr,
        src_port: tcp_packet.get_source(),
        dst_port: tcp_packet.get_destination(),
        seq: tcp_packet.get_sequence(),
        ack: tcp_packet.get_acknowledgement(),
        flags: tcp_packet.get_flags(),
        window: tcp_packet.get_window(),
        payload: &tcp_bytes[data_offset..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::tcp::TcpFlags;

    fn header() -> SegmentHeader {
        SegmentHeader {
            src_mac: MacAddr::new(0x02, 0, 0, 0, 0, 1),
            dst_mac: MacAddr::new(0x02, 0, 0, 0, 0, 2),
            src_addr: Ipv4Addr::new(10, 0, 0, 1),
            dst_addr: Ipv4Addr::new(10, 0, 0, 5),
            src_port: 8080,
            dst_port: 40000,
            seq: 0x1234_5678,
            ack: 1001,
            flags: TcpFlags::PSH | TcpFlags::ACK,
            window: 0xffff,
            urgent_ptr: 0,
            identification: 7,
            fragment_offset: 0,
            ttl: 255,
        }
    }

    #[test]
    fn test_ipv4_header_checksum() {
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let packet = Ipv4Packet::new(&header).unwrap();
        assert_eq!(ipv4::checksum(&packet), 0xb861);
    }

    #[test]
    fn test_build_pads_short_frame() {
        let mut buffer = [0xaau8; 128];
        let len = build(&mut buffer, &header(), b"").unwrap();
        assert_eq!(len, MIN_FRAME_LEN);
        assert!(buffer[54..60].iter().all(|&b| b == 0));

        let segment = parse(&buffer[..len]).unwrap();
        assert!(segment.payload.is_empty());
        assert_eq!(segment.flags, TcpFlags::PSH | TcpFlags::ACK);
    }

    #[test]
    fn test_build_parse() {
        let mut buffer = [0u8; 128];
        let len = build(&mut buffer, &header(), b"payload!").unwrap();
        assert_eq!(len, 14 + 20 + 20 + 8);

        let ipv4_packet = Ipv4Packet::new(&buffer[14..len]).unwrap();
        assert_eq!(ipv4_packet.get_total_length(), 48);
        assert_eq!(ipv4_packet.get_ttl(), 255);
        assert_eq!(ipv4_packet.get_identification(), 7);

        let segment = parse(&buffer[..len]).unwrap();
        assert_eq!(segment.src_addr, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(segment.dst_addr, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(segment.src_port, 8080);
        assert_eq!(segment.dst_port, 40000);
        assert_eq!(segment.seq, 0x1234_5678);
        assert_eq!(segment.ack, 1001);
        assert_eq!(segment.payload, b"payload!");
        assert!(segment.has(TcpFlags::PSH));
        assert!(!segment.has(TcpFlags::SYN));
    }

    #[test]
    fn test_build_buffer_too_small() {
        let mut buffer = [0u8; 40];
        assert!(build(&mut buffer, &header(), b"").is_none());
    }

    #[test]
    fn test_reject_tcp_checksum() {
        let mut buffer = [0u8; 128];
        let len = build(&mut buffer, &header(), b"payload!").unwrap();
        buffer[len - 1] ^= 0xff;
        assert!(matches!(
            parse(&buffer[..len]),
            Err(SegmentError::TcpChecksum { .. })
        ));
    }

    #[test]
    fn test_reject_ipv4_checksum() {
        let mut buffer = [0u8; 128];
        let len = build(&mut buffer, &header(), b"hello").unwrap();
        // time to live
        buffer[14 + 8] = 1;
        let err = parse(&buffer[..len]).unwrap_err();
        assert!(matches!(err, SegmentError::Ipv4Checksum { .. }));
        assert!(err.is_checksum());
    }

    #[test]
    fn test_reject_truncated() {
        let mut buffer = [0u8; 128];
        let len = build(&mut buffer, &header(), b"payload!").unwrap();
        assert_eq!(parse(&buffer[..10]).unwrap_err(), SegmentError::Truncated);
        assert_eq!(parse(&buffer[..len - 1]).unwrap_err(), SegmentError::Truncated);
    }

    #[test]
    fn test_padding_not_covered() {
        let mut buffer = [0u8; 128];
        let len = build(&mut buffer, &header(), b"hello").unwrap();
        assert_eq!(len, MIN_FRAME_LEN);

        // trailing pad byte is outside both checksums
        buffer[len - 1] ^= 0xff;
        assert_eq!(parse(&buffer[..len]).unwrap().payload, b"hello");

        // last payload byte is covered
        buffer[14 + 20 + 20 + 4] ^= 0xff;
        assert!(matches!(
            parse(&buffer[..len]),
            Err(SegmentError::TcpChecksum { .. })
        ));
    }
}
