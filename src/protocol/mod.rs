pub mod ethernet;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;

use std::fmt;
use std::net::IpAddr;

/// EtherType values the parser distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Ipv6,
    VlanTagged,
    Unknown(u16),
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        match value {
            0x0800 => EtherType::Ipv4,
            0x86DD => EtherType::Ipv6,
            0x8100 => EtherType::VlanTagged,
            other => EtherType::Unknown(other),
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::Ipv4 => write!(f, "IPv4"),
            EtherType::Ipv6 => write!(f, "IPv6"),
            EtherType::VlanTagged => write!(f, "802.1Q VLAN"),
            EtherType::Unknown(v) => write!(f, "Unknown(0x{:04x})", v),
        }
    }
}

/// IP protocol numbers. Only TCP is tracked; the rest are named for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
    Icmpv6,
    Unknown(u8),
}

impl From<u8> for IpProtocol {
    fn from(value: u8) -> Self {
        match value {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            58 => IpProtocol::Icmpv6,
            other => IpProtocol::Unknown(other),
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
            IpProtocol::Icmpv6 => write!(f, "ICMPv6"),
            IpProtocol::Unknown(v) => write!(f, "Proto({})", v),
        }
    }
}

/// Errors from protocol parsing
#[derive(Debug)]
pub enum ParseError {
    /// Not enough bytes to parse the header
    TooShort { expected: usize, actual: usize },
    /// Invalid header values
    InvalidHeader(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::TooShort { expected, actual } => {
                write!(f, "packet too short: need {} bytes, got {}", expected, actual)
            }
            ParseError::InvalidHeader(msg) => write!(f, "invalid header: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Add `data` as big-endian 16-bit words to a running ones'-complement sum.
/// An odd trailing byte is padded with zero on the right.
pub fn checksum_add(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([pair[0], pair[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }
    sum
}

/// Fold carries back into the low 16 bits.
pub fn checksum_fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// VLAN tag (802.1Q)
#[derive(Debug, Clone, Copy)]
pub struct VlanTag {
    pub priority: u8,
    pub dei: bool,
    pub vlan_id: u16,
}

/// Network layer header
#[derive(Debug)]
pub enum NetworkHeader<'a> {
    Ipv4(ipv4::Ipv4Header<'a>),
    Ipv6(ipv6::Ipv6Header<'a>),
}

impl<'a> NetworkHeader<'a> {
    pub fn src_ip(&self) -> IpAddr {
        match self {
            NetworkHeader::Ipv4(h) => IpAddr::V4(h.src_addr()),
            NetworkHeader::Ipv6(h) => IpAddr::V6(h.src_addr()),
        }
    }

    pub fn dst_ip(&self) -> IpAddr {
        match self {
            NetworkHeader::Ipv4(h) => IpAddr::V4(h.dst_addr()),
            NetworkHeader::Ipv6(h) => IpAddr::V6(h.dst_addr()),
        }
    }

    pub fn protocol(&self) -> IpProtocol {
        match self {
            NetworkHeader::Ipv4(h) => h.protocol(),
            NetworkHeader::Ipv6(h) => h.next_header(),
        }
    }

    /// Upper-layer length declared by the IP header, which may exceed what
    /// was captured when the snap length truncates the frame.
    pub fn declared_l4_len(&self) -> usize {
        match self {
            NetworkHeader::Ipv4(h) => h.declared_payload_len(),
            NetworkHeader::Ipv6(h) => h.payload_length() as usize,
        }
    }

    pub fn pseudo_header_sum(&self, l4_len: usize) -> u32 {
        match self {
            NetworkHeader::Ipv4(h) => h.pseudo_header_sum(l4_len),
            NetworkHeader::Ipv6(h) => h.pseudo_header_sum(l4_len),
        }
    }
}

/// A parsed frame, referencing the original byte slice.
#[derive(Debug)]
pub struct ParsedPacket<'a> {
    pub vlan: Option<VlanTag>,
    pub network: NetworkHeader<'a>,
    /// TCP header and captured payload. `None` for other protocols and for
    /// IPv4 fragments, which cannot be tracked without reassembly.
    pub tcp: Option<&'a [u8]>,
}

impl<'a> ParsedPacket<'a> {
    /// True when every byte the IP header declares for TCP was captured.
    pub fn tcp_fully_captured(&self) -> bool {
        self.tcp
            .map(|bytes| bytes.len() == self.network.declared_l4_len())
            .unwrap_or(false)
    }
}

/// Parse a frame down to the TCP bytes.
/// Frames that are not IPv4/IPv6 are an error; non-TCP datagrams are not.
pub fn parse_packet(data: &[u8]) -> Result<ParsedPacket<'_>, ParseError> {
    let eth = ethernet::EthernetHeader::parse(data)?;
    let mut remaining = eth.payload();
    let mut ether_type = eth.ether_type();
    let mut vlan = None;

    if ether_type == EtherType::VlanTagged {
        if remaining.len() < ethernet::VLAN_TAG_LEN {
            return Err(ParseError::TooShort {
                expected: ethernet::VLAN_TAG_LEN,
                actual: remaining.len(),
            });
        }
        let tci = u16::from_be_bytes([remaining[0], remaining[1]]);
        vlan = Some(VlanTag {
            priority: (tci >> 13) as u8,
            dei: (tci >> 12) & 1 == 1,
            vlan_id: tci & 0x0FFF,
        });
        ether_type = EtherType::from(u16::from_be_bytes([remaining[2], remaining[3]]));
        remaining = &remaining[ethernet::VLAN_TAG_LEN..];
    }

    let (network, tcp) = match ether_type {
        EtherType::Ipv4 => {
            let hdr = ipv4::Ipv4Header::parse(remaining)?;
            let tcp = (hdr.protocol() == IpProtocol::Tcp && !hdr.is_fragment())
                .then(|| hdr.payload());
            (NetworkHeader::Ipv4(hdr), tcp)
        }
        EtherType::Ipv6 => {
            let hdr = ipv6::Ipv6Header::parse(remaining)?;
            let tcp = (hdr.next_header() == IpProtocol::Tcp).then(|| hdr.payload());
            (NetworkHeader::Ipv6(hdr), tcp)
        }
        other => {
            return Err(ParseError::InvalidHeader(format!(
                "unsupported ethertype {}",
                other
            )))
        }
    };

    Ok(ParsedPacket { vlan, network, tcp })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(vlan: bool, proto: u8, frag: bool) -> Vec<u8> {
        let mut frame = vec![0u8; 12];
        if vlan {
            frame.extend_from_slice(&[0x81, 0x00, 0x20, 0x0A]); // prio 1, id 10
        }
        frame.extend_from_slice(&[0x08, 0x00]);
        let mut ip = vec![
            0x45, 0x00, 0x00, 0x28, 0x00, 0x01, 0x00, 0x00, 64, proto, 0x00, 0x00, 10, 0, 0, 1,
            10, 0, 0, 2,
        ];
        if frag {
            ip[6] = 0x20;
        }
        frame.extend_from_slice(&ip);
        let mut tcp = [0u8; 20];
        tcp[12] = 0x50;
        tcp[13] = tcp::flags::SYN;
        frame.extend_from_slice(&tcp);
        frame
    }

    #[test]
    fn checksum_helpers_handle_odd_length() {
        assert_eq!(checksum_add(0, &[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
        assert_eq!(checksum_fold(0x1_FFFE), 0xFFFF);
    }

    #[test]
    fn parse_tcp_frame() {
        let frame = make_frame(false, 6, false);
        let pkt = parse_packet(&frame).unwrap();
        assert!(pkt.vlan.is_none());
        assert_eq!(pkt.network.protocol(), IpProtocol::Tcp);
        assert_eq!(pkt.tcp.map(|t| t.len()), Some(20));
        assert!(pkt.tcp_fully_captured());
    }

    #[test]
    fn parse_vlan_tagged_frame() {
        let frame = make_frame(true, 6, false);
        let pkt = parse_packet(&frame).unwrap();
        let tag = pkt.vlan.unwrap();
        assert_eq!(tag.vlan_id, 10);
        assert_eq!(tag.priority, 1);
        assert!(pkt.tcp.is_some());
    }

    #[test]
    fn udp_and_fragments_carry_no_tcp() {
        let udp = make_frame(false, 17, false);
        assert!(parse_packet(&udp).unwrap().tcp.is_none());
        let frag = make_frame(false, 6, true);
        assert!(parse_packet(&frag).unwrap().tcp.is_none());
    }

    #[test]
    fn truncated_capture_is_detected() {
        let mut frame = make_frame(false, 6, false);
        frame.truncate(frame.len() - 4);
        let pkt = parse_packet(&frame).unwrap();
        assert!(!pkt.tcp_fully_captured());
    }
}
