//! Zero-copy IPv4 header parser.
//!
//! IPv4 header layout (20-60 bytes):
//!   0                   1                   2                   3
//!   0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |Version|  IHL  |Type of Service|          Total Length         |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |         Identification        |Flags|      Fragment Offset    |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |  Time to Live |    Protocol   |         Header Checksum       |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |                       Source Address                          |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |                    Destination Address                        |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

use super::{checksum_add, checksum_fold, IpProtocol, ParseError};
use std::fmt;
use std::net::Ipv4Addr;

/// Minimum IPv4 header length (no options)
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// Zero-copy IPv4 header.
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    data: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    /// Parse an IPv4 header from a byte slice.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < IPV4_MIN_HEADER_LEN {
            return Err(ParseError::TooShort {
                expected: IPV4_MIN_HEADER_LEN,
                actual: data.len(),
            });
        }

        let version = data[0] >> 4;
        if version != 4 {
            return Err(ParseError::InvalidHeader(format!(
                "expected IPv4 (version 4), got version {}",
                version
            )));
        }

        let header_len = (data[0] & 0x0F) as usize * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return Err(ParseError::InvalidHeader(format!(
                "IHL too small: {} (min 5)",
                header_len / 4
            )));
        }

        if data.len() < header_len {
            return Err(ParseError::TooShort {
                expected: header_len,
                actual: data.len(),
            });
        }

        let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if total_len < header_len {
            return Err(ParseError::InvalidHeader(format!(
                "total length {} shorter than header length {}",
                total_len, header_len
            )));
        }

        Ok(Ipv4Header { data, header_len })
    }

    /// Header length in bytes.
    #[inline]
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Total datagram length as declared by the header.
    #[inline]
    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    /// More Fragments flag.
    #[inline]
    pub fn more_fragments(&self) -> bool {
        self.data[6] & 0x20 != 0
    }

    /// Fragment offset in 8-byte units.
    #[inline]
    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.data[6] & 0x1F, self.data[7]])
    }

    /// True for any piece of a fragmented datagram, first fragment included.
    #[inline]
    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.fragment_offset() != 0
    }

    #[inline]
    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from(self.data[9])
    }

    #[inline]
    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[12], self.data[13], self.data[14], self.data[15])
    }

    #[inline]
    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[16], self.data[17], self.data[18], self.data[19])
    }

    /// Upper-layer length declared by the header (total length minus header).
    #[inline]
    pub fn declared_payload_len(&self) -> usize {
        self.total_length() as usize - self.header_len
    }

    /// Payload after the IPv4 header, clamped to the declared total length
    /// so link-layer padding is never handed to the transport parser.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        let available = self.data.len() - self.header_len;
        let end = self.header_len + self.declared_payload_len().min(available);
        &self.data[self.header_len..end]
    }

    /// Verify the header checksum.
    pub fn verify_checksum(&self) -> bool {
        checksum_fold(checksum_add(0, &self.data[..self.header_len])) == 0xFFFF
    }

    /// Unfolded ones'-complement sum of the TCP/UDP pseudo-header.
    pub fn pseudo_header_sum(&self, l4_len: usize) -> u32 {
        let mut sum = checksum_add(0, &self.data[12..20]);
        sum += self.data[9] as u32;
        sum += l4_len as u32;
        sum
    }
}

impl<'a> fmt::Display for Ipv4Header<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} proto={} len={}",
            self.src_addr(),
            self.dst_addr(),
            self.protocol(),
            self.total_length()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20-byte header for a 40-byte TCP datagram with a valid checksum.
    fn make_ipv4_header() -> Vec<u8> {
        let mut pkt = vec![
            0x45, 0x00, 0x00, 0x28, // version/IHL, TOS, total length = 40
            0xab, 0xcd, 0x40, 0x00, // id, DF
            64, 6, 0x00, 0x00, // TTL, TCP, checksum placeholder
            192, 168, 1, 100, // src
            10, 0, 0, 1, // dst
        ];
        let csum = !checksum_fold(checksum_add(0, &pkt));
        pkt[10..12].copy_from_slice(&csum.to_be_bytes());
        pkt.extend_from_slice(&[0u8; 20]);
        pkt
    }

    #[test]
    fn parse_valid_ipv4() {
        let pkt = make_ipv4_header();
        let hdr = Ipv4Header::parse(&pkt).unwrap();
        assert_eq!(hdr.header_len(), 20);
        assert_eq!(hdr.total_length(), 40);
        assert_eq!(hdr.protocol(), IpProtocol::Tcp);
        assert_eq!(hdr.src_addr(), Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(hdr.dst_addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert!(!hdr.is_fragment());
        assert!(hdr.verify_checksum());
        assert_eq!(hdr.declared_payload_len(), 20);
        assert_eq!(hdr.payload().len(), 20);
    }

    #[test]
    fn payload_ignores_ethernet_padding() {
        let mut pkt = make_ipv4_header();
        pkt.extend_from_slice(&[0u8; 6]);
        let hdr = Ipv4Header::parse(&pkt).unwrap();
        assert_eq!(hdr.payload().len(), 20);
    }

    #[test]
    fn corrupted_header_fails_checksum() {
        let mut pkt = make_ipv4_header();
        pkt[8] = 63;
        let hdr = Ipv4Header::parse(&pkt).unwrap();
        assert!(!hdr.verify_checksum());
    }

    #[test]
    fn fragments_are_flagged() {
        let mut pkt = make_ipv4_header();
        pkt[6] = 0x20; // MF
        assert!(Ipv4Header::parse(&pkt).unwrap().is_fragment());
        pkt[6] = 0x00;
        pkt[7] = 0x10; // offset only
        assert!(Ipv4Header::parse(&pkt).unwrap().is_fragment());
    }

    #[test]
    fn reject_too_short_packet() {
        assert!(Ipv4Header::parse(&[0u8; 19]).is_err());
    }

    #[test]
    fn reject_wrong_version() {
        let mut pkt = [0u8; 20];
        pkt[0] = 0x65;
        assert!(Ipv4Header::parse(&pkt).is_err());
    }
}
