//! Zero-copy IPv6 header parser.
//!
//! IPv6 fixed header layout (40 bytes):
//!   0                   1                   2                   3
//!   0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |Version| Traffic Class |           Flow Label                  |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |         Payload Length        |  Next Header  |   Hop Limit   |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |                   Source Address (128 bits)                   |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |                 Destination Address (128 bits)                |
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!
//! Extension headers are not walked: a datagram whose next header is not
//! TCP is simply not tracked.

use super::{checksum_add, IpProtocol, ParseError};
use std::fmt;
use std::net::Ipv6Addr;

/// IPv6 fixed header length
pub const IPV6_HEADER_LEN: usize = 40;

/// Zero-copy IPv6 header.
#[derive(Debug)]
pub struct Ipv6Header<'a> {
    data: &'a [u8],
}

impl<'a> Ipv6Header<'a> {
    /// Parse an IPv6 header from a byte slice.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < IPV6_HEADER_LEN {
            return Err(ParseError::TooShort {
                expected: IPV6_HEADER_LEN,
                actual: data.len(),
            });
        }

        let version = data[0] >> 4;
        if version != 6 {
            return Err(ParseError::InvalidHeader(format!(
                "expected IPv6 (version 6), got version {}",
                version
            )));
        }

        Ok(Ipv6Header { data })
    }

    /// Payload length (not including the 40-byte fixed header).
    #[inline]
    pub fn payload_length(&self) -> u16 {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }

    #[inline]
    pub fn next_header(&self) -> IpProtocol {
        IpProtocol::from(self.data[6])
    }

    #[inline]
    pub fn src_addr(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.data[8..24]);
        Ipv6Addr::from(octets)
    }

    #[inline]
    pub fn dst_addr(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.data[24..40]);
        Ipv6Addr::from(octets)
    }

    /// Payload after the fixed header, clamped to the declared length.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        let available = self.data.len() - IPV6_HEADER_LEN;
        let end = IPV6_HEADER_LEN + (self.payload_length() as usize).min(available);
        &self.data[IPV6_HEADER_LEN..end]
    }

    /// Unfolded ones'-complement sum of the upper-layer pseudo-header
    /// (RFC 8200 section 8.1).
    pub fn pseudo_header_sum(&self, l4_len: usize) -> u32 {
        let mut sum = checksum_add(0, &self.data[8..40]);
        sum += (l4_len as u32) >> 16;
        sum += (l4_len as u32) & 0xFFFF;
        sum += self.data[6] as u32;
        sum
    }
}

impl<'a> fmt::Display for Ipv6Header<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} next_hdr={} len={}",
            self.src_addr(),
            self.dst_addr(),
            self.next_header(),
            self.payload_length()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ipv6_header(payload_len: u16) -> Vec<u8> {
        let mut pkt = vec![0u8; 40];
        pkt[0] = 0x60;
        pkt[4..6].copy_from_slice(&payload_len.to_be_bytes());
        pkt[6] = 6; // TCP
        pkt[7] = 64;
        pkt[23] = 1; // src ::1
        pkt[39] = 2; // dst ::2
        pkt.extend_from_slice(&vec![0u8; payload_len as usize]);
        pkt
    }

    #[test]
    fn parse_valid_ipv6() {
        let pkt = make_ipv6_header(20);
        let hdr = Ipv6Header::parse(&pkt).unwrap();
        assert_eq!(hdr.payload_length(), 20);
        assert_eq!(hdr.next_header(), IpProtocol::Tcp);
        assert_eq!(hdr.src_addr(), "::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(hdr.dst_addr(), "::2".parse::<Ipv6Addr>().unwrap());
        assert_eq!(hdr.payload().len(), 20);
    }

    #[test]
    fn pseudo_header_covers_addresses_and_length() {
        let pkt = make_ipv6_header(20);
        let hdr = Ipv6Header::parse(&pkt).unwrap();
        // src ::1 + dst ::2 + len 20 + next header 6
        assert_eq!(hdr.pseudo_header_sum(20), 1 + 2 + 20 + 6);
    }

    #[test]
    fn reject_too_short_ipv6() {
        assert!(Ipv6Header::parse(&[0u8; 39]).is_err());
    }
}
