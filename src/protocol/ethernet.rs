//! Zero-copy Ethernet frame parser.
//!
//! An Ethernet frame has the following layout:
//!   - Destination MAC: 6 bytes
//!   - Source MAC:      6 bytes
//!   - EtherType:       2 bytes
//!   - Payload:         variable
//!
//! 802.1Q tags are unwrapped by [`super::parse_packet`].

use super::{EtherType, ParseError};

/// Ethernet header length without VLAN tags
pub const ETH_HEADER_LEN: usize = 14;

/// Length of one 802.1Q tag (TCI + inner EtherType)
pub const VLAN_TAG_LEN: usize = 4;

/// Zero-copy Ethernet header that borrows from the packet buffer.
#[derive(Debug)]
pub struct EthernetHeader<'a> {
    data: &'a [u8],
}

impl<'a> EthernetHeader<'a> {
    /// Parse an Ethernet header from a raw byte slice.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < ETH_HEADER_LEN {
            return Err(ParseError::TooShort {
                expected: ETH_HEADER_LEN,
                actual: data.len(),
            });
        }
        Ok(EthernetHeader { data })
    }

    /// EtherType field.
    #[inline]
    pub fn ether_type(&self) -> EtherType {
        EtherType::from(u16::from_be_bytes([self.data[12], self.data[13]]))
    }

    /// The payload after the Ethernet header.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.data[ETH_HEADER_LEN..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_frame_exposes_payload() {
        let frame = [
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // dst
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src
            0x08, 0x00, // IPv4
            0x45, 0x00, 0x00, 0x14, // start of an IP header
        ];

        let eth = EthernetHeader::parse(&frame).unwrap();
        assert_eq!(eth.ether_type(), EtherType::Ipv4);
        assert_eq!(eth.payload(), &[0x45, 0x00, 0x00, 0x14]);
    }

    #[test]
    fn reject_truncated_frame() {
        assert!(EthernetHeader::parse(&[0u8; 13]).is_err());
    }

    #[test]
    fn vlan_ethertype_is_recognised() {
        let mut frame = [0u8; 14];
        frame[12] = 0x81;
        frame[13] = 0x00;
        let eth = EthernetHeader::parse(&frame).unwrap();
        assert_eq!(eth.ether_type(), EtherType::VlanTagged);
    }
}
