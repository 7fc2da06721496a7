//! Read-only view of one TCP segment, flag classification and
//! sequence-space comparisons.

use crate::protocol::tcp::{flags, TcpHeader};
use serde::Serialize;
use std::fmt;

/// `a` precedes `b` in 32-bit sequence space (RFC 1982 style).
#[inline]
pub fn before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `a` follows `b` in 32-bit sequence space.
#[inline]
pub fn after(a: u32, b: u32) -> bool {
    before(b, a)
}

/// Raw TCP flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    #[inline]
    pub fn syn(self) -> bool {
        self.0 & flags::SYN != 0
    }

    #[inline]
    pub fn ack(self) -> bool {
        self.0 & flags::ACK != 0
    }

    #[inline]
    pub fn fin(self) -> bool {
        self.0 & flags::FIN != 0
    }

    #[inline]
    pub fn rst(self) -> bool {
        self.0 & flags::RST != 0
    }

    /// Flags with the ECN bits cleared.
    #[inline]
    pub fn without_ecn(self) -> u8 {
        self.0 & !(flags::ECE | flags::CWR)
    }
}

/// Coarse flag class used to index the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagClass {
    Syn,
    SynAck,
    Fin,
    Ack,
    Rst,
    #[default]
    None,
}

impl FlagClass {
    pub const COUNT: usize = 6;

    pub const ALL: [FlagClass; FlagClass::COUNT] = [
        FlagClass::Syn,
        FlagClass::SynAck,
        FlagClass::Fin,
        FlagClass::Ack,
        FlagClass::Rst,
        FlagClass::None,
    ];

    /// Classify by priority: RST, then SYN (SYN/ACK if ACK is set), then
    /// FIN, then ACK.
    pub fn of(flags: TcpFlags) -> FlagClass {
        if flags.rst() {
            FlagClass::Rst
        } else if flags.syn() {
            if flags.ack() {
                FlagClass::SynAck
            } else {
                FlagClass::Syn
            }
        } else if flags.fin() {
            FlagClass::Fin
        } else if flags.ack() {
            FlagClass::Ack
        } else {
            FlagClass::None
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FlagClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlagClass::Syn => "SYN",
            FlagClass::SynAck => "SYN/ACK",
            FlagClass::Fin => "FIN",
            FlagClass::Ack => "ACK",
            FlagClass::Rst => "RST",
            FlagClass::None => "no-flags",
        };
        f.write_str(name)
    }
}

/// The fields of one segment the tracker reads.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub seq: u32,
    pub ack: u32,
    /// Advertised window before scaling.
    pub window: u16,
    pub flags: TcpFlags,
    pub options: &'a [u8],
    /// Payload length as declared by the IP header, not as captured.
    pub payload_len: u32,
}

impl<'a> Segment<'a> {
    /// Build the view from a parsed header. `l4_len` is the TCP length the
    /// IP header declares, so snap-length truncation does not shrink the
    /// payload the tracker accounts for.
    pub fn from_header(hdr: &TcpHeader<'a>, l4_len: usize) -> Self {
        Segment {
            seq: hdr.sequence_number(),
            ack: hdr.ack_number(),
            window: hdr.window_size(),
            flags: TcpFlags(hdr.flags_raw()),
            options: hdr.options(),
            payload_len: l4_len.saturating_sub(hdr.header_len()) as u32,
        }
    }

    #[inline]
    pub fn class(&self) -> FlagClass {
        FlagClass::of(self.flags)
    }

    /// Sequence number just past this segment: payload plus one for each
    /// of SYN and FIN.
    #[inline]
    pub fn end_seq(&self) -> u32 {
        self.seq
            .wrapping_add(self.payload_len)
            .wrapping_add(self.flags.syn() as u32)
            .wrapping_add(self.flags.fin() as u32)
    }
}
