//! Header checks that run before any record is touched.

use crate::protocol::tcp::{flags::*, TcpHeader, TCP_MIN_HEADER_LEN};
use std::fmt;

/// Why a segment failed the header checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanityError {
    /// Fewer bytes than a minimal TCP header.
    Short { len: usize },
    /// Data offset below five words or past the captured bytes.
    BadOffset { words: u8, captured: usize },
    BadChecksum,
    /// Flag combination no real stack emits (ECN bits already masked).
    InvalidFlags(u8),
}

impl SanityError {
    pub fn kind(&self) -> &'static str {
        match self {
            SanityError::Short { .. } => "truncated",
            SanityError::BadOffset { .. } => "bad_offset",
            SanityError::BadChecksum => "bad_checksum",
            SanityError::InvalidFlags(_) => "invalid_flags",
        }
    }
}

impl fmt::Display for SanityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SanityError::Short { len } => write!(f, "truncated TCP header ({} bytes)", len),
            SanityError::BadOffset { words, captured } => write!(
                f,
                "data offset {} words inconsistent with {} captured bytes",
                words, captured
            ),
            SanityError::BadChecksum => write!(f, "bad TCP checksum"),
            SanityError::InvalidFlags(bits) => write!(f, "invalid TCP flag combination 0x{:02x}", bits),
        }
    }
}

impl std::error::Error for SanityError {}

/// Flag bytes (ECE/CWR masked off) a TCP stack can legitimately send.
const VALID_FLAGS: [u8; 17] = [
    SYN,
    SYN | PSH,
    SYN | URG,
    SYN | PSH | URG,
    SYN | ACK,
    SYN | ACK | PSH,
    RST,
    RST | ACK,
    RST | ACK | PSH,
    FIN | ACK,
    FIN | ACK | PSH,
    FIN | ACK | URG,
    FIN | ACK | URG | PSH,
    ACK,
    ACK | PSH,
    ACK | URG,
    ACK | URG | PSH,
];

#[inline]
fn flags_allowed(raw: u8) -> bool {
    let masked = raw & !(ECE | CWR);
    VALID_FLAGS.contains(&masked)
}

/// Validate a TCP header and return the parsed view.
///
/// `pseudo_header_sum` is the unfolded pseudo-header sum; pass `None` when
/// the segment was not fully captured or checksum verification is off.
pub fn check_header(
    bytes: &[u8],
    pseudo_header_sum: Option<u32>,
) -> Result<TcpHeader<'_>, SanityError> {
    if bytes.len() < TCP_MIN_HEADER_LEN {
        return Err(SanityError::Short { len: bytes.len() });
    }

    let hdr = TcpHeader::parse(bytes).map_err(|_| SanityError::BadOffset {
        words: bytes[12] >> 4,
        captured: bytes.len(),
    })?;

    if let Some(sum) = pseudo_header_sum {
        if !hdr.verify_checksum(sum) {
            return Err(SanityError::BadChecksum);
        }
    }

    if !flags_allowed(hdr.flags_raw()) {
        return Err(SanityError::InvalidFlags(hdr.flags_raw() & !(ECE | CWR)));
    }

    Ok(hdr)
}
