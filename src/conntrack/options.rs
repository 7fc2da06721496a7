//! TCP option scanning: handshake negotiation and SACK right edges.

use super::segment::after;
use super::window::DirectionState;
use crate::protocol::tcp::option;

/// Largest window-scale shift RFC 7323 allows.
pub const MAX_WINDOW_SCALE: u8 = 14;

/// Learn window scaling and SACK support from a SYN-bearing segment.
/// Only the option flags and `scale` of `state` are touched.
pub fn parse_handshake_options(options: &[u8], state: &mut DirectionState) {
    state.scale = 0;
    state.sack_permitted = false;
    state.window_scale = false;

    let mut rest = options;
    while let Some(&kind) = rest.first() {
        match kind {
            option::EOL => return,
            option::NOP => {
                rest = &rest[1..];
                continue;
            }
            _ => {}
        }

        let Some(&len) = rest.get(1) else { return };
        let len = len as usize;
        if len < 2 || len > rest.len() {
            return;
        }

        match (kind, len) {
            (option::SACK_PERMITTED, option::SACK_PERMITTED_LEN) => {
                state.sack_permitted = true;
            }
            (option::WINDOW_SCALE, option::WINDOW_SCALE_LEN) => {
                state.window_scale = true;
                state.scale = rest[2].min(MAX_WINDOW_SCALE);
            }
            _ => {}
        }
        rest = &rest[len..];
    }
}

/// Highest right edge acknowledged by SACK blocks, or `ack` if no block
/// reaches past it.
pub fn sack_right_edge(options: &[u8], ack: u32) -> u32 {
    // NOP NOP TIMESTAMP is by far the most common layout and carries no SACK.
    if options.len() == option::TIMESTAMP_ALIGNED_LEN
        && options[..4]
            == [
                option::NOP,
                option::NOP,
                option::TIMESTAMP,
                option::TIMESTAMP_LEN as u8,
            ]
    {
        return ack;
    }

    let mut sack = ack;
    let mut rest = options;
    while let Some(&kind) = rest.first() {
        match kind {
            option::EOL => return sack,
            option::NOP => {
                rest = &rest[1..];
                continue;
            }
            _ => {}
        }

        let Some(&len) = rest.get(1) else { return sack };
        let len = len as usize;
        if len < 2 || len > rest.len() {
            return sack;
        }

        if kind == option::SACK
            && len >= option::SACK_BASE_LEN + option::SACK_BLOCK_LEN
            && (len - option::SACK_BASE_LEN) % option::SACK_BLOCK_LEN == 0
        {
            for block in rest[option::SACK_BASE_LEN..len].chunks_exact(option::SACK_BLOCK_LEN) {
                let right = u32::from_be_bytes([block[4], block[5], block[6], block[7]]);
                if after(right, sack) {
                    sack = right;
                }
            }
            return sack;
        }
        rest = &rest[len..];
    }
    sack
}
