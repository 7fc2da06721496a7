//! Per-direction sequence and window tracking.
//!
//! For every segment the sender's state `S` and the receiver's state `R`
//! must satisfy
//!
//! ```text
//!   I.   seq  <= S.max_end
//!   II.  end  >= S.end - R.max_win
//!   III. sack <= R.end
//!   IV.  ack  >= R.end - max(S.max_win, MAX_ACK_WINDOW_FLOOR)
//! ```
//!
//! all evaluated in wrapping sequence space. A positive `loose` counter on
//! either side bypasses the checks right after a mid-stream pickup.

use super::options::{parse_handshake_options, sack_right_edge};
use super::segment::{after, before, FlagClass, Segment};
use super::{Direction, LastSegment, Status, TcpConn};
use serde::Serialize;
use std::fmt;

/// Lower bound on how far below the receiver's right edge an ACK may lag.
pub const MAX_ACK_WINDOW_FLOOR: u32 = 66_000;

/// What one side of the connection has shown so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DirectionState {
    /// Right edge of the data this side has sent.
    pub end: u32,
    /// Highest right edge the peer has advertised room for.
    pub max_end: u32,
    /// Largest (scaled) window seen from this side.
    pub max_win: u32,
    /// Window-scale shift, 0 when scaling is not in effect.
    pub scale: u8,
    pub sack_permitted: bool,
    pub window_scale: bool,
    /// This side sent the FIN that moved the connection into FIN_WAIT.
    pub close_init: bool,
    /// Segments left to accept without window checks.
    pub loose: u32,
}

/// Which inequality a segment broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowViolation {
    SeqAboveWindow,
    SeqBelowWindow,
    AckAboveSent,
    AckBelowWindow,
}

impl WindowViolation {
    pub fn kind(&self) -> &'static str {
        match self {
            WindowViolation::SeqAboveWindow => "seq_above_window",
            WindowViolation::SeqBelowWindow => "seq_below_window",
            WindowViolation::AckAboveSent => "ack_above_sent",
            WindowViolation::AckBelowWindow => "ack_below_window",
        }
    }
}

impl fmt::Display for WindowViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            WindowViolation::SeqAboveWindow => {
                "SEQ is over the upper bound (over the window of the receiver)"
            }
            WindowViolation::SeqBelowWindow => {
                "SEQ is under the lower bound (already ACKed data retransmitted)"
            }
            WindowViolation::AckAboveSent => {
                "ACK is over the upper bound (ACKed data not seen yet)"
            }
            WindowViolation::AckBelowWindow => {
                "ACK is under the lower bound (possible overly delayed ACK)"
            }
        };
        f.write_str(msg)
    }
}

/// Seed a sender's edges and window from its own segment.
fn seed_from_segment(sender: &mut DirectionState, end: u32, win: u32) {
    sender.end = end;
    sender.max_end = end;
    sender.max_win = win.max(1);
}

/// Validate `seg` against both direction states of `conn` and, when it fits,
/// advance them.
///
/// Works on copies: on `Err` the record is exactly as it was.
pub fn check_window(
    conn: &mut TcpConn,
    dir: Direction,
    class: FlagClass,
    seg: &Segment<'_>,
) -> Result<(), WindowViolation> {
    let mut sender = conn.seen[dir.index()];
    let mut receiver = conn.seen[dir.opposite().index()];

    let mut seq = seg.seq;
    let mut ack = seg.ack;
    let mut sack = seg.ack;
    let mut win = seg.window as u32;
    let mut end = seg.end_seq();
    let flags = seg.flags;

    if receiver.sack_permitted {
        sack = sack_right_edge(seg.options, ack);
    }

    if sender.end == 0 {
        if flags.syn() && flags.ack() {
            // SYN/ACK answering a SYN.
            seed_from_segment(&mut sender, end, win);
            parse_handshake_options(seg.options, &mut sender);
            // Scaling applies only if both sides offered it.
            if !(sender.window_scale && receiver.window_scale) {
                sender.scale = 0;
                receiver.scale = 0;
            }
        } else {
            // Mid-stream: the history is lost, trust the segment.
            sender.end = end;
            sender.max_win = win.max(1);
            sender.max_end = end.wrapping_add(sender.max_win);
        }
    } else if ((conn.status == Status::SynSent && dir == Direction::Original)
        || (conn.status == Status::SynRecv && dir == Direction::Reply))
        && after(end, sender.end)
    {
        // Retransmitted SYN or SYN/ACK with fresh sequence numbers: the
        // endpoint reinitialised, so must we.
        seed_from_segment(&mut sender, end, win);
        parse_handshake_options(seg.options, &mut sender);
    }

    if !flags.ack() || (flags.rst() && ack == 0) {
        ack = receiver.end;
        sack = receiver.end;
    }

    if seq == end && (!flags.rst() || (seq == 0 && conn.status == Status::SynSent)) {
        // Empty segment: pin it to the sender's right edge.
        seq = sender.end;
        end = sender.end;
    }

    let ack_window = sender.max_win.max(MAX_ACK_WINDOW_FLOOR);
    let in_window = if !before(seq, sender.max_end.wrapping_add(1)) {
        Err(WindowViolation::SeqAboveWindow)
    } else if !after(
        end,
        sender
            .end
            .wrapping_sub(receiver.max_win)
            .wrapping_sub(1),
    ) {
        Err(WindowViolation::SeqBelowWindow)
    } else if !before(sack, receiver.end.wrapping_add(1)) {
        Err(WindowViolation::AckAboveSent)
    } else if !after(ack, receiver.end.wrapping_sub(ack_window).wrapping_sub(1)) {
        Err(WindowViolation::AckBelowWindow)
    } else {
        Ok(())
    };

    if let Err(violation) = in_window {
        if sender.loose == 0 && receiver.loose == 0 {
            return Err(violation);
        }
    }

    if !flags.syn() {
        win <<= sender.scale;
    }

    let swin = win.wrapping_add(sack.wrapping_sub(ack));
    if sender.max_win < swin {
        sender.max_win = swin;
    }
    if after(end, sender.end) {
        sender.end = end;
    }
    if after(end, sender.max_end) {
        receiver.max_win = receiver
            .max_win
            .wrapping_add(end.wrapping_sub(sender.max_end));
    }
    if after(sack.wrapping_add(win), receiver.max_end.wrapping_sub(1)) {
        receiver.max_end = sack.wrapping_add(win);
        if win == 0 {
            receiver.max_end = receiver.max_end.wrapping_add(1);
        }
    }

    if class == FlagClass::Ack {
        let memo = LastSegment {
            class: conn.last.class,
            dir,
            seq,
            ack,
            end,
        };
        if conn.last == memo {
            conn.retrans = conn.retrans.saturating_add(1);
        } else {
            conn.last = memo;
            conn.retrans = 0;
        }
    }

    if sender.loose > 0 {
        sender.loose -= 1;
    }

    conn.seen[dir.index()] = sender;
    conn.seen[dir.opposite().index()] = receiver;
    Ok(())
}
