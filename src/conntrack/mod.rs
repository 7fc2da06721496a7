//! TCP connection tracking core.
//!
//! Given one segment and the record of everything previously observed for
//! its connection, decide whether the segment is consistent with TCP
//! semantics (RFC 793 with window scaling and SACK) and, if so, advance the
//! tracked status.
//!
//! ```text
//! segment --> sanity::check_header
//!         --> TcpTracker::new_conn        (first segment only)
//!         --> TransitionTable::next       (candidate status)
//!         --> window::check_window        (sequence / ack / window bounds)
//!         --> commit + Timeouts::select   (on success)
//! ```
//!
//! The core owns no connection table, no timers and no threads. It borrows
//! one record per call and reports a [`Verdict`]; the caller acts on it.

pub mod lifecycle;
pub mod options;
pub mod sanity;
pub mod segment;
pub mod shared;
pub mod tracker;
pub mod transitions;
pub mod window;

use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub use lifecycle::{Timeouts, TrackerSettings};
pub use sanity::{check_header, SanityError};
pub use segment::{after, before, FlagClass, Segment, TcpFlags};
pub use shared::SharedConn;
pub use tracker::TcpTracker;
pub use transitions::{Transition, TransitionTable};
pub use window::{DirectionState, WindowViolation};

/// Tracked connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    None,
    SynSent,
    SynRecv,
    Established,
    FinWait,
    CloseWait,
    LastAck,
    TimeWait,
    Close,
    /// Present for completeness; no transition leads here.
    Listen,
}

impl Status {
    pub const COUNT: usize = 10;

    pub const ALL: [Status; Status::COUNT] = [
        Status::None,
        Status::SynSent,
        Status::SynRecv,
        Status::Established,
        Status::FinWait,
        Status::CloseWait,
        Status::LastAck,
        Status::TimeWait,
        Status::Close,
        Status::Listen,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::None => "NONE",
            Status::SynSent => "SYN_SENT",
            Status::SynRecv => "SYN_RECV",
            Status::Established => "ESTABLISHED",
            Status::FinWait => "FIN_WAIT",
            Status::CloseWait => "CLOSE_WAIT",
            Status::LastAck => "LAST_ACK",
            Status::TimeWait => "TIME_WAIT",
            Status::Close => "CLOSE",
            Status::Listen => "LISTEN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a segment relative to the first segment of its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Original,
    Reply,
}

impl Direction {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Original => Direction::Reply,
            Direction::Reply => Direction::Original,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Original => write!(f, "original"),
            Direction::Reply => write!(f, "reply"),
        }
    }
}

/// Memo of the last segment that went through the ignore path or
/// committed an ACK. Drives retransmission counting and the
/// desynchronisation/RST special cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LastSegment {
    pub class: FlagClass,
    pub dir: Direction,
    pub seq: u32,
    pub ack: u32,
    pub end: u32,
}

/// Per-connection tracking record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TcpConn {
    pub status: Status,
    /// Indexed by [`Direction::index`].
    pub seen: [DirectionState; 2],
    pub last: LastSegment,
    pub retrans: u32,
    pub seen_reply: bool,
    pub assured: bool,
}

impl TcpConn {
    #[inline]
    pub fn side(&self, dir: Direction) -> &DirectionState {
        &self.seen[dir.index()]
    }
}

/// Outcome of one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept(Outcome),
    /// The record is unchanged.
    Reject(RejectReason),
    /// The caller should drop the record and look the segment up again.
    DestroyAndRetry(DestroyCause),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Status committed; the caller should expire the record after `timeout`.
    Committed { status: Status, timeout: Duration },
    /// Plausible but unconfirmed; status unchanged, memo updated.
    Ignored,
    /// Out of window, accepted anyway because liberal mode is on.
    Liberal(WindowViolation),
    /// RST seen before any reply: the caller should retire the record now.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyCause {
    /// A SYN/ACK answered a SYN we ignored; our record lost sync.
    OutOfSync,
    /// A fresh SYN on a connection in TIME_WAIT/CLOSE.
    Reopen,
}

impl fmt::Display for DestroyCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestroyCause::OutOfSync => write!(f, "SYN/ACK acknowledges an ignored SYN, out of sync"),
            DestroyCause::Reopen => write!(f, "new SYN reopens a closed connection"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Sanity(SanityError),
    InvalidTransition {
        status: Status,
        dir: Direction,
        class: FlagClass,
    },
    /// SYN in TIME_WAIT/CLOSE that does not move past the old sequence space.
    InvalidReopen,
    OutOfWindow(WindowViolation),
    /// No transition out of NONE for this flag class.
    Untrackable { class: FlagClass },
    /// Mid-stream pickup needs a non-zero loose tolerance.
    PickupDisabled,
}

impl RejectReason {
    /// Short stable label for counters.
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::Sanity(e) => e.kind(),
            RejectReason::InvalidTransition { .. } => "invalid_transition",
            RejectReason::InvalidReopen => "invalid_reopen",
            RejectReason::OutOfWindow(v) => v.kind(),
            RejectReason::Untrackable { .. } => "untrackable",
            RejectReason::PickupDisabled => "pickup_disabled",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Sanity(e) => write!(f, "{}", e),
            RejectReason::InvalidTransition { status, dir, class } => {
                write!(f, "invalid {} in {} ({})", class, status, dir)
            }
            RejectReason::InvalidReopen => write!(f, "invalid SYN, does not reopen"),
            RejectReason::OutOfWindow(v) => write!(f, "{}", v),
            RejectReason::Untrackable { class } => {
                write!(f, "{} cannot start a connection", class)
            }
            RejectReason::PickupDisabled => write!(f, "mid-stream pickup disabled"),
        }
    }
}
