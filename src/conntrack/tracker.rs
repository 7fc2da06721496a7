//! Per-segment decision: transition lookup, special cases, window check,
//! commit.

use super::segment::{FlagClass, Segment};
use super::transitions::{Transition, TransitionTable};
use super::window::check_window;
use super::{
    DestroyCause, Direction, LastSegment, Outcome, RejectReason, Status, TcpConn, TrackerSettings,
    Verdict,
};
use crate::conntrack::segment::after;
use std::time::Duration;

/// Stateless decision engine shared by every record of one table.
#[derive(Debug, Clone, Default)]
pub struct TcpTracker {
    pub(crate) table: TransitionTable,
    pub(crate) settings: TrackerSettings,
}

impl TcpTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        TcpTracker {
            table: TransitionTable::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Judge `seg`, travelling in `dir`, against `conn` and update the
    /// record when the verdict allows it.
    pub fn process(&self, conn: &mut TcpConn, dir: Direction, seg: &Segment<'_>) -> Verdict {
        let verdict = self.decide(conn, dir, seg);
        if verdict.is_accept() && dir == Direction::Reply {
            conn.seen_reply = true;
        }
        verdict
    }

    fn decide(&self, conn: &mut TcpConn, dir: Direction, seg: &Segment<'_>) -> Verdict {
        let class = seg.class();
        let old = conn.status;

        let new = match self.table.next(dir, class, old) {
            Transition::To(Status::SynSent) if matches!(old, Status::TimeWait | Status::Close) => {
                let closing = conn.seen.iter().any(|side| side.close_init);
                return if closing || after(seg.seq, conn.side(dir).end) {
                    Verdict::DestroyAndRetry(DestroyCause::Reopen)
                } else {
                    Verdict::Reject(RejectReason::InvalidReopen)
                };
            }
            Transition::To(next) => next,
            Transition::Ignore => return self.ignore(conn, dir, class, seg),
            Transition::Invalid => {
                return Verdict::Reject(RejectReason::InvalidTransition {
                    status: old,
                    dir,
                    class,
                });
            }
        };

        if !self.rst_answers_memo(conn, class, new, seg) {
            if let Err(violation) = check_window(conn, dir, class, seg) {
                return if self.settings.liberal {
                    Verdict::Accept(Outcome::Liberal(violation))
                } else {
                    Verdict::Reject(RejectReason::OutOfWindow(violation))
                };
            }
        }

        conn.last.class = class;
        conn.last.dir = dir;
        conn.status = new;
        if old != new && new == Status::FinWait {
            conn.seen[dir.index()].close_init = true;
        }

        let timeout = self
            .settings
            .timeouts
            .select(new, conn.retrans)
            .unwrap_or(Duration::ZERO);

        if !conn.seen_reply {
            // Only a RST came back: nothing was ever established.
            if class == FlagClass::Rst {
                return Verdict::Accept(Outcome::Closed);
            }
        } else if !conn.assured
            && matches!(old, Status::SynRecv | Status::Established)
            && new == Status::Established
        {
            conn.assured = true;
        }

        Verdict::Accept(Outcome::Committed {
            status: new,
            timeout,
        })
    }

    /// A SYN/ACK or SYN the table cannot confirm yet. Remember it; if the
    /// peer's answer matches, our record is the stale one.
    fn ignore(
        &self,
        conn: &mut TcpConn,
        dir: Direction,
        class: FlagClass,
        seg: &Segment<'_>,
    ) -> Verdict {
        let last = conn.last;
        if class == FlagClass::SynAck
            && last.class == FlagClass::Syn
            && last.dir != dir
            && seg.ack == last.end
        {
            return Verdict::DestroyAndRetry(DestroyCause::OutOfSync);
        }

        conn.last = LastSegment {
            class,
            dir,
            seq: seg.seq,
            ack: last.ack,
            end: seg.end_seq(),
        };
        Verdict::Accept(Outcome::Ignored)
    }

    /// RST answering a segment we let through in SYN_RECV or ESTABLISHED
    /// without confirmation. Its sequence numbers belong to the peer's view,
    /// not ours, so the window check would wrongly reject it.
    fn rst_answers_memo(
        &self,
        conn: &TcpConn,
        class: FlagClass,
        new: Status,
        seg: &Segment<'_>,
    ) -> bool {
        if class != FlagClass::Rst || new != Status::Close || seg.ack != conn.last.end {
            return false;
        }
        (conn.seen_reply && conn.last.class == FlagClass::Syn)
            || (!conn.assured && conn.last.class == FlagClass::Ack)
    }
}
