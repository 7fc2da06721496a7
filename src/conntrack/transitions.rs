//! Table-driven TCP status transitions.
//!
//! Indexed by direction, flag class and current status. The table is a
//! plain value: each tracker builds its own with [`TransitionTable::new`].

use super::segment::FlagClass;
use super::{Direction, Status};

/// Result of a table lookup. `Ignore` and `Invalid` are never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(Status),
    Ignore,
    Invalid,
}

const SSS: Transition = Transition::To(Status::SynSent);
const SSR: Transition = Transition::To(Status::SynRecv);
const SES: Transition = Transition::To(Status::Established);
const SFW: Transition = Transition::To(Status::FinWait);
const SCW: Transition = Transition::To(Status::CloseWait);
const SLA: Transition = Transition::To(Status::LastAck);
const STW: Transition = Transition::To(Status::TimeWait);
const SCL: Transition = Transition::To(Status::Close);
const SIV: Transition = Transition::Invalid;
const SIG: Transition = Transition::Ignore;

type Row = [Transition; Status::COUNT];

#[derive(Debug, Clone)]
pub struct TransitionTable {
    cells: [[Row; FlagClass::COUNT]; 2],
}

impl TransitionTable {
    pub fn new() -> Self {
        // Columns: sNO, sSS, sSR, sES, sFW, sCW, sLA, sTW, sCL, sLI
        let original: [Row; FlagClass::COUNT] = [
            // syn: a new SYN restarts SYN_SENT; in TIME_WAIT/CLOSE it may
            // reopen the connection. Elsewhere it is ignored until confirmed.
            [SSS, SSS, SIG, SIG, SIG, SIG, SIG, SSS, SSS, SIV],
            // syn/ack: the originator never answers its own SYN.
            [SIV, SIV, SIG, SIG, SIG, SIG, SIG, SIG, SIG, SIV],
            // fin
            [SIV, SIV, SFW, SFW, SLA, SLA, SLA, STW, SCL, SIV],
            // ack: from NONE this is a mid-stream pickup.
            [SES, SIV, SES, SES, SCW, SCW, STW, STW, SCL, SIV],
            // rst
            [SIV, SCL, SCL, SCL, SCL, SCL, SCL, SCL, SCL, SIV],
            // none
            [SIV; Status::COUNT],
        ];
        let reply: [Row; FlagClass::COUNT] = [
            // syn: simultaneous open is not tracked.
            [SIV; Status::COUNT],
            // syn/ack
            [SIV, SSR, SSR, SIG, SIG, SIG, SIG, SIG, SIG, SIV],
            // fin
            [SIV, SIV, SFW, SFW, SLA, SLA, SLA, STW, SCL, SIV],
            // ack: an ACK answering a SYN (no SYN/ACK yet) is ignored.
            [SIV, SIG, SSR, SES, SCW, SCW, STW, STW, SCL, SIV],
            // rst
            [SIV, SCL, SCL, SCL, SCL, SCL, SCL, SCL, SCL, SIV],
            // none
            [SIV; Status::COUNT],
        ];
        TransitionTable {
            cells: [original, reply],
        }
    }

    #[inline]
    pub fn next(&self, dir: Direction, class: FlagClass, status: Status) -> Transition {
        self.cells[dir.index()][class.index()][status.index()]
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_cell_is_defined_and_never_none_or_listen() {
        let table = TransitionTable::new();
        for dir in [Direction::Original, Direction::Reply] {
            for class in FlagClass::ALL {
                for status in Status::ALL {
                    match table.next(dir, class, status) {
                        Transition::To(next) => {
                            assert!(!matches!(next, Status::None | Status::Listen))
                        }
                        Transition::Ignore | Transition::Invalid => {}
                    }
                }
            }
        }
    }

    #[test]
    fn handshake_path() {
        let t = TransitionTable::new();
        assert_eq!(
            t.next(Direction::Original, FlagClass::Syn, Status::None),
            Transition::To(Status::SynSent)
        );
        assert_eq!(
            t.next(Direction::Reply, FlagClass::SynAck, Status::SynSent),
            Transition::To(Status::SynRecv)
        );
        assert_eq!(
            t.next(Direction::Original, FlagClass::Ack, Status::SynRecv),
            Transition::To(Status::Established)
        );
    }

    #[test]
    fn close_path() {
        let t = TransitionTable::new();
        let steps = [
            (Direction::Original, FlagClass::Fin, Status::Established, Status::FinWait),
            (Direction::Reply, FlagClass::Ack, Status::FinWait, Status::CloseWait),
            (Direction::Reply, FlagClass::Fin, Status::CloseWait, Status::LastAck),
            (Direction::Original, FlagClass::Ack, Status::LastAck, Status::TimeWait),
        ];
        for (dir, class, from, to) in steps {
            assert_eq!(t.next(dir, class, from), Transition::To(to));
        }
    }

    #[test]
    fn listen_and_no_flags_are_invalid() {
        let t = TransitionTable::new();
        for class in FlagClass::ALL {
            assert_eq!(t.next(Direction::Original, class, Status::Listen), Transition::Invalid);
            assert_eq!(t.next(Direction::Reply, class, Status::Listen), Transition::Invalid);
        }
        for status in Status::ALL {
            assert_eq!(t.next(Direction::Reply, FlagClass::None, status), Transition::Invalid);
        }
    }

    #[test]
    fn synack_when_synchronised_is_ignored() {
        let t = TransitionTable::new();
        assert_eq!(
            t.next(Direction::Reply, FlagClass::SynAck, Status::Established),
            Transition::Ignore
        );
        assert_eq!(
            t.next(Direction::Original, FlagClass::Syn, Status::Established),
            Transition::Ignore
        );
    }
}
