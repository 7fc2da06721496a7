//! Record initialisation and timeout selection.

use super::options::parse_handshake_options;
use super::segment::Segment;
use super::transitions::Transition;
use super::window::DirectionState;
use super::{Direction, RejectReason, Status, TcpConn, TcpTracker};
use std::time::Duration;

/// Per-status expiry recommended to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub syn_sent: Duration,
    pub syn_recv: Duration,
    pub established: Duration,
    pub fin_wait: Duration,
    pub close_wait: Duration,
    pub last_ack: Duration,
    pub time_wait: Duration,
    pub close: Duration,
    /// Cap applied once the retransmission counter reaches `max_retrans`.
    pub max_retrans_timeout: Duration,
    pub max_retrans: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        const SECS_PER_MIN: u64 = 60;
        Timeouts {
            syn_sent: Duration::from_secs(2 * SECS_PER_MIN),
            syn_recv: Duration::from_secs(60),
            established: Duration::from_secs(5 * 24 * 60 * SECS_PER_MIN),
            fin_wait: Duration::from_secs(2 * SECS_PER_MIN),
            close_wait: Duration::from_secs(60),
            last_ack: Duration::from_secs(30),
            time_wait: Duration::from_secs(2 * SECS_PER_MIN),
            close: Duration::from_secs(10),
            max_retrans_timeout: Duration::from_secs(5 * SECS_PER_MIN),
            max_retrans: 3,
        }
    }
}

impl Timeouts {
    fn for_status(&self, status: Status) -> Option<Duration> {
        match status {
            Status::None | Status::Listen => None,
            Status::SynSent => Some(self.syn_sent),
            Status::SynRecv => Some(self.syn_recv),
            Status::Established => Some(self.established),
            Status::FinWait => Some(self.fin_wait),
            Status::CloseWait => Some(self.close_wait),
            Status::LastAck => Some(self.last_ack),
            Status::TimeWait => Some(self.time_wait),
            Status::Close => Some(self.close),
        }
    }

    /// Timeout for a record in `status` that has seen `retrans`
    /// back-to-back retransmissions.
    pub fn select(&self, status: Status, retrans: u32) -> Option<Duration> {
        let timeout = self.for_status(status)?;
        if retrans >= self.max_retrans {
            Some(timeout.min(self.max_retrans_timeout))
        } else {
            Some(timeout)
        }
    }
}

/// Tunables the tracker reads on every segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Accept out-of-window segments (without updating state).
    pub liberal: bool,
    /// Segments accepted unchecked after a mid-stream pickup; 0 disables
    /// pickup entirely.
    pub loose: u32,
    pub timeouts: Timeouts,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        TrackerSettings {
            liberal: false,
            loose: 3,
            timeouts: Timeouts::default(),
        }
    }
}

impl TcpTracker {
    /// Build the record for a connection whose first observed segment is
    /// `seg`. The segment itself still has to go through
    /// [`TcpTracker::process`].
    pub fn new_conn(&self, seg: &Segment<'_>) -> Result<TcpConn, RejectReason> {
        let class = seg.class();
        let next = self.table.next(Direction::Original, class, Status::None);

        let mut conn = TcpConn::default();
        let end = seg.end_seq();
        let win = (seg.window as u32).max(1);
        match next {
            Transition::To(Status::SynSent) => {
                let opener = &mut conn.seen[Direction::Original.index()];
                opener.end = end;
                opener.max_win = win;
                opener.max_end = end;
                parse_handshake_options(seg.options, opener);
            }
            Transition::To(_) if self.settings.loose == 0 => {
                return Err(RejectReason::PickupDisabled);
            }
            Transition::To(_) => {
                let loose = self.settings.loose;
                conn.seen[Direction::Original.index()] = DirectionState {
                    end,
                    max_win: win,
                    max_end: end.wrapping_add(win),
                    sack_permitted: true,
                    loose,
                    ..DirectionState::default()
                };
                conn.seen[Direction::Reply.index()].sack_permitted = true;
                conn.seen[Direction::Reply.index()].loose = loose;
            }
            Transition::Ignore | Transition::Invalid => {
                return Err(RejectReason::Untrackable { class });
            }
        }

        let reply = &mut conn.seen[Direction::Reply.index()];
        reply.end = 0;
        reply.max_end = 0;
        reply.max_win = 1;
        reply.scale = 0;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conntrack::segment::{FlagClass, TcpFlags};
    use crate::protocol::tcp::{flags::*, option};

    fn seg(flag_bits: u8, seq: u32, window: u16) -> Segment<'static> {
        Segment {
            seq,
            ack: 0,
            window,
            flags: TcpFlags(flag_bits),
            options: &[],
            payload_len: 0,
        }
    }

    #[test]
    fn default_timeouts() {
        let t = Timeouts::default();
        assert_eq!(t.select(Status::Established, 0), Some(Duration::from_secs(432_000)));
        assert_eq!(t.select(Status::SynSent, 0), Some(Duration::from_secs(120)));
        assert_eq!(t.select(Status::Close, 0), Some(Duration::from_secs(10)));
        assert_eq!(t.select(Status::None, 0), None);
        assert_eq!(t.select(Status::Listen, 5), None);
    }

    #[test]
    fn retransmissions_cap_the_timeout() {
        let t = Timeouts::default();
        assert_eq!(t.select(Status::Established, 2), Some(Duration::from_secs(432_000)));
        assert_eq!(t.select(Status::Established, 3), Some(Duration::from_secs(300)));
        // Already shorter than the cap.
        assert_eq!(t.select(Status::LastAck, 9), Some(Duration::from_secs(30)));
    }

    #[test]
    fn syn_seeds_the_opener() {
        let tracker = TcpTracker::default();
        let opts = [option::SACK_PERMITTED, 2, option::WINDOW_SCALE, 3, 2, option::NOP];
        let syn = Segment {
            options: &opts,
            ..seg(SYN, 100, 0)
        };
        let conn = tracker.new_conn(&syn).unwrap();
        let opener = conn.side(Direction::Original);
        assert_eq!(opener.end, 101);
        assert_eq!(opener.max_end, 101);
        assert_eq!(opener.max_win, 1);
        assert!(opener.sack_permitted);
        assert_eq!(opener.scale, 2);
        assert_eq!(opener.loose, 0);

        let reply = conn.side(Direction::Reply);
        assert_eq!((reply.end, reply.max_end, reply.max_win), (0, 0, 1));
        assert_eq!(conn.status, Status::None);
    }

    #[test]
    fn pickup_uses_loose_tolerance() {
        let tracker = TcpTracker::default();
        let ack = Segment {
            payload_len: 50,
            ..seg(ACK, 7000, 2000)
        };
        let conn = tracker.new_conn(&ack).unwrap();
        let opener = conn.side(Direction::Original);
        assert_eq!(opener.end, 7050);
        assert_eq!(opener.max_end, 9050);
        assert_eq!(opener.loose, 3);
        assert!(opener.sack_permitted);
        assert_eq!(conn.side(Direction::Reply).loose, 3);
        assert!(conn.side(Direction::Reply).sack_permitted);
    }

    #[test]
    fn pickup_refused_without_tolerance() {
        let tracker = TcpTracker::new(TrackerSettings {
            loose: 0,
            ..TrackerSettings::default()
        });
        assert_eq!(
            tracker.new_conn(&seg(ACK, 1, 100)).unwrap_err(),
            RejectReason::PickupDisabled
        );
        // A SYN still opens.
        assert!(tracker.new_conn(&seg(SYN, 1, 100)).is_ok());
    }

    #[test]
    fn untrackable_first_segments() {
        let tracker = TcpTracker::default();
        for (bits, class) in [
            (SYN | ACK, FlagClass::SynAck),
            (FIN | ACK, FlagClass::Fin),
            (RST, FlagClass::Rst),
        ] {
            assert_eq!(
                tracker.new_conn(&seg(bits, 1, 100)).unwrap_err(),
                RejectReason::Untrackable { class }
            );
        }
    }
}
