//! Lock wrapper so one record can be handed to whichever thread sees its
//! next segment.

use super::segment::Segment;
use super::{Direction, TcpConn, TcpTracker, Verdict};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One tracking record behind its own lock. Different records never
/// contend with each other.
#[derive(Debug, Default)]
pub struct SharedConn {
    inner: Mutex<TcpConn>,
}

impl SharedConn {
    pub fn new(conn: TcpConn) -> Self {
        SharedConn {
            inner: Mutex::new(conn),
        }
    }

    // Plain data: a poisoned lock still holds a usable record.
    fn lock(&self) -> MutexGuard<'_, TcpConn> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one segment through `tracker` with the lock held for the whole
    /// read-modify-write.
    pub fn process(&self, tracker: &TcpTracker, dir: Direction, seg: &Segment<'_>) -> Verdict {
        let mut conn = self.lock();
        tracker.process(&mut conn, dir, seg)
    }

    /// Copy of the record for inspection.
    pub fn snapshot(&self) -> TcpConn {
        self.lock().clone()
    }
}
