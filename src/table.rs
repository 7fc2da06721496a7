//! Connection table: owns tracking records, keys them by a
//! direction-independent 4-tuple, acts on verdicts and expires records by
//! the timeout the tracker recommends.

use crate::conntrack::{
    DestroyCause, Direction, DirectionState, Outcome, RejectReason, SanityError, Segment,
    SharedConn, Status, TcpTracker, Verdict,
};
use ahash::AHashMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// Which way a raw packet travelled relative to the normalised key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    AtoB,
    BtoA,
}

/// Both directions of a connection map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FlowKey {
    pub a: Endpoint,
    pub b: Endpoint,
}

impl FlowKey {
    pub fn new(src: Endpoint, dst: Endpoint) -> (Self, FlowDirection) {
        if endpoint_key(&src) <= endpoint_key(&dst) {
            (FlowKey { a: src, b: dst }, FlowDirection::AtoB)
        } else {
            (FlowKey { a: dst, b: src }, FlowDirection::BtoA)
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp {} <-> {}", self.a, self.b)
    }
}

fn endpoint_key(endpoint: &Endpoint) -> (u8, [u8; 16], u16) {
    let (version, addr) = match endpoint.ip {
        IpAddr::V4(addr) => {
            let mut bytes = [0u8; 16];
            bytes[12..].copy_from_slice(&addr.octets());
            (4, bytes)
        }
        IpAddr::V6(addr) => (6, addr.octets()),
    };
    (version, addr, endpoint.port)
}

#[derive(Debug)]
struct ConnEntry {
    conn: Arc<SharedConn>,
    /// Raw direction of the segment that created the record.
    origin: FlowDirection,
    first_seen: f64,
    last_seen: f64,
    expires_at: f64,
    segments: u64,
}

impl ConnEntry {
    fn new(conn: SharedConn, origin: FlowDirection, ts: f64) -> Self {
        ConnEntry {
            conn: Arc::new(conn),
            origin,
            first_seen: ts,
            last_seen: ts,
            expires_at: ts,
            segments: 0,
        }
    }

    fn expired(&self, now: f64) -> bool {
        now > self.expires_at
    }

    fn direction(&self, raw: FlowDirection) -> Direction {
        if raw == self.origin {
            Direction::Original
        } else {
            Direction::Reply
        }
    }
}

/// Counters kept per table and merged across shards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub segments: u64,
    pub committed: u64,
    pub ignored: u64,
    pub liberal: u64,
    pub closed: u64,
    pub rejected: u64,
    pub out_of_sync: u64,
    pub reopened: u64,
    pub created: u64,
    pub expired: u64,
    pub evicted: u64,
    pub reject_reasons: BTreeMap<&'static str, u64>,
}

impl TableStats {
    fn record(&mut self, verdict: &Verdict) {
        match verdict {
            Verdict::Accept(Outcome::Committed { .. }) => self.committed += 1,
            Verdict::Accept(Outcome::Ignored) => self.ignored += 1,
            Verdict::Accept(Outcome::Liberal(_)) => self.liberal += 1,
            Verdict::Accept(Outcome::Closed) => self.closed += 1,
            Verdict::Reject(reason) => self.record_reject(reason),
            Verdict::DestroyAndRetry(DestroyCause::OutOfSync) => self.out_of_sync += 1,
            // Retried internally; only reachable if the retry also asks.
            Verdict::DestroyAndRetry(DestroyCause::Reopen) => {}
        }
    }

    fn record_reject(&mut self, reason: &RejectReason) {
        self.rejected += 1;
        *self.reject_reasons.entry(reason.kind()).or_insert(0) += 1;
    }

    pub fn accepted(&self) -> u64 {
        self.committed + self.ignored + self.liberal + self.closed
    }

    pub fn merge(&mut self, other: &TableStats) {
        self.segments += other.segments;
        self.committed += other.committed;
        self.ignored += other.ignored;
        self.liberal += other.liberal;
        self.closed += other.closed;
        self.rejected += other.rejected;
        self.out_of_sync += other.out_of_sync;
        self.reopened += other.reopened;
        self.created += other.created;
        self.expired += other.expired;
        self.evicted += other.evicted;
        for (kind, count) in &other.reject_reasons {
            *self.reject_reasons.entry(*kind).or_insert(0) += count;
        }
    }
}

/// Serialisable view of one record.
#[derive(Debug, Clone, Serialize)]
pub struct ConnSnapshot {
    pub originator: Endpoint,
    pub responder: Endpoint,
    pub status: Status,
    pub assured: bool,
    pub seen_reply: bool,
    pub retrans: u32,
    pub first_seen: f64,
    pub last_seen: f64,
    pub expires_at: f64,
    pub segments: u64,
    pub original: DirectionState,
    pub reply: DirectionState,
}

impl ConnSnapshot {
    fn from_entry(key: &FlowKey, entry: &ConnEntry) -> Self {
        let conn = entry.conn.snapshot();
        let (originator, responder) = match entry.origin {
            FlowDirection::AtoB => (key.a, key.b),
            FlowDirection::BtoA => (key.b, key.a),
        };
        ConnSnapshot {
            originator,
            responder,
            status: conn.status,
            assured: conn.assured,
            seen_reply: conn.seen_reply,
            retrans: conn.retrans,
            first_seen: entry.first_seen,
            last_seen: entry.last_seen,
            expires_at: entry.expires_at,
            segments: entry.segments,
            original: *conn.side(Direction::Original),
            reply: *conn.side(Direction::Reply),
        }
    }
}

#[derive(Debug)]
pub struct ConnTable {
    conns: AHashMap<FlowKey, ConnEntry>,
    tracker: TcpTracker,
    max_conns: usize,
    last_prune: f64,
    stats: TableStats,
}

impl ConnTable {
    pub fn new(tracker: TcpTracker, max_conns: usize) -> Self {
        ConnTable {
            conns: AHashMap::new(),
            tracker,
            max_conns,
            last_prune: 0.0,
            stats: TableStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    /// Shared handle to the record for `src`/`dst`, if one is tracked.
    pub fn get(&self, src: Endpoint, dst: Endpoint) -> Option<Arc<SharedConn>> {
        let (key, _) = FlowKey::new(src, dst);
        self.conns.get(&key).map(|entry| Arc::clone(&entry.conn))
    }

    /// Count a segment that failed the header checks before reaching a record.
    pub fn record_sanity_failure(&mut self, err: SanityError) {
        self.stats.segments += 1;
        self.stats.record_reject(&RejectReason::Sanity(err));
    }

    /// Run one segment travelling `src` -> `dst` through its record,
    /// creating, retiring or replacing the record as the verdict demands.
    pub fn track(&mut self, ts: f64, src: Endpoint, dst: Endpoint, seg: &Segment<'_>) -> Verdict {
        self.stats.segments += 1;
        let (key, raw_dir) = FlowKey::new(src, dst);

        let verdict = match self.track_once(ts, &key, raw_dir, seg) {
            Verdict::DestroyAndRetry(DestroyCause::Reopen) => {
                self.conns.remove(&key);
                self.stats.reopened += 1;
                self.track_once(ts, &key, raw_dir, seg)
            }
            other => other,
        };
        self.stats.record(&verdict);
        verdict
    }

    fn track_once(
        &mut self,
        ts: f64,
        key: &FlowKey,
        raw_dir: FlowDirection,
        seg: &Segment<'_>,
    ) -> Verdict {
        if self.conns.get(key).map_or(false, |entry| entry.expired(ts)) {
            self.conns.remove(key);
            self.stats.expired += 1;
        }

        let mut created = false;
        let entry = match self.conns.entry(key.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => match self.tracker.new_conn(seg) {
                Ok(conn) => {
                    created = true;
                    slot.insert(ConnEntry::new(SharedConn::new(conn), raw_dir, ts))
                }
                Err(reason) => return Verdict::Reject(reason),
            },
        };

        let dir = entry.direction(raw_dir);
        let verdict = entry.conn.process(&self.tracker, dir, seg);
        entry.last_seen = ts;
        entry.segments += 1;

        let retire = match &verdict {
            Verdict::Accept(Outcome::Committed { timeout, .. }) => {
                entry.expires_at = ts + timeout.as_secs_f64();
                false
            }
            Verdict::Accept(Outcome::Closed) => true,
            Verdict::DestroyAndRetry(DestroyCause::OutOfSync) => true,
            // A record whose first segment did not commit carries no status.
            _ => created,
        };

        if retire {
            self.conns.remove(key);
        } else if created {
            self.stats.created += 1;
        }
        verdict
    }

    /// Drop records past their deadline, then the least recently seen
    /// ones above `max_conns`. Runs at most once per second of capture time.
    pub fn maybe_expire(&mut self, now: f64) -> usize {
        if now - self.last_prune < 1.0 {
            return 0;
        }
        self.last_prune = now;

        let before = self.conns.len();
        self.conns.retain(|_, entry| !entry.expired(now));
        let expired = before - self.conns.len();
        self.stats.expired += expired as u64;

        let mut evicted = 0;
        if self.max_conns > 0 && self.conns.len() > self.max_conns {
            let mut entries: Vec<(FlowKey, f64)> = self
                .conns
                .iter()
                .map(|(key, entry)| (key.clone(), entry.last_seen))
                .collect();
            entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
            let excess = self.conns.len() - self.max_conns;
            for (key, _) in entries.into_iter().take(excess) {
                if self.conns.remove(&key).is_some() {
                    evicted += 1;
                }
            }
            self.stats.evicted += evicted as u64;
        }

        expired + evicted
    }

    /// Number of records currently in each status, indexed by
    /// [`Status::index`].
    pub fn status_counts(&self) -> [usize; Status::COUNT] {
        let mut counts = [0; Status::COUNT];
        for entry in self.conns.values() {
            counts[entry.conn.snapshot().status.index()] += 1;
        }
        counts
    }

    /// All records, oldest first.
    pub fn snapshot(&self) -> Vec<ConnSnapshot> {
        let mut conns: Vec<ConnSnapshot> = self
            .conns
            .iter()
            .map(|(key, entry)| ConnSnapshot::from_entry(key, entry))
            .collect();
        conns.sort_by(|a, b| {
            a.first_seen
                .partial_cmp(&b.first_seen)
                .unwrap_or(Ordering::Equal)
        });
        conns
    }
}

pub fn write_conn_json(
    path: &Path,
    conns: &[ConnSnapshot],
) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), conns)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conntrack::{TcpFlags, TrackerSettings};
    use crate::protocol::tcp::flags::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn client() -> Endpoint {
        Endpoint {
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)),
            port: 40000,
        }
    }

    fn server() -> Endpoint {
        Endpoint {
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            port: 80,
        }
    }

    fn seg(flag_bits: u8, seq: u32, ack: u32, len: u32) -> Segment<'static> {
        Segment {
            seq,
            ack,
            window: 1000,
            flags: TcpFlags(flag_bits),
            options: &[],
            payload_len: len,
        }
    }

    fn table() -> ConnTable {
        ConnTable::new(TcpTracker::default(), 0)
    }

    fn handshake(table: &mut ConnTable, ts: f64) {
        table.track(ts, client(), server(), &seg(SYN, 100, 0, 0));
        table.track(ts, server(), client(), &seg(SYN | ACK, 500, 101, 0));
        table.track(ts, client(), server(), &seg(ACK, 101, 501, 0));
    }

    fn status(table: &ConnTable) -> Status {
        table.get(client(), server()).unwrap().snapshot().status
    }

    #[test]
    fn flow_key_is_directionless() {
        let (key_ab, dir_ab) = FlowKey::new(client(), server());
        let (key_ba, dir_ba) = FlowKey::new(server(), client());
        assert_eq!(key_ab, key_ba);
        assert_ne!(dir_ab, dir_ba);
    }

    #[test]
    fn flow_key_orders_ipv4_before_ipv6() {
        let v6 = Endpoint {
            ip: IpAddr::V6(Ipv6Addr::LOCALHOST),
            port: 443,
        };
        let (key, dir) = FlowKey::new(v6, server());
        assert_eq!(key.a, server());
        assert_eq!(dir, FlowDirection::BtoA);
    }

    #[test]
    fn directions_follow_the_first_segment() {
        let mut table = table();
        handshake(&mut table, 1.0);
        assert_eq!(status(&table), Status::Established);

        let snap = table.snapshot();
        assert_eq!(snap.len(), 1);
        // The client has the higher address but opened the connection.
        assert_eq!(snap[0].originator, client());
        assert_eq!(snap[0].responder, server());
        assert_eq!(snap[0].segments, 3);
        assert_eq!(snap[0].reply.end, 501);
        assert_eq!(table.stats().committed, 3);
        assert_eq!(table.stats().created, 1);
        assert_eq!(table.status_counts()[Status::Established.index()], 1);
    }

    #[test]
    fn rejected_first_segment_creates_nothing() {
        let mut table = table();
        let v = table.track(0.0, client(), server(), &seg(FIN | ACK, 1, 1, 0));
        assert!(matches!(v, Verdict::Reject(RejectReason::Untrackable { .. })));
        assert!(table.is_empty());
        assert_eq!(table.stats().reject_reasons.get("untrackable"), Some(&1));
    }

    #[test]
    fn rst_before_reply_retires_record() {
        let mut table = table();
        table.track(0.0, client(), server(), &seg(SYN, 100, 0, 0));
        let v = table.track(0.1, server(), client(), &seg(RST | ACK, 0, 101, 0));
        assert_eq!(v, Verdict::Accept(Outcome::Closed));
        assert!(table.is_empty());
    }

    #[test]
    fn out_of_sync_record_is_destroyed() {
        let mut table = table();
        handshake(&mut table, 0.0);
        table.track(1.0, client(), server(), &seg(SYN, 9000, 0, 0));
        let v = table.track(1.0, server(), client(), &seg(SYN | ACK, 7000, 9001, 0));
        assert_eq!(v, Verdict::DestroyAndRetry(DestroyCause::OutOfSync));
        assert!(table.is_empty());
        assert_eq!(table.stats().out_of_sync, 1);
    }

    #[test]
    fn reopen_replaces_the_record() {
        let mut table = table();
        handshake(&mut table, 0.0);
        for (from, to, s) in [
            (client(), server(), seg(FIN | ACK, 101, 501, 0)),
            (server(), client(), seg(ACK, 501, 102, 0)),
            (server(), client(), seg(FIN | ACK, 501, 102, 0)),
            (client(), server(), seg(ACK, 102, 502, 0)),
        ] {
            assert!(table.track(1.0, from, to, &s).is_accept());
        }
        assert_eq!(status(&table), Status::TimeWait);

        let v = table.track(2.0, client(), server(), &seg(SYN, 600, 0, 0));
        assert_eq!(
            v,
            Verdict::Accept(Outcome::Committed {
                status: Status::SynSent,
                timeout: std::time::Duration::from_secs(120),
            })
        );
        assert_eq!(table.stats().reopened, 1);
        let snap = table.snapshot();
        assert_eq!(snap[0].first_seen, 2.0);
        assert_eq!(snap[0].original.end, 601);
    }

    #[test]
    fn deadline_follows_committed_timeout() {
        let mut table = table();
        table.track(10.0, client(), server(), &seg(SYN, 100, 0, 0));
        assert_eq!(table.snapshot()[0].expires_at, 130.0);

        // Past the SYN_SENT deadline the stale record is replaced on lookup.
        let v = table.track(200.0, client(), server(), &seg(SYN, 5000, 0, 0));
        assert!(v.is_accept());
        assert_eq!(table.stats().expired, 1);
        assert_eq!(table.snapshot()[0].original.end, 5001);
    }

    #[test]
    fn expire_and_evict() {
        let mut table = ConnTable::new(TcpTracker::default(), 2);
        for port in 1..=3u16 {
            let src = Endpoint { port, ..client() };
            table.track(port as f64, src, server(), &seg(SYN, 100, 0, 0));
        }
        assert_eq!(table.len(), 3);
        // One over the limit: the least recently seen goes.
        assert_eq!(table.maybe_expire(5.0), 1);
        assert_eq!(table.len(), 2);
        assert!(table.get(Endpoint { port: 1, ..client() }, server()).is_none());
        // Throttled within a second.
        assert_eq!(table.maybe_expire(5.5), 0);
        // Everything is past its SYN_SENT deadline.
        assert_eq!(table.maybe_expire(500.0), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn pickup_disabled_is_counted() {
        let tracker = TcpTracker::new(TrackerSettings {
            loose: 0,
            ..TrackerSettings::default()
        });
        let mut table = ConnTable::new(tracker, 0);
        let v = table.track(0.0, client(), server(), &seg(ACK, 1, 1, 10));
        assert_eq!(v, Verdict::Reject(RejectReason::PickupDisabled));
        assert_eq!(table.stats().rejected, 1);
    }

    #[test]
    fn stats_merge() {
        let mut a = TableStats::default();
        a.committed = 2;
        a.reject_reasons.insert("bad_checksum", 1);
        let mut b = TableStats::default();
        b.committed = 3;
        b.reject_reasons.insert("bad_checksum", 2);
        a.merge(&b);
        assert_eq!(a.committed, 5);
        assert_eq!(a.reject_reasons["bad_checksum"], 3);
    }
}
