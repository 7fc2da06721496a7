//! Per-shard worker: owns a `ConnTable`, tracks the TCP segments routed to
//! it and reports counters and rejections to the aggregator.

use crossbeam_channel::{Receiver, Sender};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::conntrack::{check_header, SanityError, Segment, Status, TcpTracker, Verdict};
use crate::protocol;
use crate::table::{ConnSnapshot, ConnTable, Endpoint, TableStats};

use super::{OwnedPacket, WorkerConfig};

/// Events a worker sends to the aggregator.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Per-tick partial statistics from this shard.
    ShardTick(ShardTick),
    /// A segment was rejected or its record destroyed.
    Rejected(RejectNotice),
    /// Worker is shutting down; final table snapshot from this shard.
    Shutdown(ShardShutdown),
}

/// Partial tick data from one shard.
#[derive(Debug, Clone)]
pub struct ShardTick {
    pub shard_id: usize,
    pub frames: u64,
    pub bytes: u64,
    pub active_conns: usize,
    pub status_counts: [usize; Status::COUNT],
    /// Cumulative since the worker started.
    pub stats: TableStats,
}

#[derive(Debug, Clone)]
pub struct RejectNotice {
    pub frame_id: u64,
    pub ts: f64,
    pub flow: String,
    pub reason: String,
}

/// Final state from a shutting-down worker.
#[derive(Debug)]
pub struct ShardShutdown {
    pub shard_id: usize,
    pub conns: Vec<ConnSnapshot>,
    pub stats: TableStats,
}

/// What became of one frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Not a trackable TCP segment.
    Skipped,
    /// The TCP header failed validation before reaching a record.
    Malformed {
        src: IpAddr,
        dst: IpAddr,
        error: SanityError,
    },
    Tracked {
        src: Endpoint,
        dst: Endpoint,
        verdict: Verdict,
    },
}

/// Parse `data`, validate the TCP header and run it through `table`.
pub fn track_frame(
    table: &mut ConnTable,
    ts: f64,
    data: &[u8],
    verify_checksum: bool,
) -> FrameOutcome {
    let parsed = match protocol::parse_packet(data) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::trace!(error = %e, "parse error");
            return FrameOutcome::Skipped;
        }
    };
    let Some(tcp) = parsed.tcp else {
        return FrameOutcome::Skipped;
    };

    let l4_len = parsed.network.declared_l4_len();
    let pseudo = (verify_checksum && parsed.tcp_fully_captured())
        .then(|| parsed.network.pseudo_header_sum(l4_len));

    let hdr = match check_header(tcp, pseudo) {
        Ok(hdr) => hdr,
        Err(error) => {
            table.record_sanity_failure(error);
            return FrameOutcome::Malformed {
                src: parsed.network.src_ip(),
                dst: parsed.network.dst_ip(),
                error,
            };
        }
    };

    let src = Endpoint {
        ip: parsed.network.src_ip(),
        port: hdr.src_port(),
    };
    let dst = Endpoint {
        ip: parsed.network.dst_ip(),
        port: hdr.dst_port(),
    };
    let seg = Segment::from_header(&hdr, l4_len);
    let verdict = table.track(ts, src, dst, &seg);
    FrameOutcome::Tracked { src, dst, verdict }
}

pub struct Worker {
    shard_id: usize,
    table: ConnTable,
    verify_checksum: bool,
    report_rejects: bool,
    tick_interval: Duration,
    // Per-tick accumulators
    tick_frames: u64,
    tick_bytes: u64,
    tick_last: Instant,
}

impl Worker {
    pub fn new(shard_id: usize, config: WorkerConfig) -> Self {
        Worker {
            shard_id,
            table: ConnTable::new(TcpTracker::new(config.settings), config.max_conns),
            verify_checksum: config.verify_checksum,
            report_rejects: config.report_rejects,
            tick_interval: Duration::from_millis(config.tick_ms.max(100)),
            tick_frames: 0,
            tick_bytes: 0,
            tick_last: Instant::now(),
        }
    }

    pub fn run(
        &mut self,
        rx: Receiver<OwnedPacket>,
        agg_tx: Sender<WorkerEvent>,
        running: &AtomicBool,
    ) {
        loop {
            if !running.load(Ordering::Relaxed) {
                // Drain what the capture thread already queued.
                while let Ok(pkt) = rx.try_recv() {
                    self.process_frame(&pkt, &agg_tx);
                }
                break;
            }

            // Timeout keeps ticks flowing during lulls.
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(pkt) => self.process_frame(&pkt, &agg_tx),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }

            self.maybe_emit_tick(&agg_tx);
        }

        self.emit_tick(&agg_tx);

        let _ = agg_tx.send(WorkerEvent::Shutdown(ShardShutdown {
            shard_id: self.shard_id,
            conns: self.table.snapshot(),
            stats: self.table.stats().clone(),
        }));

        tracing::debug!(shard = self.shard_id, "worker shut down");
    }

    fn process_frame(&mut self, pkt: &OwnedPacket, agg_tx: &Sender<WorkerEvent>) {
        self.tick_frames += 1;
        self.tick_bytes += pkt.wire_len;

        let outcome = track_frame(&mut self.table, pkt.ts, &pkt.data, self.verify_checksum);
        let notice = match outcome {
            FrameOutcome::Skipped => None,
            FrameOutcome::Malformed { src, dst, error } => {
                tracing::debug!(shard = self.shard_id, %src, %dst, %error, "malformed segment");
                Some((format!("{} -> {}", src, dst), error.to_string()))
            }
            FrameOutcome::Tracked { verdict: Verdict::Accept(outcome), .. } => {
                tracing::trace!(shard = self.shard_id, ?outcome, "accepted");
                None
            }
            FrameOutcome::Tracked { src, dst, verdict: Verdict::Reject(reason) } => {
                tracing::debug!(shard = self.shard_id, %src, %dst, %reason, "rejected");
                Some((format!("{} -> {}", src, dst), reason.to_string()))
            }
            FrameOutcome::Tracked { src, dst, verdict: Verdict::DestroyAndRetry(cause) } => {
                tracing::debug!(shard = self.shard_id, %src, %dst, %cause, "record destroyed");
                Some((format!("{} -> {}", src, dst), cause.to_string()))
            }
        };

        if let Some((flow, reason)) = notice.filter(|_| self.report_rejects) {
            let _ = agg_tx.send(WorkerEvent::Rejected(RejectNotice {
                frame_id: pkt.id,
                ts: pkt.ts,
                flow,
                reason,
            }));
        }

        self.table.maybe_expire(pkt.ts);
    }

    fn maybe_emit_tick(&mut self, agg_tx: &Sender<WorkerEvent>) {
        if self.tick_last.elapsed() >= self.tick_interval {
            self.emit_tick(agg_tx);
        }
    }

    fn emit_tick(&mut self, agg_tx: &Sender<WorkerEvent>) {
        let tick = ShardTick {
            shard_id: self.shard_id,
            frames: self.tick_frames,
            bytes: self.tick_bytes,
            active_conns: self.table.len(),
            status_counts: self.table.status_counts(),
            stats: self.table.stats().clone(),
        };

        let _ = agg_tx.send(WorkerEvent::ShardTick(tick));

        self.tick_frames = 0;
        self.tick_bytes = 0;
        self.tick_last = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conntrack::{FlagClass, Outcome, RejectReason};
    use crate::protocol::{checksum_add, checksum_fold, tcp::flags::*};

    /// Ethernet + IPv4 + 20-byte TCP header with a valid checksum.
    fn tcp_frame(
        src: ([u8; 4], u16),
        dst: ([u8; 4], u16),
        flag_bits: u8,
        seq: u32,
        ack: u32,
        payload: &[u8],
    ) -> Vec<u8> {
        let tcp_len = 20 + payload.len();
        let mut frame = vec![0u8; 14 + 20 + tcp_len];
        frame[12] = 0x08;
        frame[13] = 0x00;

        let ip = &mut frame[14..34];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&((20 + tcp_len) as u16).to_be_bytes());
        ip[8] = 64;
        ip[9] = 6;
        ip[12..16].copy_from_slice(&src.0);
        ip[16..20].copy_from_slice(&dst.0);
        let ip_sum = !checksum_fold(checksum_add(0, ip));
        ip[10..12].copy_from_slice(&ip_sum.to_be_bytes());

        let tcp = &mut frame[34..];
        tcp[0..2].copy_from_slice(&src.1.to_be_bytes());
        tcp[2..4].copy_from_slice(&dst.1.to_be_bytes());
        tcp[4..8].copy_from_slice(&seq.to_be_bytes());
        tcp[8..12].copy_from_slice(&ack.to_be_bytes());
        tcp[12] = 0x50;
        tcp[13] = flag_bits;
        tcp[14..16].copy_from_slice(&1000u16.to_be_bytes());
        tcp[20..].copy_from_slice(payload);

        let mut pseudo = checksum_add(0, &src.0);
        pseudo = checksum_add(pseudo, &dst.0);
        pseudo = checksum_add(pseudo, &[0, 6]);
        pseudo = checksum_add(pseudo, &(tcp_len as u16).to_be_bytes());
        let sum = !checksum_fold(checksum_add(pseudo, tcp));
        tcp[16..18].copy_from_slice(&sum.to_be_bytes());
        frame
    }

    const CLIENT: ([u8; 4], u16) = ([192, 168, 1, 10], 50000);
    const SERVER: ([u8; 4], u16) = ([192, 168, 1, 1], 443);

    fn table() -> ConnTable {
        ConnTable::new(TcpTracker::default(), 0)
    }

    fn committed(outcome: &FrameOutcome, expect: Status) -> bool {
        matches!(
            outcome,
            FrameOutcome::Tracked {
                verdict: Verdict::Accept(Outcome::Committed { status, .. }),
                ..
            } if *status == expect
        )
    }

    #[test]
    fn handshake_from_raw_frames() {
        let mut table = table();
        let syn = tcp_frame(CLIENT, SERVER, SYN, 100, 0, &[]);
        let synack = tcp_frame(SERVER, CLIENT, SYN | ACK, 500, 101, &[]);
        let ack = tcp_frame(CLIENT, SERVER, ACK, 101, 501, &[]);
        let data = tcp_frame(CLIENT, SERVER, ACK | PSH, 101, 501, b"hello");

        assert!(committed(&track_frame(&mut table, 0.0, &syn, true), Status::SynSent));
        assert!(committed(&track_frame(&mut table, 0.1, &synack, true), Status::SynRecv));
        assert!(committed(&track_frame(&mut table, 0.2, &ack, true), Status::Established));
        assert!(committed(&track_frame(&mut table, 0.3, &data, true), Status::Established));

        let snap = table.snapshot();
        assert_eq!(snap[0].original.end, 106);
        assert!(snap[0].assured);
    }

    #[test]
    fn corrupted_checksum_is_malformed() {
        let mut table = table();
        let mut syn = tcp_frame(CLIENT, SERVER, SYN, 100, 0, &[]);
        let last = syn.len() - 1;
        syn[last] ^= 0xFF;

        match track_frame(&mut table, 0.0, &syn, true) {
            FrameOutcome::Malformed { error, .. } => assert_eq!(error, SanityError::BadChecksum),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(table.is_empty());
        assert_eq!(table.stats().reject_reasons.get("bad_checksum"), Some(&1));

        // Verification off: the same frame opens a connection.
        assert!(committed(&track_frame(&mut table, 0.0, &syn, false), Status::SynSent));
    }

    #[test]
    fn truncated_capture_skips_checksum() {
        let mut table = table();
        let data = tcp_frame(CLIENT, SERVER, ACK | PSH, 7000, 1, &[0xAB; 40]);
        // Snap length cut the payload; declared length still counts.
        let outcome = track_frame(&mut table, 0.0, &data[..data.len() - 20], true);
        assert!(committed(&outcome, Status::Established));
        assert_eq!(table.snapshot()[0].original.end, 7040);
    }

    #[test]
    fn non_tcp_frames_are_skipped() {
        let mut table = table();
        let mut udp = tcp_frame(CLIENT, SERVER, 0, 0, 0, &[]);
        udp[14 + 9] = 17;
        assert!(matches!(track_frame(&mut table, 0.0, &udp, true), FrameOutcome::Skipped));
        assert!(matches!(track_frame(&mut table, 0.0, &[0u8; 8], true), FrameOutcome::Skipped));
        assert_eq!(table.stats().segments, 0);
    }

    #[test]
    fn reject_notices_reach_the_aggregator() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (agg_tx, agg_rx) = crossbeam_channel::unbounded();
        let running = AtomicBool::new(true);

        tx.send(OwnedPacket {
            id: 7,
            ts: 1.0,
            wire_len: 54,
            data: tcp_frame(CLIENT, SERVER, FIN | ACK, 1, 1, &[]),
        })
        .unwrap();
        drop(tx);

        let mut worker = Worker::new(
            0,
            WorkerConfig {
                report_rejects: true,
                ..WorkerConfig::default()
            },
        );
        worker.run(rx, agg_tx, &running);

        let events: Vec<WorkerEvent> = agg_rx.try_iter().collect();
        let notice = events
            .iter()
            .find_map(|e| match e {
                WorkerEvent::Rejected(n) => Some(n),
                _ => None,
            })
            .unwrap();
        assert_eq!(notice.frame_id, 7);
        let expected = RejectReason::Untrackable {
            class: FlagClass::Fin,
        };
        assert_eq!(notice.reason, expected.to_string());

        let shutdown = events
            .iter()
            .find_map(|e| match e {
                WorkerEvent::Shutdown(s) => Some(s),
                _ => None,
            })
            .unwrap();
        assert!(shutdown.conns.is_empty());
        assert_eq!(shutdown.stats.rejected, 1);
    }
}
