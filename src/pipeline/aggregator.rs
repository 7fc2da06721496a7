//! Aggregator: collects events from all worker shards, merges per-tick
//! counters and keeps the final snapshots for export.

use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::conntrack::Status;
use crate::table::{ConnSnapshot, TableStats};

use super::worker::{RejectNotice, ShardTick, WorkerEvent};

/// Tick data merged from all shards.
#[derive(Debug, Clone)]
pub struct AggregatedTick {
    pub interval_ms: u64,
    pub frames: u64,
    pub bytes: u64,
    pub fps: f64,
    pub mbps: f64,
    pub active_conns: usize,
    pub status_counts: [usize; Status::COUNT],
    /// Cumulative across shards.
    pub totals: TableStats,
}

/// Shared state the main thread reads for CLI stats and the final snapshot.
#[derive(Clone)]
pub struct AggregatorHandle {
    inner: Arc<Mutex<AggregatorState>>,
}

struct AggregatorState {
    num_workers: usize,
    latest_tick: Option<AggregatedTick>,
    reject_count: u64,
    shard_snapshots: Vec<Vec<ConnSnapshot>>,
    final_stats: TableStats,
}

impl AggregatorHandle {
    pub fn new(num_workers: usize) -> Self {
        AggregatorHandle {
            inner: Arc::new(Mutex::new(AggregatorState {
                num_workers,
                latest_tick: None,
                reject_count: 0,
                shard_snapshots: Vec::new(),
                final_stats: TableStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the latest merged tick (`None` if nothing new since last call).
    pub fn take_tick(&self) -> Option<AggregatedTick> {
        self.lock().latest_tick.take()
    }

    /// Rejections reported so far.
    pub fn reject_count(&self) -> u64 {
        self.lock().reject_count
    }

    /// All final records, oldest first (call after pipeline shutdown).
    pub fn take_final_snapshots(&self) -> Vec<ConnSnapshot> {
        let mut state = self.lock();
        let mut all: Vec<ConnSnapshot> = state.shard_snapshots.drain(..).flatten().collect();
        all.sort_by(|a, b| {
            a.first_seen
                .partial_cmp(&b.first_seen)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        all
    }

    /// Counters summed over every shard that has shut down.
    pub fn final_stats(&self) -> TableStats {
        self.lock().final_stats.clone()
    }

    fn record_reject(&self, notice: RejectNotice) {
        self.lock().reject_count += 1;
        println!(
            "[reject] #{} {:.6} {}: {}",
            notice.frame_id, notice.ts, notice.flow, notice.reason
        );
    }

    fn record_shutdown(&self, conns: Vec<ConnSnapshot>, stats: &TableStats) {
        let mut state = self.lock();
        state.shard_snapshots.push(conns);
        state.final_stats.merge(stats);
    }
}

/// Run the aggregator loop. Blocks until all worker senders disconnect.
pub fn run(rx: Receiver<WorkerEvent>, handle: AggregatorHandle, running: &AtomicBool) {
    let num_workers = handle.lock().num_workers;

    // Merge once every shard has reported.
    let mut pending_ticks: Vec<Option<ShardTick>> = vec![None; num_workers];
    let mut tick_start = Instant::now();

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(WorkerEvent::ShardTick(shard_tick)) => {
                let idx = shard_tick.shard_id;
                if idx < pending_ticks.len() {
                    pending_ticks[idx] = Some(shard_tick);
                }

                if pending_ticks.iter().all(|t| t.is_some()) {
                    let elapsed = tick_start.elapsed().as_secs_f64().max(0.001);
                    let merged = merge_ticks(&mut pending_ticks, elapsed);
                    handle.lock().latest_tick = Some(merged);
                    tick_start = Instant::now();
                }
            }
            Ok(event) => handle_event(event, &handle),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::Relaxed) {
                    drain_channel(&rx, &handle);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                // Keep the Shutdown events still queued.
                drain_channel(&rx, &handle);
                break;
            }
        }
    }

    tracing::debug!("aggregator shut down");
}

fn handle_event(event: WorkerEvent, handle: &AggregatorHandle) {
    match event {
        WorkerEvent::Rejected(notice) => handle.record_reject(notice),
        WorkerEvent::Shutdown(shutdown) => {
            tracing::debug!(
                shard = shutdown.shard_id,
                conns = shutdown.conns.len(),
                "shard snapshot received"
            );
            handle.record_shutdown(shutdown.conns, &shutdown.stats);
        }
        // Partial ticks at shutdown would report a misleadingly short interval.
        WorkerEvent::ShardTick(_) => {}
    }
}

fn drain_channel(rx: &Receiver<WorkerEvent>, handle: &AggregatorHandle) {
    while let Ok(event) = rx.try_recv() {
        handle_event(event, handle);
    }
}

fn merge_ticks(pending: &mut [Option<ShardTick>], elapsed_secs: f64) -> AggregatedTick {
    let mut frames: u64 = 0;
    let mut bytes: u64 = 0;
    let mut active_conns: usize = 0;
    let mut status_counts = [0usize; Status::COUNT];
    let mut totals = TableStats::default();

    for slot in pending.iter_mut() {
        if let Some(tick) = slot.take() {
            frames += tick.frames;
            bytes += tick.bytes;
            active_conns += tick.active_conns;
            for (sum, count) in status_counts.iter_mut().zip(tick.status_counts) {
                *sum += count;
            }
            totals.merge(&tick.stats);
        }
    }

    AggregatedTick {
        interval_ms: (elapsed_secs * 1000.0) as u64,
        frames,
        bytes,
        fps: frames as f64 / elapsed_secs,
        mbps: bytes as f64 * 8.0 / elapsed_secs / 1_000_000.0,
        active_conns,
        status_counts,
        totals,
    }
}
