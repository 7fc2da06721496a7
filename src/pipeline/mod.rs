//! Sharded tracking pipeline.
//!
//! Frames are split across N worker threads ("shards") by connection, so
//! each worker owns its `ConnTable` outright and the hot path takes no
//! table-wide lock.
//!
//! Architecture:
//!
//! ```text
//! pcap capture (main thread)
//!   |
//!   |-- hash TCP 4-tuple → shard = hash % N   (non-TCP frames skipped)
//!   |
//!   +--[crossbeam channel]--→ Worker 0  (parse, sanity, track)
//!   +--[crossbeam channel]--→ Worker 1
//!   ...
//!   +--[crossbeam channel]--→ Worker N-1
//!
//! Workers --[crossbeam]--→ Aggregator thread
//!                              |
//!                              +--→ CLI stats / reject lines
//!                              +--→ final snapshots for export
//! ```

pub mod aggregator;
pub mod router;
pub mod worker;

use crate::config::Config;
use crate::conntrack::TrackerSettings;
use crossbeam_channel::{bounded, Sender};
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

pub use aggregator::{AggregatedTick, AggregatorHandle};
pub use worker::WorkerEvent;

/// An owned frame sent from the capture thread to a worker.
#[derive(Debug)]
pub struct OwnedPacket {
    /// Monotonic capture-wide frame index.
    pub id: u64,
    /// pcap timestamp as seconds since epoch.
    pub ts: f64,
    /// Wire length (from pcap header).
    pub wire_len: u64,
    /// Owned copy of frame bytes.
    pub data: Vec<u8>,
}

/// What every worker needs to build its table.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub settings: TrackerSettings,
    pub verify_checksum: bool,
    pub max_conns: usize,
    pub tick_ms: u64,
    /// Forward a notice to the aggregator for every rejected segment.
    pub report_rejects: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            settings: TrackerSettings::default(),
            verify_checksum: true,
            max_conns: 65_536,
            tick_ms: 1000,
            report_rejects: false,
        }
    }
}

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of worker shards (0 = auto-detect from CPU count).
    pub num_workers: usize,
    /// Capacity of each capture → worker channel.
    pub channel_capacity: usize,
    pub worker: WorkerConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        PipelineConfig {
            num_workers: config.run.workers,
            channel_capacity: 4096,
            worker: WorkerConfig {
                settings: config.tracking.to_settings(),
                verify_checksum: config.tracking.verify_checksum,
                max_conns: config.table.max_conns,
                tick_ms: config.stats.interval_ms,
                report_rejects: !config.output.quiet,
            },
        }
    }
}

/// Handle returned by [`spawn`]: the capture thread uses it to dispatch
/// frames and to read aggregated results.
pub struct PipelineHandle {
    /// Per-shard senders. The capture thread picks `senders[shard]`.
    pub senders: Vec<Sender<OwnedPacket>>,
    pub aggregator: AggregatorHandle,
    worker_handles: Vec<thread::JoinHandle<()>>,
    aggregator_handle: Option<thread::JoinHandle<()>>,
}

impl PipelineHandle {
    /// Number of worker shards.
    pub fn num_workers(&self) -> usize {
        self.senders.len()
    }

    /// Stop all workers (by dropping senders) and join threads.
    /// The `aggregator` handle remains valid afterwards for reading final
    /// snapshots.
    pub fn shutdown(&mut self) {
        self.senders.clear();
        for h in self.worker_handles.drain(..) {
            let _ = h.join();
        }
        // Exits once every worker event sender is gone.
        if let Some(h) = self.aggregator_handle.take() {
            let _ = h.join();
        }
    }
}

/// Resolve the worker count: 0 means half the cores, between 1 and 8.
pub fn worker_count(requested: usize) -> usize {
    if requested == 0 {
        (num_cpus::get() / 2).clamp(1, 8)
    } else {
        requested
    }
}

/// Spawn the sharded pipeline.
pub fn spawn(config: PipelineConfig, running: Arc<AtomicBool>) -> io::Result<PipelineHandle> {
    let num_workers = worker_count(config.num_workers);

    tracing::info!(num_workers, "starting sharded pipeline");

    let (agg_tx, agg_rx) = crossbeam_channel::unbounded::<WorkerEvent>();

    let mut senders = Vec::with_capacity(num_workers);
    let mut worker_handles = Vec::with_capacity(num_workers);

    for shard_id in 0..num_workers {
        let (pkt_tx, pkt_rx) = bounded::<OwnedPacket>(config.channel_capacity);
        senders.push(pkt_tx);

        let agg_tx = agg_tx.clone();
        let running = running.clone();
        let worker_cfg = config.worker.clone();

        let handle = thread::Builder::new()
            .name(format!("ct-worker-{}", shard_id))
            .spawn(move || {
                let mut w = worker::Worker::new(shard_id, worker_cfg);
                w.run(pkt_rx, agg_tx, &running);
            })?;

        worker_handles.push(handle);
    }

    // Only workers may hold senders, so the aggregator sees the disconnect.
    drop(agg_tx);

    let agg_running = running.clone();
    let agg_handle = AggregatorHandle::new(num_workers);
    let agg_handle_clone = agg_handle.clone();

    let aggregator_thread = thread::Builder::new()
        .name("ct-aggregator".into())
        .spawn(move || aggregator::run(agg_rx, agg_handle_clone, &agg_running))?;

    Ok(PipelineHandle {
        senders,
        aggregator: agg_handle,
        worker_handles,
        aggregator_handle: Some(aggregator_thread),
    })
}
