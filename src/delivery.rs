//! Hand-off from the traversal thread to a background sender that ships walk landings to the
//! aggregator.
//!
//! - The traversal thread builds one [`DeliveryBatch`] per window and submits it through a
//!   [`DeliveryHandle`]. Ownership moves to the sender; the walk store never sees it again.
//! - A single sender thread drains a bounded queue, drops self-landings (a walk sitting on its
//!   own source), and coalesces the rest into arrays of `batch_capacity` entries per
//!   [`Aggregator::process_walks`] call.
//! - Before expanding a vertex the traversal thread calls
//!   [`DeliveryHandle::wait_for_capacity`], which blocks while more than
//!   `total_walks / backlog_divisor` walks are submitted but not yet processed by the sender.
//! - [`DeliveryPipeline::finish`] drains the queue to completion, flushes the trailing partial
//!   array and joins the sender.
//!
//! Failed aggregator calls are logged and their array is dropped. There is no retry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::walk_store::WalkRecord;
use crate::{Error, Result, VertexId};

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeliveryConfig {
    /// Entries per `process_walks` call.
    pub batch_capacity: usize,
    /// Window batches the queue holds before `submit` blocks.
    pub queue_capacity: usize,
    /// How long the sender waits on an empty queue before re-checking the finished flag, and
    /// how often a blocked producer re-checks the backlog.
    pub poll_interval: Duration,
    /// Backlog threshold is `total_walks / backlog_divisor`.
    pub backlog_divisor: u64,
    /// Emit a progress line every this many received batches.
    pub log_every: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_capacity: 256 * 1024,
            queue_capacity: 1024,
            poll_interval: Duration::from_millis(1000),
            backlog_divisor: 40,
            log_every: 1000,
        }
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_capacity == 0 {
            return Err(Error::InvalidParameter(
                "batch_capacity must be > 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidParameter(
                "queue_capacity must be > 0".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "poll_interval must be > 0".to_string(),
            ));
        }
        if self.backlog_divisor == 0 {
            return Err(Error::InvalidParameter(
                "backlog_divisor must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Walk landings for one vertex range: `first_vertex` plus, per walk, its offset into the range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryBatch {
    first_vertex: VertexId,
    offsets: Vec<u32>,
    walks: Vec<WalkRecord>,
}

impl DeliveryBatch {
    pub fn new(first_vertex: VertexId) -> Self {
        Self {
            first_vertex,
            offsets: Vec::new(),
            walks: Vec::new(),
        }
    }

    pub fn first_vertex(&self) -> VertexId {
        self.first_vertex
    }

    /// Record that `walk` landed on `vertex`. `vertex` must not precede `first_vertex`.
    pub fn push(&mut self, vertex: VertexId, walk: WalkRecord) {
        debug_assert!(vertex >= self.first_vertex, "vertex {vertex} before batch base");
        self.offsets.push(vertex - self.first_vertex);
        self.walks.push(walk);
    }

    pub fn len(&self) -> usize {
        self.walks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.walks.is_empty()
    }

    /// `(destination vertex, walk)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (VertexId, WalkRecord)> + '_ {
        let base = self.first_vertex;
        self.offsets
            .iter()
            .zip(self.walks.iter())
            .map(move |(&off, &w)| (base + off, w))
    }
}

#[derive(Debug, Default)]
struct DeliveryStats {
    batches_received: AtomicU64,
    walks_submitted: AtomicU64,
    walks_sent: AtomicU64,
    self_landings: AtomicU64,
    remote_calls: AtomicU64,
    failed_calls: AtomicU64,
    walks_lost: AtomicU64,
    admission_waits: AtomicU64,
    peak_pending: AtomicU64,
    max_admitted_pending: AtomicU64,
}

/// Counters of a pipeline, copied out at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub batches_received: u64,
    pub walks_submitted: u64,
    pub walks_sent: u64,
    pub self_landings: u64,
    pub remote_calls: u64,
    pub failed_calls: u64,
    pub walks_lost: u64,
    pub admission_waits: u64,
    pub peak_pending: u64,
    /// Largest backlog seen at the moment a producer was let through admission control.
    pub max_admitted_pending: u64,
    pub pending: u64,
}

#[derive(Debug, Default)]
struct Shared {
    pending: AtomicU64,
    finished: AtomicBool,
    sender_alive: AtomicBool,
    gate: Mutex<()>,
    drained: Condvar,
    stats: DeliveryStats,
}

impl Shared {
    fn report(&self) -> DeliveryReport {
        let s = &self.stats;
        DeliveryReport {
            batches_received: s.batches_received.load(Ordering::Relaxed),
            walks_submitted: s.walks_submitted.load(Ordering::Relaxed),
            walks_sent: s.walks_sent.load(Ordering::Relaxed),
            self_landings: s.self_landings.load(Ordering::Relaxed),
            remote_calls: s.remote_calls.load(Ordering::Relaxed),
            failed_calls: s.failed_calls.load(Ordering::Relaxed),
            walks_lost: s.walks_lost.load(Ordering::Relaxed),
            admission_waits: s.admission_waits.load(Ordering::Relaxed),
            peak_pending: s.peak_pending.load(Ordering::Relaxed),
            max_admitted_pending: s.max_admitted_pending.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Acquire),
        }
    }

    fn wake_producers(&self) {
        let _g = self.gate.lock();
        self.drained.notify_all();
    }
}

/// Producer side of the pipeline, held by the traversal thread.
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    tx: Sender<DeliveryBatch>,
    shared: Arc<Shared>,
    poll_interval: Duration,
    backlog_divisor: u64,
}

impl DeliveryHandle {
    /// Queue `batch` for delivery, blocking while the queue is full.
    pub fn submit(&self, batch: DeliveryBatch) {
        if batch.is_empty() {
            return;
        }
        let n = batch.len() as u64;
        let stats = &self.shared.stats;
        let pending = self.shared.pending.fetch_add(n, Ordering::AcqRel) + n;
        stats.walks_submitted.fetch_add(n, Ordering::Relaxed);
        stats.peak_pending.fetch_max(pending, Ordering::Relaxed);

        if let Err(err) = self.tx.send(batch) {
            // Sender thread is gone; nothing will ever drain this.
            self.shared.pending.fetch_sub(n, Ordering::AcqRel);
            stats.walks_lost.fetch_add(n, Ordering::Relaxed);
            error!(walks = err.0.len(), "delivery sender is gone, dropping batch");
        }
    }

    /// Block while the undelivered backlog exceeds `total_walks / backlog_divisor`.
    ///
    /// Soft bound: the backlog is re-read after every wake-up or poll interval, not enforced
    /// atomically against concurrent submits. Returns immediately if the sender has exited.
    pub fn wait_for_capacity(&self, total_walks: u64) {
        let threshold = total_walks / self.backlog_divisor;
        let stats = &self.shared.stats;
        let mut pending = self.shared.pending.load(Ordering::Acquire);
        if pending > threshold {
            stats.admission_waits.fetch_add(1, Ordering::Relaxed);
            warn!(pending, threshold, "too many walks waiting for delivery");
            let mut guard = self.shared.gate.lock();
            loop {
                pending = self.shared.pending.load(Ordering::Acquire);
                if pending <= threshold || !self.shared.sender_alive.load(Ordering::Acquire) {
                    break;
                }
                // Timed out or spuriously woken alike: re-check.
                let _ = self.shared.drained.wait_for(&mut guard, self.poll_interval);
            }
        }
        stats.max_admitted_pending.fetch_max(pending, Ordering::Relaxed);
    }

    /// Walks submitted but not yet processed by the sender.
    pub fn pending(&self) -> u64 {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn report(&self) -> DeliveryReport {
        self.shared.report()
    }
}

/// Owns the sender thread.
#[derive(Debug)]
pub struct DeliveryPipeline {
    handle: DeliveryHandle,
    worker: Option<JoinHandle<()>>,
}

impl DeliveryPipeline {
    /// Start the sender thread.
    ///
    /// `source_vertices[i]` is the vertex of source index `i`, used by the self-landing filter.
    pub fn spawn(
        aggregator: Arc<dyn Aggregator>,
        source_vertices: Arc<[VertexId]>,
        config: DeliveryConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = crossbeam_channel::bounded::<DeliveryBatch>(config.queue_capacity);
        let shared = Arc::new(Shared::default());
        shared.sender_alive.store(true, Ordering::Release);

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("walk-delivery".to_string())
            .spawn(move || {
                let _alive = AliveGuard(Arc::clone(&worker_shared));
                Courier::new(aggregator, source_vertices, config, worker_shared).run(rx);
            })?;

        Ok(Self {
            handle: DeliveryHandle {
                tx,
                shared,
                poll_interval: config.poll_interval,
                backlog_divisor: config.backlog_divisor,
            },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> DeliveryHandle {
        self.handle.clone()
    }

    pub fn report(&self) -> DeliveryReport {
        self.handle.report()
    }

    /// Signal completion, wait until every queued batch has been attempted, and join the
    /// sender thread.
    pub fn finish(mut self) -> DeliveryReport {
        self.shutdown();
        let report = self.handle.report();
        info!(
            sent = report.walks_sent,
            self_landings = report.self_landings,
            lost = report.walks_lost,
            calls = report.remote_calls,
            "delivery finished"
        );
        report
    }

    fn shutdown(&mut self) {
        self.handle.shared.finished.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("delivery sender panicked");
            }
        }
    }
}

impl Drop for DeliveryPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Clears `sender_alive` however the sender thread exits, so blocked producers stop waiting.
struct AliveGuard(Arc<Shared>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.sender_alive.store(false, Ordering::Release);
        self.0.wake_producers();
    }
}

/// State of the sender thread: the array being coalesced and where it goes.
struct Courier {
    aggregator: Arc<dyn Aggregator>,
    source_vertices: Arc<[VertexId]>,
    config: DeliveryConfig,
    shared: Arc<Shared>,
    walks: Vec<WalkRecord>,
    vertices: Vec<VertexId>,
}

impl Courier {
    fn new(
        aggregator: Arc<dyn Aggregator>,
        source_vertices: Arc<[VertexId]>,
        config: DeliveryConfig,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            aggregator,
            source_vertices,
            shared,
            walks: Vec::with_capacity(config.batch_capacity),
            vertices: Vec::with_capacity(config.batch_capacity),
            config,
        }
    }

    fn run(mut self, rx: Receiver<DeliveryBatch>) {
        loop {
            if self.shared.finished.load(Ordering::Acquire) && rx.is_empty() {
                break;
            }
            match rx.recv_timeout(self.config.poll_interval) {
                Ok(batch) => self.accept(batch),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.flush();
    }

    fn accept(&mut self, batch: DeliveryBatch) {
        let shared = Arc::clone(&self.shared);
        let stats = &shared.stats;
        let received = stats.batches_received.fetch_add(1, Ordering::Relaxed) + 1;

        let mut filtered = 0u64;
        for (vertex, walk) in batch.iter() {
            if self.source_vertices.get(walk.source as usize) == Some(&vertex) {
                filtered += 1;
                continue;
            }
            self.walks.push(walk);
            self.vertices.push(vertex);
            if self.walks.len() >= self.config.batch_capacity {
                self.flush();
            }
        }
        stats.self_landings.fetch_add(filtered, Ordering::Relaxed);

        let pending = shared
            .pending
            .fetch_sub(batch.len() as u64, Ordering::AcqRel)
            - batch.len() as u64;
        shared.wake_producers();

        if received % self.config.log_every == 0 {
            debug!(
                batches = received,
                self_landings = stats.self_landings.load(Ordering::Relaxed),
                pending,
                "delivery progress"
            );
        }
    }

    fn flush(&mut self) {
        if self.walks.is_empty() {
            return;
        }
        let n = self.walks.len() as u64;
        let stats = &self.shared.stats;
        stats.remote_calls.fetch_add(1, Ordering::Relaxed);
        match self.aggregator.process_walks(&self.walks, &self.vertices) {
            Ok(()) => {
                stats.walks_sent.fetch_add(n, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                stats.walks_lost.fetch_add(n, Ordering::Relaxed);
                error!(error = %e, walks = n, "aggregator call failed, dropping batch");
            }
        }
        self.walks.clear();
        self.vertices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::LocalAggregator;

    fn quick() -> DeliveryConfig {
        DeliveryConfig {
            batch_capacity: 4,
            queue_capacity: 8,
            poll_interval: Duration::from_millis(10),
            ..DeliveryConfig::default()
        }
    }

    fn batch(first: VertexId, entries: &[(VertexId, u32)]) -> DeliveryBatch {
        let mut b = DeliveryBatch::new(first);
        for &(v, s) in entries {
            b.push(v, WalkRecord::new(s, true));
        }
        b
    }

    /// Records how many entries each call carried, failing every call when asked to.
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<usize>>,
        fail: bool,
    }

    impl Aggregator for Recording {
        fn set_sources(&self, _: &[VertexId]) -> Result<()> {
            Ok(())
        }
        fn set_avoid_list(&self, _: u32, _: &[VertexId]) -> Result<()> {
            Ok(())
        }
        fn process_walks(&self, walks: &[WalkRecord], _: &[VertexId]) -> Result<()> {
            self.calls.lock().push(walks.len());
            if self.fail {
                return Err(Error::Aggregator("unreachable".to_string()));
            }
            Ok(())
        }
        fn output_distributions(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn batch_offsets_resolve_to_vertices() {
        let b = batch(100, &[(100, 0), (103, 1)]);
        let got: Vec<(VertexId, u32)> = b.iter().map(|(v, w)| (v, w.source)).collect();
        assert_eq!(got, vec![(100, 0), (103, 1)]);
    }

    #[test]
    fn coalesces_and_flushes_trailing_entries() {
        let agg = Arc::new(Recording::default());
        let p = DeliveryPipeline::spawn(agg.clone(), Arc::from(vec![0u32, 1]), quick()).unwrap();
        let h = p.handle();
        h.submit(batch(10, &[(10, 0), (11, 0), (12, 1)]));
        h.submit(batch(20, &[(20, 1), (21, 0), (22, 0)]));
        let report = p.finish();

        assert_eq!(*agg.calls.lock(), vec![4, 2]);
        assert_eq!(report.walks_submitted, 6);
        assert_eq!(report.walks_sent, 6);
        assert_eq!(report.pending, 0);
    }

    #[test]
    fn self_landings_are_filtered() {
        let agg = Arc::new(LocalAggregator::new());
        agg.set_sources(&[5, 6]).unwrap();
        let p = DeliveryPipeline::spawn(agg.clone(), Arc::from(vec![5u32, 6]), quick()).unwrap();
        p.handle().submit(batch(5, &[(5, 0), (6, 0), (6, 1), (5, 1)]));
        let report = p.finish();

        assert_eq!(report.self_landings, 2);
        assert_eq!(report.walks_sent, 2);
        let d0 = agg.distribution(0).unwrap();
        assert_eq!(d0.count(5), 0);
        assert_eq!(d0.count(6), 1);
        assert_eq!(agg.distribution(1).unwrap().count(5), 1);
    }

    #[test]
    fn failed_calls_drop_batches_without_retry() {
        let agg = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let p = DeliveryPipeline::spawn(agg.clone(), Arc::from(vec![0u32]), quick()).unwrap();
        p.handle().submit(batch(1, &[(1, 0), (2, 0), (3, 0), (4, 0), (5, 0)]));
        let report = p.finish();

        assert_eq!(*agg.calls.lock(), vec![4, 1]);
        assert_eq!(report.failed_calls, 2);
        assert_eq!(report.walks_lost, 5);
        assert_eq!(report.walks_sent, 0);
    }

    #[test]
    fn finish_drains_everything_queued() {
        let agg = Arc::new(LocalAggregator::new());
        agg.set_sources(&[0]).unwrap();
        let p = DeliveryPipeline::spawn(agg.clone(), Arc::from(vec![0u32]), quick()).unwrap();
        let h = p.handle();
        for i in 0..200u32 {
            h.submit(batch(1, &[(1 + i % 3, 0)]));
        }
        let report = p.finish();
        assert_eq!(report.batches_received, 200);
        assert_eq!(report.walks_sent, 200);
        assert_eq!(agg.distribution(0).unwrap().total_count(), 200);
    }

    #[test]
    fn wait_for_capacity_returns_when_backlog_is_small() {
        let agg = Arc::new(Recording::default());
        let p = DeliveryPipeline::spawn(agg, Arc::from(vec![0u32]), quick()).unwrap();
        let h = p.handle();
        h.wait_for_capacity(4000);
        assert_eq!(h.report().admission_waits, 0);
        p.finish();
    }

    #[test]
    fn submit_after_finish_counts_as_lost() {
        let agg = Arc::new(Recording::default());
        let p = DeliveryPipeline::spawn(agg, Arc::from(vec![0u32]), quick()).unwrap();
        let h = p.handle();
        p.finish();
        // The sender exited, so a blocked producer must not hang either.
        h.wait_for_capacity(0);
        h.submit(batch(1, &[(1, 0)]));
        assert_eq!(h.report().walks_lost, 1);
        assert_eq!(h.pending(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let agg = Arc::new(Recording::default());
        let cfg = DeliveryConfig {
            backlog_divisor: 0,
            ..quick()
        };
        let err = DeliveryPipeline::spawn(agg, Arc::from(vec![0u32]), cfg).unwrap_err();
        assert!(format!("{err}").contains("backlog_divisor"));
    }
}
