//! The walk program: what a windowed traversal engine calls into.
//!
//! Per iteration the engine calls [`WalkCallbacks::on_iteration_start`], then for each window
//! `on_window_start`, `on_vertex_visited` for every scheduled vertex in it, and
//! `on_window_end`. After the last iteration it calls `on_run_end`.
//!
//! [`DrunkardMob`] advances every walk by one transition per iteration. A walk is only
//! advanced when its parity says it has made exactly `iteration` transitions; walks that
//! already moved this iteration (into a later window) wait for the next one. Walks on a vertex
//! the engine skipped count as having stayed put, so they are due again next iteration.

use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::aggregator::Aggregator;
use crate::delivery::{DeliveryBatch, DeliveryConfig, DeliveryHandle, DeliveryPipeline, DeliveryReport};
use crate::scheduler::Scheduler;
use crate::transition::{choose_destination, DEFAULT_RESET_PROBABILITY};
use crate::walk_store::{WalkStore, WindowSnapshot};
use crate::{Error, Result, VertexId};

/// Hooks a traversal engine drives.
pub trait WalkCallbacks {
    fn on_iteration_start(&mut self, iteration: usize, scheduler: &mut dyn Scheduler);

    /// `first..=last` is about to be processed.
    fn on_window_start(&mut self, first: VertexId, last: VertexId, scheduler: &mut dyn Scheduler);

    fn on_vertex_visited(&mut self, vertex: VertexId, out_neighbors: &[VertexId]) -> Result<()>;

    fn on_window_end(&mut self, first: VertexId, last: VertexId);

    fn on_run_end(&mut self) -> Result<()>;
}

/// Job parameters.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MobConfig {
    /// Sources are the vertices `first_source..first_source + num_sources`.
    pub num_sources: u32,
    pub first_source: VertexId,
    pub walks_per_source: u32,
    /// Transitions per walk. The engine runs `max_hops + 1` iterations.
    pub max_hops: usize,
    pub reset_probability: f64,
    pub seed: u64,
}

impl Default for MobConfig {
    fn default() -> Self {
        Self {
            num_sources: 1,
            first_source: 0,
            walks_per_source: 1000,
            max_hops: 10,
            reset_probability: DEFAULT_RESET_PROBABILITY,
            seed: 42,
        }
    }
}

impl MobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_sources == 0 {
            return Err(Error::InvalidParameter(
                "num_sources must be > 0".to_string(),
            ));
        }
        if self.first_source.checked_add(self.num_sources - 1).is_none() {
            return Err(Error::InvalidParameter(
                "first_source + num_sources overflows the vertex id range".to_string(),
            ));
        }
        if self.walks_per_source == 0 {
            return Err(Error::InvalidParameter(
                "walks_per_source must be > 0".to_string(),
            ));
        }
        if self.max_hops == 0 {
            return Err(Error::InvalidParameter(
                "max_hops must be > 0".to_string(),
            ));
        }
        // A source can land on one vertex at most once per walk per iteration.
        let per_vertex = u64::from(self.walks_per_source).saturating_mul(self.iterations() as u64);
        if per_vertex > i32::MAX as u64 {
            return Err(Error::InvalidParameter(format!(
                "walks_per_source * (max_hops + 1) = {per_vertex} exceeds the i32 count range"
            )));
        }
        if !self.reset_probability.is_finite() || !(0.0..=1.0).contains(&self.reset_probability) {
            return Err(Error::InvalidParameter(
                "reset_probability must be in [0,1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Iterations the engine must run.
    pub fn iterations(&self) -> usize {
        self.max_hops.saturating_add(1)
    }

    pub fn source_vertices(&self) -> impl Iterator<Item = VertexId> {
        let first = self.first_source;
        (0..self.num_sources).map(move |i| first + i)
    }

    /// Export prefix for a graph named `base`.
    pub fn output_prefix(&self, base: &str) -> String {
        format!("{base}_{}", self.first_source)
    }
}

/// Walks from many sources, reported to an aggregator as they land.
pub struct DrunkardMob {
    config: MobConfig,
    store: WalkStore,
    aggregator: Arc<dyn Aggregator>,
    pipeline: Option<DeliveryPipeline>,
    delivery: DeliveryHandle,
    rng: ChaCha8Rng,
    iteration: usize,
    snapshot: Option<WindowSnapshot>,
    window_batch: Option<DeliveryBatch>,
    output_base: Option<String>,
    report: Option<DeliveryReport>,
}

impl DrunkardMob {
    /// Register `walks_per_source` walks on every source in the configured range, tell the
    /// aggregator about the sources and start the delivery pipeline.
    pub fn new(
        config: MobConfig,
        aggregator: Arc<dyn Aggregator>,
        delivery: DeliveryConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            first = config.first_source,
            last = config.first_source + (config.num_sources - 1),
            walks_per_source = config.walks_per_source,
            max_hops = config.max_hops,
            "configuring walks"
        );
        let t = Instant::now();
        let mut store = WalkStore::new();
        for v in config.source_vertices() {
            store.add_walk_batch(v, config.walks_per_source)?;
        }
        store.initialize_walks()?;
        info!(
            walks = store.total_walks(),
            elapsed_ms = t.elapsed().as_millis() as u64,
            "configured walks"
        );
        Self::with_store(config, store, aggregator, delivery)
    }

    /// Run over an already initialized store with arbitrary sources.
    ///
    /// Only `max_hops`, `reset_probability`, `seed` and `first_source` (for the export prefix)
    /// of `config` are used.
    pub fn with_store(
        config: MobConfig,
        store: WalkStore,
        aggregator: Arc<dyn Aggregator>,
        delivery: DeliveryConfig,
    ) -> Result<Self> {
        if !store.is_initialized() {
            return Err(Error::NotInitialized);
        }
        aggregator.set_sources(store.sources().vertices())?;
        let source_vertices: Arc<[VertexId]> = Arc::from(store.sources().vertices());
        let pipeline = DeliveryPipeline::spawn(Arc::clone(&aggregator), source_vertices, delivery)?;

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            delivery: pipeline.handle(),
            pipeline: Some(pipeline),
            config,
            store,
            aggregator,
            iteration: 0,
            snapshot: None,
            window_batch: None,
            output_base: None,
            report: None,
        })
    }

    /// Export distributions under `config.output_prefix(base)` when the run ends.
    pub fn with_output_base(mut self, base: impl Into<String>) -> Self {
        self.output_base = Some(base.into());
        self
    }

    pub fn config(&self) -> &MobConfig {
        &self.config
    }

    pub fn store(&self) -> &WalkStore {
        &self.store
    }

    pub fn delivery(&self) -> &DeliveryHandle {
        &self.delivery
    }

    /// Walks held by the store or the open window snapshot.
    pub fn resident_walks(&self) -> u64 {
        self.store.resident_walks() + self.snapshot.as_ref().map_or(0, |s| s.resident_walks())
    }

    /// Final delivery counters, available after [`WalkCallbacks::on_run_end`].
    pub fn report(&self) -> Option<DeliveryReport> {
        self.report
    }
}

impl WalkCallbacks for DrunkardMob {
    fn on_iteration_start(&mut self, iteration: usize, scheduler: &mut dyn Scheduler) {
        self.iteration = iteration;
        if iteration == 0 {
            scheduler.remove_all_tasks();
            self.store.schedule_sources(scheduler);
        }
        debug!(iteration, pending = self.delivery.pending(), "iteration start");
    }

    fn on_window_start(&mut self, first: VertexId, last: VertexId, scheduler: &mut dyn Scheduler) {
        let t = Instant::now();
        self.store.schedule_for_window(scheduler, first, last);
        self.snapshot = Some(self.store.grab_snapshot(first, last));
        self.window_batch = Some(DeliveryBatch::new(first));
        debug!(
            first,
            last,
            elapsed_us = t.elapsed().as_micros() as u64,
            "grabbed window"
        );
    }

    fn on_vertex_visited(&mut self, vertex: VertexId, out_neighbors: &[VertexId]) -> Result<()> {
        self.delivery.wait_for_capacity(self.store.total_walks());

        let first_iteration = self.iteration == 0;
        if first_iteration {
            if let Some(idx) = self.store.source_index_of(vertex) {
                self.aggregator.set_avoid_list(idx, out_neighbors)?;
            }
        }

        let (Some(snapshot), Some(batch)) = (self.snapshot.as_mut(), self.window_batch.as_mut()) else {
            panic!("vertex {vertex} visited outside a window");
        };
        let Some(walks) = snapshot.take(vertex) else {
            return Ok(());
        };

        let due = self.iteration % 2 == 1;
        for walk in walks.iter() {
            if walk.parity != due {
                // Already moved this iteration.
                self.store.update_walk(walk.source, vertex, walk.parity);
                continue;
            }
            batch.push(vertex, walk);
            let home = self.store.source_vertex_of(walk.source);
            let dst = choose_destination(
                &mut self.rng,
                out_neighbors,
                home,
                self.config.reset_probability,
                first_iteration,
            );
            self.store.update_walk(walk.source, dst, !walk.parity);
        }
        Ok(())
    }

    fn on_window_end(&mut self, first: VertexId, last: VertexId) {
        if let Some(mut snapshot) = self.snapshot.take() {
            // Skipped walks stay put for this iteration and move again in the next.
            let stayed = snapshot.stay_unvisited(self.iteration % 2 == 1);
            let restored = snapshot.restore_ungrabbed(&mut self.store);
            if restored > 0 {
                debug!(first, last, restored, stayed, "restored unvisited walks");
            }
        }
        if let Some(batch) = self.window_batch.take() {
            self.delivery.submit(batch);
        }
    }

    fn on_run_end(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            let (first, last) = (snapshot.first(), snapshot.last());
            snapshot.restore_ungrabbed(&mut self.store);
            if let Some(batch) = self.window_batch.take() {
                self.delivery.submit(batch);
            }
            debug!(first, last, "closed window left open at run end");
        }
        if let Some(pipeline) = self.pipeline.take() {
            self.report = Some(pipeline.finish());
        }
        if let Some(base) = &self.output_base {
            let prefix = self.config.output_prefix(base);
            self.aggregator.output_distributions(&prefix)?;
        }
        Ok(())
    }
}
