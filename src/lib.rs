//! `drunkard`: many short random walks from many sources, streamed over a graph in windows,
//! with landing positions shipped in batches to an aggregator that keeps one sparse
//! frequency distribution per source.
//!
//! The traversal engine is external: it calls into [`WalkCallbacks`] once per iteration,
//! window and visited vertex. [`InMemoryDriver`] is a small reference engine for graphs that
//! fit in memory.
//!
//! Public invariants (must not drift):
//! - **Conservation**: at every iteration boundary the walks resident in the [`WalkStore`]
//!   equal [`WalkStore::total_walks`]. Walks are moved, never dropped.
//! - **Avoidance is absorbing**: a [`Distribution`] entry with count `-1` stays `-1` through
//!   any number of merges.
//! - **At-most-once delivery**: a landing handed to the [`DeliveryPipeline`] is attempted once;
//!   failed aggregator calls drop their array.
//!
//! Swappable (allowed to change without breaking the contract):
//! - bucket layout inside the walk store
//! - batching sizes and poll intervals of the delivery pipeline
//! - the aggregator transport

pub mod aggregator;
pub mod delivery;
pub mod distribution;
pub mod driver;
pub mod graph;
pub mod program;
pub mod scheduler;
pub mod sources;
pub mod topk;
pub mod transition;
pub mod walk_store;

pub use aggregator::{Aggregator, LocalAggregator};
pub use delivery::{DeliveryBatch, DeliveryConfig, DeliveryHandle, DeliveryPipeline, DeliveryReport};
pub use distribution::Distribution;
pub use driver::{DriverConfig, InMemoryDriver};
pub use graph::{AdjacencyList, GraphRef};
pub use program::{DrunkardMob, MobConfig, WalkCallbacks};
pub use scheduler::{Scheduler, VertexScheduler};
pub use sources::SourceRegistry;
pub use topk::top_k_counts;
pub use transition::{choose_destination, DEFAULT_RESET_PROBABILITY};
pub use walk_store::{Bucket, WalkRecord, WalkStore, WindowSnapshot};

/// Vertex id as streamed by the traversal driver.
pub type VertexId = u32;

/// Position of a source in registration order, `0..num_sources`.
pub type SourceIndex = u32;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("walks are already initialized")]
    AlreadyInitialized,
    #[error("walks are not initialized yet")]
    NotInitialized,
    #[error("vertex {0} is already registered as a source")]
    DuplicateSource(VertexId),
    #[error("unknown source index: {0}")]
    UnknownSource(SourceIndex),
    #[error("vertex out of range: {0}")]
    VertexOutOfRange(VertexId),
    #[error("aggregator call failed: {0}")]
    Aggregator(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
