//! The aggregator contract, and an in-process implementation of it.
//!
//! Workers only ever talk to an aggregator through [`Aggregator`]. A networked aggregator is a
//! transport concern: implement the trait on a client handle and inject it as
//! `Arc<dyn Aggregator>`. Reconnects and retries belong in that client; the walk core treats a
//! failed call as a dropped batch.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::distribution::Distribution;
use crate::walk_store::WalkRecord;
use crate::{Error, Result, SourceIndex, VertexId};

/// Operations a remote aggregator must provide. All methods may be called concurrently from
/// several workers.
pub trait Aggregator: Send + Sync {
    /// Register sources in index order, one accumulator each.
    fn set_sources(&self, vertices: &[VertexId]) -> Result<()>;

    /// Exclude `vertices` from the accumulator of `source`.
    fn set_avoid_list(&self, source: SourceIndex, vertices: &[VertexId]) -> Result<()>;

    /// Record that `walks[i]` landed on `vertices[i]`.
    fn process_walks(&self, walks: &[WalkRecord], vertices: &[VertexId]) -> Result<()>;

    /// Finalize and export every source's distribution under `prefix`.
    fn output_distributions(&self, prefix: &str) -> Result<()>;
}

/// One source's running distribution.
#[derive(Debug)]
struct Accumulator {
    vertex: VertexId,
    dist: Mutex<Distribution>,
}

/// Aggregator living in the same process, one lock per source accumulator.
///
/// The source list and the accumulators sit behind a single `RwLock`; per-source mutexes are
/// only taken while holding it.
#[derive(Debug, Default)]
pub struct LocalAggregator {
    accumulators: RwLock<Vec<Accumulator>>,
    export_top: Option<usize>,
}

impl LocalAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export at most `k` entries per source.
    pub fn with_export_top(mut self, k: usize) -> Self {
        self.export_top = Some(k);
        self
    }

    pub fn num_sources(&self) -> usize {
        self.accumulators.read().len()
    }

    /// Copy of the accumulated distribution for `source`.
    pub fn distribution(&self, source: SourceIndex) -> Option<Distribution> {
        self.accumulators
            .read()
            .get(source as usize)
            .map(|acc| acc.dist.lock().clone())
    }

    pub fn top(&self, source: SourceIndex, k: usize) -> Option<Vec<(VertexId, i32)>> {
        self.accumulators
            .read()
            .get(source as usize)
            .map(|acc| acc.dist.lock().top(k))
    }

    fn export_path(prefix: &str) -> PathBuf {
        PathBuf::from(format!("{prefix}.distributions"))
    }
}

impl Aggregator for LocalAggregator {
    fn set_sources(&self, vertices: &[VertexId]) -> Result<()> {
        *self.accumulators.write() = vertices
            .iter()
            .map(|&vertex| Accumulator {
                vertex,
                dist: Mutex::new(Distribution::new()),
            })
            .collect();
        info!(sources = vertices.len(), "registered sources");
        Ok(())
    }

    fn set_avoid_list(&self, source: SourceIndex, vertices: &[VertexId]) -> Result<()> {
        let mut sorted = vertices.to_vec();
        sorted.sort_unstable();
        let avoid = Distribution::avoidance(&sorted);

        let accs = self.accumulators.read();
        let acc = accs
            .get(source as usize)
            .ok_or(Error::UnknownSource(source))?;
        acc.dist.lock().merge_from(&avoid);
        Ok(())
    }

    fn process_walks(&self, walks: &[WalkRecord], vertices: &[VertexId]) -> Result<()> {
        if walks.len() != vertices.len() {
            return Err(Error::InvalidParameter(format!(
                "walks and vertices must pair up (walks={} vertices={})",
                walks.len(),
                vertices.len()
            )));
        }
        let accs = self.accumulators.read();
        let mut hits: Vec<(SourceIndex, VertexId)> = Vec::with_capacity(walks.len());
        for (w, &v) in walks.iter().zip(vertices) {
            if w.source as usize >= accs.len() {
                return Err(Error::UnknownSource(w.source));
            }
            hits.push((w.source, v));
        }
        hits.sort_unstable();

        let mut ids: Vec<VertexId> = Vec::new();
        for group in hits.chunk_by(|a, b| a.0 == b.0) {
            let source = group[0].0;
            ids.clear();
            ids.extend(group.iter().map(|&(_, v)| v));
            let d = Distribution::from_sorted(&ids);
            accs[source as usize].dist.lock().merge_from(&d);
        }
        Ok(())
    }

    fn output_distributions(&self, prefix: &str) -> Result<()> {
        let path = Self::export_path(prefix);
        let mut out = BufWriter::new(File::create(&path)?);

        let accs = self.accumulators.read();
        let mut written = 0usize;
        for acc in accs.iter() {
            let d = acc.dist.lock();
            let k = self.export_top.unwrap_or(d.len());
            for (id, count) in d.top(k) {
                writeln!(out, "{}\t{id}\t{count}", acc.vertex)?;
                written += 1;
            }
        }
        out.flush()?;
        info!(path = %path.display(), entries = written, "exported distributions");
        Ok(())
    }
}
