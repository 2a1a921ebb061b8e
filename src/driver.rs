//! Reference traversal engine for graphs that fit in memory.
//!
//! Streams vertex ids `0..n` in fixed-size windows, keeps a work list, and visits only
//! scheduled vertices. Large-graph engines replace this; they only need to call the same
//! [`WalkCallbacks`] hooks in the same order.

use std::time::Instant;

use tracing::info;

use crate::graph::GraphRef;
use crate::program::WalkCallbacks;
use crate::scheduler::VertexScheduler;
use crate::{Error, Result, VertexId};

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriverConfig {
    /// Vertices per window.
    pub window_size: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            window_size: 1 << 16,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::InvalidParameter(
                "window_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// What a run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverRun {
    pub iterations: usize,
    pub windows: usize,
    pub visits: u64,
}

pub struct InMemoryDriver<'g, G: GraphRef> {
    graph: &'g G,
    config: DriverConfig,
}

impl<'g, G: GraphRef> InMemoryDriver<'g, G> {
    pub fn new(graph: &'g G, config: DriverConfig) -> Result<Self> {
        config.validate()?;
        if graph.vertex_count() > VertexId::MAX as usize {
            return Err(Error::InvalidParameter(
                "graph has more vertices than a 32-bit vertex id can address".to_string(),
            ));
        }
        Ok(Self { graph, config })
    }

    /// `(first, last)` of every window, in visiting order.
    pub fn windows(&self) -> Vec<(VertexId, VertexId)> {
        let n = self.graph.vertex_count() as u64;
        let w = u64::from(self.config.window_size);
        (0..n)
            .step_by(w as usize)
            .map(|first| (first as VertexId, (first + w).min(n) as VertexId - 1))
            .collect()
    }

    /// Run `iterations` iterations, then `on_run_end`.
    pub fn run<P: WalkCallbacks + ?Sized>(&self, program: &mut P, iterations: usize) -> Result<DriverRun> {
        let mut scheduler = VertexScheduler::new(self.graph.vertex_count());
        let windows = self.windows();
        let mut run = DriverRun::default();

        for iteration in 0..iterations {
            let t = Instant::now();
            program.on_iteration_start(iteration, &mut scheduler);
            for &(first, last) in &windows {
                program.on_window_start(first, last, &mut scheduler);
                for v in first..=last {
                    if scheduler.take(v) {
                        program.on_vertex_visited(v, self.graph.neighbors_ref(v))?;
                        run.visits += 1;
                    }
                }
                program.on_window_end(first, last);
                run.windows += 1;
            }
            run.iterations += 1;
            info!(
                iteration,
                visits = run.visits,
                elapsed_ms = t.elapsed().as_millis() as u64,
                "iteration done"
            );
        }
        program.on_run_end()?;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AdjacencyList;
    use crate::scheduler::Scheduler;

    /// Logs every hook call.
    #[derive(Default)]
    struct Trace {
        events: Vec<String>,
    }

    impl WalkCallbacks for Trace {
        fn on_iteration_start(&mut self, iteration: usize, scheduler: &mut dyn Scheduler) {
            self.events.push(format!("iter {iteration}"));
            scheduler.add_task(2);
        }
        fn on_window_start(&mut self, first: VertexId, last: VertexId, _: &mut dyn Scheduler) {
            self.events.push(format!("start {first}..{last}"));
        }
        fn on_vertex_visited(&mut self, vertex: VertexId, nbrs: &[VertexId]) -> Result<()> {
            self.events.push(format!("visit {vertex} {nbrs:?}"));
            Ok(())
        }
        fn on_window_end(&mut self, first: VertexId, last: VertexId) {
            self.events.push(format!("end {first}..{last}"));
        }
        fn on_run_end(&mut self) -> Result<()> {
            self.events.push("done".to_string());
            Ok(())
        }
    }

    #[test]
    fn windows_cover_all_vertices() {
        let g = AdjacencyList::from_lists(&vec![vec![]; 5]).unwrap();
        let d = InMemoryDriver::new(&g, DriverConfig { window_size: 2 }).unwrap();
        assert_eq!(d.windows(), vec![(0, 1), (2, 3), (4, 4)]);
    }

    #[test]
    fn hooks_run_in_order_and_visit_only_scheduled() {
        let g = AdjacencyList::from_lists(&[vec![], vec![], vec![0, 1]]).unwrap();
        let d = InMemoryDriver::new(&g, DriverConfig { window_size: 2 }).unwrap();
        let mut trace = Trace::default();
        let run = d.run(&mut trace, 1).unwrap();

        assert_eq!(
            trace.events,
            vec!["iter 0", "start 0..1", "end 0..1", "start 2..2", "visit 2 [0, 1]", "end 2..2", "done"]
        );
        assert_eq!(run, DriverRun { iterations: 1, windows: 2, visits: 1 });
    }

    #[test]
    fn zero_window_is_rejected() {
        let g = AdjacencyList::default();
        assert!(InMemoryDriver::new(&g, DriverConfig { window_size: 0 }).is_err());
    }
}
