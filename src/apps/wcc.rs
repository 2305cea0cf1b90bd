//! Weakly connected components by minimum-gid label propagation.
//!
//! Expects fragments loaded as undirected, so outgoing edges cover both
//! directions. Only owners propagate: a ghost's label is sent to the owner,
//! never read back locally.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::apps::AppEngine;
use crate::apps::atomic::atomic_min_u64;
use crate::apps::vertex_set::DenseVertexSet;
use crate::bsp_error::BspError;
use crate::comm::Communicator;
use crate::config::{ChannelSpec, ParallelEngineSpec};
use crate::fragment::{Fragment, Gid, Vertex};
use crate::parallel::{ParallelEngine, ParallelMessageManager, ThreadLocalMessageBuffer};
use crate::worker::{App, AppContext};

#[derive(Debug)]
pub struct WccContext {
    label: Vec<AtomicU64>,
    active: DenseVertexSet,
    outer_updated: DenseVertexSet,
}

impl WccContext {
    /// Smallest gid of the component of `v`.
    pub fn component(&self, v: Vertex) -> Gid {
        self.label[v.index()].load(Ordering::Relaxed)
    }
}

impl<F: Fragment> AppContext<F> for WccContext {
    type Args = ();

    fn init(frag: &F, _: ()) -> Self {
        Self {
            label: frag
                .vertices()
                .iter()
                .map(|v| AtomicU64::new(frag.vertex_gid(v)))
                .collect(),
            active: DenseVertexSet::new(&frag.inner_vertices()),
            outer_updated: DenseVertexSet::new(&frag.outer_vertices()),
        }
    }

    fn output(&self, frag: &F, writer: &mut dyn Write) -> Result<(), BspError> {
        for v in frag.inner_vertices().iter() {
            writeln!(writer, "{}\t{}", frag.get_id(v), self.component(v))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Wcc {
    engine: AppEngine,
}

impl Wcc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_spec(spec: ChannelSpec) -> Self {
        Self {
            engine: AppEngine::with_channel_spec(spec),
        }
    }

    fn propagate<F: Fragment>(
        engine: &ParallelEngine,
        frag: &F,
        ctx: &mut WccContext,
        channels: &mut [ThreadLocalMessageBuffer],
        mut frontier: Vec<Vertex>,
    ) -> Result<(), BspError> {
        while !frontier.is_empty() {
            let (label, active, outer) = (&ctx.label, &ctx.active, &ctx.outer_updated);
            engine.for_each_local_in(&frontier, |_, v| {
                let l = label[v.index()].load(Ordering::Relaxed);
                for lbl in 0..frag.edge_label_num() {
                    for nbr in frag.outgoing_edges(v, lbl) {
                        let u = nbr.neighbor;
                        if atomic_min_u64(&label[u.index()], l) {
                            if frag.is_outer_vertex(u) {
                                outer.insert(u);
                            } else {
                                active.insert(u);
                            }
                        }
                    }
                }
            });
            frontier = ctx.active.to_vec();
            ctx.active.clear();
        }

        let updated = ctx.outer_updated.to_vec();
        ctx.outer_updated.clear();
        let label = &ctx.label;
        engine.for_each_in(channels, &updated, |_, ch, u| {
            ch.sync_state_on_outer_vertex(frag, u, &label[u.index()].load(Ordering::Relaxed));
        })
    }
}

impl<F: Fragment> App<F> for Wcc {
    type Context = WccContext;

    fn init_parallel_engine(&mut self, spec: &ParallelEngineSpec) -> Result<(), BspError> {
        self.engine.init(spec)
    }

    fn peval<C: Communicator>(
        &self,
        frag: &F,
        ctx: &mut WccContext,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError> {
        let engine = self.engine.get()?;
        let spec = self.engine.channel_spec();
        messages.init_channels(engine.thread_num(), spec.block_size, spec.block_cap)?;
        let all: Vec<Vertex> = frag.inner_vertices().iter().collect();
        Self::propagate(engine, frag, ctx, messages.channels_mut(), all)
    }

    fn inc_eval<C: Communicator>(
        &self,
        frag: &F,
        ctx: &mut WccContext,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError> {
        let engine = self.engine.get()?;
        {
            let (label, active) = (&ctx.label, &ctx.active);
            messages.parallel_process::<F, u64, _>(engine.thread_num(), frag, |_, v, l| {
                if frag.is_inner_vertex(v) && atomic_min_u64(&label[v.index()], l) {
                    active.insert(v);
                }
            })?;
        }
        let frontier = ctx.active.to_vec();
        ctx.active.clear();
        Self::propagate(engine, frag, ctx, messages.channels_mut(), frontier)
    }
}
