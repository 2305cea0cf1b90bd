//! Single-source shortest paths over non-negative edge weights.
//!
//! Each round relaxes locally until the fragment reaches a fixed point,
//! then reports every outer vertex whose distance dropped to its owner,
//! once, with the final local value.

use std::io::Write;

use crate::apps::AppEngine;
use crate::apps::atomic::AtomicF64;
use crate::apps::vertex_set::DenseVertexSet;
use crate::bsp_error::BspError;
use crate::comm::Communicator;
use crate::config::{ChannelSpec, ParallelEngineSpec};
use crate::fragment::{Fragment, Oid, Vertex};
use crate::parallel::{ParallelEngine, ParallelMessageManager, ThreadLocalMessageBuffer};
use crate::worker::{App, AppContext};

#[derive(Debug)]
pub struct SsspContext {
    source: Oid,
    dist: Vec<AtomicF64>,
    active: DenseVertexSet,
    next: DenseVertexSet,
    outer_updated: DenseVertexSet,
}

impl SsspContext {
    pub fn source(&self) -> Oid {
        self.source
    }

    /// `f64::INFINITY` if unreachable.
    pub fn distance(&self, v: Vertex) -> f64 {
        self.dist[v.index()].load()
    }
}

impl<F: Fragment> AppContext<F> for SsspContext {
    type Args = Oid;

    fn init(frag: &F, source: Oid) -> Self {
        Self {
            source,
            dist: frag.vertices().iter().map(|_| AtomicF64::new(f64::INFINITY)).collect(),
            active: DenseVertexSet::new(&frag.inner_vertices()),
            next: DenseVertexSet::new(&frag.inner_vertices()),
            outer_updated: DenseVertexSet::new(&frag.outer_vertices()),
        }
    }

    fn output(&self, frag: &F, writer: &mut dyn Write) -> Result<(), BspError> {
        for v in frag.inner_vertices().iter() {
            writeln!(writer, "{}\t{}", frag.get_id(v), self.distance(v))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Sssp {
    engine: AppEngine,
}

impl Sssp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_spec(spec: ChannelSpec) -> Self {
        Self {
            engine: AppEngine::with_channel_spec(spec),
        }
    }

    fn relax<F: Fragment>(
        engine: &ParallelEngine,
        frag: &F,
        ctx: &mut SsspContext,
        channels: &mut [ThreadLocalMessageBuffer],
        mut frontier: Vec<Vertex>,
    ) -> Result<(), BspError> {
        while !frontier.is_empty() {
            let (dist, next, outer) = (&ctx.dist, &ctx.next, &ctx.outer_updated);
            engine.for_each_local_in(&frontier, |_, v| {
                let d = dist[v.index()].load();
                for label in 0..frag.edge_label_num() {
                    for nbr in frag.outgoing_edges(v, label) {
                        let u = nbr.neighbor;
                        if dist[u.index()].fetch_min(d + nbr.weight) {
                            if frag.is_outer_vertex(u) {
                                outer.insert(u);
                            } else {
                                next.insert(u);
                            }
                        }
                    }
                }
            });
            frontier = ctx.next.to_vec();
            ctx.next.clear();
        }

        let updated = ctx.outer_updated.to_vec();
        ctx.outer_updated.clear();
        let dist = &ctx.dist;
        engine.for_each_in(channels, &updated, |_, ch, u| {
            ch.sync_state_on_outer_vertex(frag, u, &dist[u.index()].load());
        })
    }
}

impl<F: Fragment> App<F> for Sssp {
    type Context = SsspContext;

    fn init_parallel_engine(&mut self, spec: &ParallelEngineSpec) -> Result<(), BspError> {
        self.engine.init(spec)
    }

    fn peval<C: Communicator>(
        &self,
        frag: &F,
        ctx: &mut SsspContext,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError> {
        let engine = self.engine.get()?;
        let spec = self.engine.channel_spec();
        messages.init_channels(engine.thread_num(), spec.block_size, spec.block_cap)?;

        if let Some(source) = frag.get_inner_vertex(ctx.source) {
            ctx.dist[source.index()].store(0.0);
            Self::relax(engine, frag, ctx, messages.channels_mut(), vec![source])?;
        }
        Ok(())
    }

    fn inc_eval<C: Communicator>(
        &self,
        frag: &F,
        ctx: &mut SsspContext,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError> {
        let engine = self.engine.get()?;
        {
            let (dist, active) = (&ctx.dist, &ctx.active);
            messages.parallel_process::<F, f64, _>(engine.thread_num(), frag, |_, v, d| {
                if frag.is_inner_vertex(v) && dist[v.index()].fetch_min(d) {
                    active.insert(v);
                }
            })?;
        }
        let frontier = ctx.active.to_vec();
        ctx.active.clear();
        Self::relax(engine, frag, ctx, messages.channels_mut(), frontier)
    }
}
