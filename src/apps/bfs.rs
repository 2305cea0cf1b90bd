//! Level-synchronous breadth-first search.
//!
//! Every round expands one BFS level. A vertex reached through an outer
//! vertex is reported to its owner with `sync_state_on_outer_vertex`, which
//! continues the expansion there in the next round.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::apps::AppEngine;
use crate::apps::vertex_set::DenseVertexSet;
use crate::bsp_error::BspError;
use crate::comm::Communicator;
use crate::config::{ChannelSpec, ParallelEngineSpec};
use crate::fragment::{Fragment, Oid, Vertex};
use crate::parallel::{ParallelMessageManager, ThreadLocalMessageBuffer};
use crate::worker::{App, AppContext};

const UNREACHED: u32 = u32::MAX;

#[derive(Debug)]
pub struct BfsContext {
    source: Oid,
    depth: Vec<AtomicU32>,
    curr: DenseVertexSet,
    next: DenseVertexSet,
}

impl BfsContext {
    pub fn source(&self) -> Oid {
        self.source
    }

    /// Hops from the source, `None` if unreachable.
    pub fn depth(&self, v: Vertex) -> Option<u32> {
        let d = self.depth[v.index()].load(Ordering::Relaxed);
        (d != UNREACHED).then_some(d)
    }

    fn advance(&mut self) {
        std::mem::swap(&mut self.curr, &mut self.next);
        self.next.clear();
    }
}

impl<F: Fragment> AppContext<F> for BfsContext {
    type Args = Oid;

    fn init(frag: &F, source: Oid) -> Self {
        Self {
            source,
            depth: frag.vertices().iter().map(|_| AtomicU32::new(UNREACHED)).collect(),
            curr: DenseVertexSet::new(&frag.inner_vertices()),
            next: DenseVertexSet::new(&frag.inner_vertices()),
        }
    }

    fn output(&self, frag: &F, writer: &mut dyn Write) -> Result<(), BspError> {
        for v in frag.inner_vertices().iter() {
            match self.depth(v) {
                Some(d) => writeln!(writer, "{}\t{d}", frag.get_id(v))?,
                None => writeln!(writer, "{}\tinf", frag.get_id(v))?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Bfs {
    engine: AppEngine,
}

impl Bfs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_spec(spec: ChannelSpec) -> Self {
        Self {
            engine: AppEngine::with_channel_spec(spec),
        }
    }

    /// Visits the unvisited neighbours of `frontier` one level deeper.
    fn expand<F: Fragment>(
        &self,
        frag: &F,
        ctx: &BfsContext,
        channels: &mut [ThreadLocalMessageBuffer],
        frontier: &[Vertex],
    ) -> Result<(), BspError> {
        let (depth, next) = (&ctx.depth, &ctx.next);
        self.engine.get()?.for_each_in(channels, frontier, |_, ch, v| {
            let d = depth[v.index()].load(Ordering::Relaxed) + 1;
            for label in 0..frag.edge_label_num() {
                for nbr in frag.outgoing_edges(v, label) {
                    let u = nbr.neighbor;
                    if depth[u.index()].fetch_min(d, Ordering::AcqRel) > d {
                        if frag.is_outer_vertex(u) {
                            ch.sync_state_on_outer_vertex(frag, u, &d);
                        } else {
                            next.insert(u);
                        }
                    }
                }
            }
        })
    }
}

impl<F: Fragment> App<F> for Bfs {
    type Context = BfsContext;

    fn init_parallel_engine(&mut self, spec: &ParallelEngineSpec) -> Result<(), BspError> {
        self.engine.init(spec)
    }

    fn peval<C: Communicator>(
        &self,
        frag: &F,
        ctx: &mut BfsContext,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError> {
        let spec = self.engine.channel_spec();
        messages.init_channels(self.engine.get()?.thread_num(), spec.block_size, spec.block_cap)?;

        if let Some(source) = frag.get_inner_vertex(ctx.source) {
            ctx.depth[source.index()].store(0, Ordering::Relaxed);
            self.expand(frag, ctx, messages.channels_mut(), &[source])?;
        }
        ctx.advance();
        messages.force_continue();
        Ok(())
    }

    fn inc_eval<C: Communicator>(
        &self,
        frag: &F,
        ctx: &mut BfsContext,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError> {
        let thread_num = self.engine.get()?.thread_num();
        {
            let (depth, curr) = (&ctx.depth, &ctx.curr);
            messages.parallel_process::<F, u32, _>(thread_num, frag, |_, v, d| {
                if frag.is_inner_vertex(v) && depth[v.index()].fetch_min(d, Ordering::AcqRel) > d {
                    curr.insert(v);
                }
            })?;
        }
        let frontier = ctx.curr.to_vec();
        self.expand(frag, ctx, messages.channels_mut(), &frontier)?;
        ctx.advance();
        if !ctx.curr.is_empty() {
            messages.force_continue();
        }
        Ok(())
    }
}
