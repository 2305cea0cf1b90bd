//! Pull-style PageRank with a fixed number of iterations.
//!
//! Each inner vertex publishes `rank / out_degree` to the fragments holding
//! it as a ghost through its outgoing edges; every round then pulls the
//! published values over incoming edges. Mass of dangling vertices is
//! summed over the cluster and spread uniformly.

use std::io::Write;

use crate::apps::AppEngine;
use crate::apps::atomic::AtomicF64;
use crate::bsp_error::BspError;
use crate::comm::Communicator;
use crate::config::{ChannelSpec, ParallelEngineSpec};
use crate::fragment::{Fragment, MessageStrategy, Vertex};
use crate::parallel::{ParallelEngine, ParallelMessageManager, ThreadLocalMessageBuffer};
use crate::worker::{App, AppContext};

#[derive(Debug)]
pub struct PageRankContext {
    step: u32,
    degree: Vec<u32>,
    rank: Vec<AtomicF64>,
    next_rank: Vec<AtomicF64>,
    /// Published `rank / degree`, inner and outer vertices.
    contrib: Vec<AtomicF64>,
    local_dangling: f64,
}

impl PageRankContext {
    pub fn rank(&self, v: Vertex) -> f64 {
        self.rank[v.index()].load()
    }

    /// IncEval rounds run so far.
    pub fn step(&self) -> u32 {
        self.step
    }
}

impl<F: Fragment> AppContext<F> for PageRankContext {
    type Args = ();

    fn init(frag: &F, _: ()) -> Self {
        let ivnum = frag.inner_vertices().len();
        let zeros = |n: usize| (0..n).map(|_| AtomicF64::new(0.0)).collect::<Vec<_>>();
        Self {
            step: 0,
            degree: frag
                .inner_vertices()
                .iter()
                .map(|v| {
                    (0..frag.edge_label_num())
                        .map(|l| frag.outgoing_edges(v, l).len() as u32)
                        .sum()
                })
                .collect(),
            rank: zeros(ivnum),
            next_rank: zeros(ivnum),
            contrib: zeros(frag.vertices().len()),
            local_dangling: 0.0,
        }
    }

    fn output(&self, frag: &F, writer: &mut dyn Write) -> Result<(), BspError> {
        for v in frag.inner_vertices().iter() {
            writeln!(writer, "{}\t{:.15}", frag.get_id(v), self.rank(v))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct PageRank {
    delta: f64,
    max_round: u32,
    engine: AppEngine,
}

impl PageRank {
    pub fn new(delta: f64, max_round: u32) -> Self {
        Self {
            delta,
            max_round,
            engine: AppEngine::default(),
        }
    }

    pub fn with_channel_spec(mut self, spec: ChannelSpec) -> Self {
        self.engine = AppEngine::with_channel_spec(spec);
        self
    }

    /// Publishes `rank / degree` of every inner vertex and records the
    /// local dangling mass.
    fn scatter<F: Fragment>(
        engine: &ParallelEngine,
        frag: &F,
        ctx: &mut PageRankContext,
        channels: &mut [ThreadLocalMessageBuffer],
    ) -> Result<(), BspError> {
        let (degree, rank, contrib) = (&ctx.degree, &ctx.rank, &ctx.contrib);
        engine.for_each_vertex(channels, &frag.inner_vertices(), |_, ch, v| {
            let d = degree[v.index()];
            if d == 0 {
                return;
            }
            let c = rank[v.index()].load() / d as f64;
            contrib[v.index()].store(c);
            for label in 0..frag.edge_label_num() {
                ch.send_msg_through_oedges(frag, v, label, &c);
            }
        })?;
        ctx.local_dangling = frag
            .inner_vertices()
            .iter()
            .filter(|v| ctx.degree[v.index()] == 0)
            .map(|v| ctx.rank[v.index()].load())
            .sum();
        Ok(())
    }
}

impl Default for PageRank {
    fn default() -> Self {
        Self::new(0.85, 10)
    }
}

impl<F: Fragment> App<F> for PageRank {
    type Context = PageRankContext;

    fn message_strategy(&self) -> MessageStrategy {
        MessageStrategy::AlongOutgoingEdgeToOuterVertex
    }

    fn init_parallel_engine(&mut self, spec: &ParallelEngineSpec) -> Result<(), BspError> {
        self.engine.init(spec)
    }

    fn peval<C: Communicator>(
        &self,
        frag: &F,
        ctx: &mut PageRankContext,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError> {
        let engine = self.engine.get()?;
        let spec = self.engine.channel_spec();
        messages.init_channels(engine.thread_num(), spec.block_size, spec.block_cap)?;

        let init = 1.0 / frag.total_vertices_num().max(1) as f64;
        for r in &ctx.rank {
            r.store(init);
        }
        if self.max_round == 0 {
            return Ok(());
        }
        Self::scatter(engine, frag, ctx, messages.channels_mut())?;
        messages.force_continue();
        Ok(())
    }

    fn inc_eval<C: Communicator>(
        &self,
        frag: &F,
        ctx: &mut PageRankContext,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError> {
        let engine = self.engine.get()?;
        ctx.step += 1;
        {
            let contrib = &ctx.contrib;
            messages.parallel_process::<F, f64, _>(engine.thread_num(), frag, |_, u, c| {
                contrib[u.index()].store(c);
            })?;
        }

        let n = frag.total_vertices_num().max(1) as f64;
        let dangling = messages.aggregate_sum_f64(ctx.local_dangling)?;
        let base = (1.0 - self.delta) / n + self.delta * dangling / n;
        {
            let (contrib, next_rank, delta) = (&ctx.contrib, &ctx.next_rank, self.delta);
            engine.for_each_local(&frag.inner_vertices(), |_, v| {
                let pulled: f64 = (0..frag.edge_label_num())
                    .flat_map(|l| frag.incoming_edges(v, l))
                    .map(|nbr| contrib[nbr.neighbor.index()].load())
                    .sum();
                next_rank[v.index()].store(base + delta * pulled);
            });
        }
        std::mem::swap(&mut ctx.rank, &mut ctx.next_rank);

        if ctx.step >= self.max_round {
            return Ok(());
        }
        Self::scatter(engine, frag, ctx, messages.channels_mut())?;
        messages.force_continue();
        Ok(())
    }
}
