//! Per-fragment compute pool.
//!
//! `for_each_*` with channels hands each pool thread exactly one channel by
//! `&mut`, so a channel never has two writers. Vertices are handed out in
//! chunks through a shared cursor, which balances skewed adjacency.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::bsp_error::BspError;
use crate::config::ParallelEngineSpec;
use crate::fragment::{Vertex, VertexRange};

/// Vertices claimed per cursor step.
pub const CHUNK_SIZE: usize = 1024;

#[derive(Debug)]
pub struct ParallelEngine {
    pool: ThreadPool,
    thread_num: usize,
}

impl ParallelEngine {
    pub fn new(spec: &ParallelEngineSpec) -> Result<Self, BspError> {
        let thread_num = spec.thread_num.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(thread_num)
            .thread_name(|i| format!("bsp-compute-{i}"))
            .build()?;
        Ok(Self { pool, thread_num })
    }

    pub fn thread_num(&self) -> usize {
        self.thread_num
    }

    /// Calls `f(tid, &mut channels[tid], v)` for every `v` in `range`.
    pub fn for_each_vertex<T, Func>(
        &self,
        channels: &mut [T],
        range: &VertexRange,
        f: Func,
    ) -> Result<(), BspError>
    where
        T: Send,
        Func: Fn(usize, &mut T, Vertex) + Sync,
    {
        self.chunked(channels, range.len(), |tid, ch, i| f(tid, ch, range.nth_vertex(i)))
    }

    /// Same as [`for_each_vertex`](Self::for_each_vertex) over an explicit
    /// vertex list.
    pub fn for_each_in<T, Func>(
        &self,
        channels: &mut [T],
        vertices: &[Vertex],
        f: Func,
    ) -> Result<(), BspError>
    where
        T: Send,
        Func: Fn(usize, &mut T, Vertex) + Sync,
    {
        self.chunked(channels, vertices.len(), |tid, ch, i| f(tid, ch, vertices[i]))
    }

    /// Calls `f(tid, v)` for every `v` in `range`; nothing is sent.
    pub fn for_each_local<Func>(&self, range: &VertexRange, f: Func)
    where
        Func: Fn(usize, Vertex) + Sync,
    {
        self.pool.install(|| {
            (0..range.len())
                .into_par_iter()
                .with_min_len(CHUNK_SIZE)
                .for_each(|i| f(rayon::current_thread_index().unwrap_or(0), range.nth_vertex(i)));
        });
    }

    /// Calls `f(tid, v)` for every vertex of `vertices`; nothing is sent.
    pub fn for_each_local_in<Func>(&self, vertices: &[Vertex], f: Func)
    where
        Func: Fn(usize, Vertex) + Sync,
    {
        self.pool.install(|| {
            vertices
                .par_iter()
                .with_min_len(CHUNK_SIZE)
                .for_each(|&v| f(rayon::current_thread_index().unwrap_or(0), v));
        });
    }

    fn chunked<T, Func>(&self, channels: &mut [T], len: usize, f: Func) -> Result<(), BspError>
    where
        T: Send,
        Func: Fn(usize, &mut T, usize) + Sync,
    {
        if channels.is_empty() {
            return Err(BspError::ChannelsNotInitialized);
        }
        let cursor = AtomicUsize::new(0);
        self.pool.scope(|s| {
            for (tid, ch) in channels.iter_mut().enumerate() {
                let (cursor, f) = (&cursor, &f);
                s.spawn(move |_| {
                    loop {
                        let begin = cursor.fetch_add(CHUNK_SIZE, Ordering::Relaxed);
                        if begin >= len {
                            break;
                        }
                        for i in begin..(begin + CHUNK_SIZE).min(len) {
                            f(tid, ch, i);
                        }
                    }
                });
            }
        });
        Ok(())
    }
}
