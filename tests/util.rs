#![allow(dead_code)]
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};
use std::cmp::Reverse;
use std::thread;

use grape_bsp::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Runs `f(rank, comm)` on one thread per rank of a fresh in-process
/// cluster; results come back in rank order.
pub fn run_cluster<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, LocalComm) -> T + Sync,
{
    let comms = LocalComm::cluster(n);
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .enumerate()
            .map(|(rank, comm)| {
                let f = &f;
                s.spawn(move || f(rank, comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}

/// Started message manager for one rank.
pub fn started_manager(comm: &LocalComm) -> ParallelMessageManager<LocalComm> {
    let mut mm = ParallelMessageManager::new();
    mm.init(comm).unwrap();
    mm.start().unwrap();
    mm
}

/// Random simple directed graph on oids `0..n` (no self loops, no
/// duplicate edges) with integral weights in `1..=9`.
pub fn random_graph(seed: u64, n: u64, m: usize) -> Vec<EdgeRecord> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut seen = BTreeSet::new();
    while seen.len() < m {
        let (s, d) = (rng.gen_range(0..n), rng.gen_range(0..n));
        if s != d {
            seen.insert((s, d));
        }
    }
    seen.into_iter()
        .map(|(s, d)| EdgeRecord::weighted(s, d, rng.gen_range(1..=9) as f64))
        .collect()
}

/// Runs one query of the application built by `make` on `fnum` fragments
/// and returns `extract`ed per-oid values merged over all fragments, plus
/// the number of rounds each worker executed.
pub fn run_query<A, R, MK, EX>(
    fnum: usize,
    threads: usize,
    n: u64,
    edges: &[EdgeRecord],
    directed: bool,
    make: MK,
    args: <A::Context as AppContext<EdgecutFragment>>::Args,
    extract: EX,
) -> (BTreeMap<Oid, R>, Vec<u32>)
where
    A: App<EdgecutFragment>,
    R: Send,
    MK: Fn() -> A + Sync,
    EX: Fn(&EdgecutFragment, &A::Context, Vertex) -> R + Sync,
    <A::Context as AppContext<EdgecutFragment>>::Args: Clone + Sync,
{
    let vm = VertexMap::hash_partitioned(fnum, 0..n);
    let per_rank = run_cluster(fnum, |rank, comm| {
        let frag = EdgecutFragment::new(rank, &vm, edges, directed);
        let mut worker = Worker::new(make(), frag);
        worker
            .init(&comm, &ParallelEngineSpec::with_threads(threads))
            .unwrap();
        worker.query(args.clone()).unwrap();
        assert!(worker.terminate_info().success);
        let frag = worker.fragment();
        let ctx = worker.context().unwrap();
        let values: Vec<(Oid, R)> = frag
            .inner_vertices()
            .iter()
            .map(|v| (frag.get_id(v), extract(frag, ctx, v)))
            .collect();
        (values, worker.rounds())
    });
    let mut merged = BTreeMap::new();
    let mut rounds = Vec::new();
    for (values, r) in per_rank {
        merged.extend(values);
        rounds.push(r);
    }
    (merged, rounds)
}

pub fn serial_bfs(n: u64, edges: &[EdgeRecord], source: Oid) -> BTreeMap<Oid, Option<u32>> {
    let adj = adjacency(n, edges);
    let mut depth = vec![None; n as usize];
    depth[source as usize] = Some(0);
    let mut queue = VecDeque::from([source]);
    while let Some(u) = queue.pop_front() {
        let d = depth[u as usize].unwrap_or(0);
        for &(v, _) in &adj[u as usize] {
            if depth[v as usize].is_none() {
                depth[v as usize] = Some(d + 1);
                queue.push_back(v);
            }
        }
    }
    (0..n).zip(depth).collect()
}

pub fn serial_sssp(n: u64, edges: &[EdgeRecord], source: Oid) -> BTreeMap<Oid, f64> {
    let adj = adjacency(n, edges);
    let mut dist = vec![f64::INFINITY; n as usize];
    dist[source as usize] = 0.0;
    // weights are integral, so distances order exactly as u64
    let mut heap = BinaryHeap::from([Reverse((0u64, source))]);
    while let Some(Reverse((d, u))) = heap.pop() {
        if d as f64 > dist[u as usize] {
            continue;
        }
        for &(v, w) in &adj[u as usize] {
            let nd = d as f64 + w;
            if nd < dist[v as usize] {
                dist[v as usize] = nd;
                heap.push(Reverse((nd as u64, v)));
            }
        }
    }
    (0..n).zip(dist).collect()
}

/// Component representative (smallest oid) per vertex, edges undirected.
pub fn serial_components(n: u64, edges: &[EdgeRecord]) -> BTreeMap<Oid, Oid> {
    let mut parent: Vec<u64> = (0..n).collect();
    fn find(p: &mut [u64], x: u64) -> u64 {
        let mut r = x;
        while p[r as usize] != r {
            r = p[r as usize];
        }
        p[x as usize] = r;
        r
    }
    for e in edges {
        let (a, b) = (find(&mut parent, e.src), find(&mut parent, e.dst));
        let (lo, hi) = (a.min(b), a.max(b));
        parent[hi as usize] = lo;
    }
    (0..n).map(|v| (v, find(&mut parent, v))).collect()
}

pub fn serial_pagerank(n: u64, edges: &[EdgeRecord], delta: f64, rounds: u32) -> BTreeMap<Oid, f64> {
    let nf = n as f64;
    let adj = adjacency(n, edges);
    let mut rank = vec![1.0 / nf; n as usize];
    for _ in 0..rounds {
        let dangling: f64 = (0..n as usize)
            .filter(|&u| adj[u].is_empty())
            .map(|u| rank[u])
            .sum();
        let base = (1.0 - delta) / nf + delta * dangling / nf;
        let mut pulled = vec![0.0; n as usize];
        for (u, out) in adj.iter().enumerate() {
            for &(v, _) in out {
                pulled[v as usize] += rank[u] / out.len() as f64;
            }
        }
        rank = pulled.into_iter().map(|p| base + delta * p).collect();
    }
    (0..n).zip(rank).collect()
}

fn adjacency(n: u64, edges: &[EdgeRecord]) -> Vec<Vec<(u64, f64)>> {
    let mut adj = vec![Vec::new(); n as usize];
    for e in edges {
        adj[e.src as usize].push((e.dst, e.weight));
    }
    adj
}
