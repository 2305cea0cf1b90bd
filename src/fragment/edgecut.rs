//! In-memory edge-cut fragment.
//!
//! Every edge with at least one inner endpoint is loaded: outgoing edges of
//! inner vertices into the out-CSR, incoming edges of inner vertices into the
//! in-CSR. The non-inner endpoint becomes an outer (ghost) vertex. Outer
//! local ids follow ascending gid order.

use hashbrown::HashMap;
use itertools::Itertools;

use super::{
    Fid, Fragment, Gid, IdParser, LabelId, MessageStrategy, Nbr, Oid, Vertex, VertexMap,
    VertexRange,
};

/// One input edge in original ids.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EdgeRecord {
    pub src: Oid,
    pub dst: Oid,
    pub label: LabelId,
    pub weight: f64,
}

impl EdgeRecord {
    pub fn new(src: Oid, dst: Oid) -> Self {
        Self {
            src,
            dst,
            label: 0,
            weight: 1.0,
        }
    }

    pub fn weighted(src: Oid, dst: Oid, weight: f64) -> Self {
        Self {
            weight,
            ..Self::new(src, dst)
        }
    }

    pub fn with_label(mut self, label: LabelId) -> Self {
        self.label = label;
        self
    }
}

/// Adjacency of inner vertices for one edge label.
#[derive(Debug, Clone, Default)]
struct Csr {
    offsets: Vec<usize>,
    edges: Vec<Nbr>,
}

impl Csr {
    fn build(ivnum: usize, mut entries: Vec<(u32, Nbr)>) -> Self {
        entries.sort_by_key(|(src, nbr)| (*src, nbr.neighbor));
        let mut offsets = vec![0usize; ivnum + 1];
        for (src, _) in &entries {
            offsets[*src as usize + 1] += 1;
        }
        for i in 0..ivnum {
            offsets[i + 1] += offsets[i];
        }
        Self {
            offsets,
            edges: entries.into_iter().map(|(_, nbr)| nbr).collect(),
        }
    }

    #[inline]
    fn neighbors(&self, lid: usize) -> &[Nbr] {
        match (self.offsets.get(lid), self.offsets.get(lid + 1)) {
            (Some(&b), Some(&e)) => &self.edges[b..e],
            _ => &[],
        }
    }
}

/// Per inner vertex, the sorted set of remote fragments to notify.
#[derive(Debug, Clone, Default)]
struct DestLists {
    offsets: Vec<usize>,
    fids: Vec<Fid>,
}

impl DestLists {
    fn from_lists(lists: impl Iterator<Item = Vec<Fid>>) -> Self {
        let mut offsets = vec![0];
        let mut fids = Vec::new();
        for list in lists {
            fids.extend(list);
            offsets.push(fids.len());
        }
        Self { offsets, fids }
    }

    #[inline]
    fn get(&self, lid: usize) -> &[Fid] {
        match (self.offsets.get(lid), self.offsets.get(lid + 1)) {
            (Some(&b), Some(&e)) => &self.fids[b..e],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdgecutFragment {
    fid: Fid,
    fnum: usize,
    parser: IdParser,
    total_vnum: usize,
    inner_oids: Vec<Oid>,
    outer_gids: Vec<Gid>,
    outer_oids: Vec<Oid>,
    outer_gid_to_lid: HashMap<Gid, u32>,
    label_num: usize,
    oe: Vec<Csr>,
    ie: Vec<Csr>,
    oe_dests: Vec<DestLists>,
    ie_dests: Vec<DestLists>,
    ioe_dests: Vec<DestLists>,
    prepared: Option<MessageStrategy>,
}

impl EdgecutFragment {
    /// Builds fragment `fid` of the graph. Edges naming an oid unknown to
    /// `vertex_map` are skipped. With `directed == false` every edge is
    /// loaded in both directions.
    pub fn new(fid: Fid, vertex_map: &VertexMap, edges: &[EdgeRecord], directed: bool) -> Self {
        let parser = vertex_map.parser();
        let inner_oids = vertex_map.inner_oids(fid).to_vec();
        let ivnum = inner_oids.len();
        let label_num = edges.iter().map(|e| e.label + 1).max().unwrap_or(1);

        let mut loaded: Vec<(Gid, Gid, LabelId, f64)> = Vec::new();
        for e in edges {
            let (Some(src), Some(dst)) = (vertex_map.get_gid(e.src), vertex_map.get_gid(e.dst))
            else {
                log::warn!("skipping edge {} -> {} with unknown endpoint", e.src, e.dst);
                continue;
            };
            let mut keep = |s: Gid, d: Gid| {
                if parser.fid(s) == fid || parser.fid(d) == fid {
                    loaded.push((s, d, e.label, e.weight));
                }
            };
            keep(src, dst);
            if !directed {
                keep(dst, src);
            }
        }

        let outer_gids: Vec<Gid> = loaded
            .iter()
            .flat_map(|&(s, d, _, _)| [s, d])
            .filter(|&g| parser.fid(g) != fid)
            .sorted_unstable()
            .dedup()
            .collect();
        let outer_gid_to_lid: HashMap<Gid, u32> = outer_gids
            .iter()
            .enumerate()
            .map(|(i, &g)| (g, (ivnum + i) as u32))
            .collect();
        let outer_oids = outer_gids
            .iter()
            .map(|&g| vertex_map.get_oid(g).unwrap_or_default())
            .collect();

        let to_vertex = |g: Gid| -> Vertex {
            if parser.fid(g) == fid {
                Vertex::new(parser.lid(g) as u32)
            } else {
                Vertex::new(outer_gid_to_lid[&g])
            }
        };

        let mut oe_entries: Vec<Vec<(u32, Nbr)>> = vec![Vec::new(); label_num];
        let mut ie_entries: Vec<Vec<(u32, Nbr)>> = vec![Vec::new(); label_num];
        for &(s, d, label, weight) in &loaded {
            let (sv, dv) = (to_vertex(s), to_vertex(d));
            if parser.fid(s) == fid {
                oe_entries[label].push((sv.lid(), Nbr { neighbor: dv, weight }));
            }
            if parser.fid(d) == fid {
                ie_entries[label].push((dv.lid(), Nbr { neighbor: sv, weight }));
            }
        }

        Self {
            fid,
            fnum: vertex_map.fnum(),
            parser,
            total_vnum: vertex_map.total_vertex_num(),
            inner_oids,
            outer_gids,
            outer_oids,
            outer_gid_to_lid,
            label_num,
            oe: oe_entries.into_iter().map(|e| Csr::build(ivnum, e)).collect(),
            ie: ie_entries.into_iter().map(|e| Csr::build(ivnum, e)).collect(),
            oe_dests: Vec::new(),
            ie_dests: Vec::new(),
            ioe_dests: Vec::new(),
            prepared: None,
        }
    }

    /// Strategy the destination lists were last built for.
    pub fn prepared_strategy(&self) -> Option<MessageStrategy> {
        self.prepared
    }

    fn ivnum(&self) -> usize {
        self.inner_oids.len()
    }

    fn remote_fids<'n>(&self, nbrs: impl Iterator<Item = &'n Nbr>) -> Vec<Fid> {
        nbrs.filter(|n| self.is_outer_vertex(n.neighbor))
            .map(|n| self.frag_id(n.neighbor))
            .sorted_unstable()
            .dedup()
            .collect()
    }

    fn build_dests(&self, csrs: &[&Csr]) -> DestLists {
        DestLists::from_lists((0..self.ivnum()).map(|lid| {
            self.remote_fids(csrs.iter().flat_map(move |c| c.neighbors(lid)))
        }))
    }
}

impl Fragment for EdgecutFragment {
    fn fid(&self) -> Fid {
        self.fid
    }

    fn fnum(&self) -> usize {
        self.fnum
    }

    fn total_vertices_num(&self) -> usize {
        self.total_vnum
    }

    fn inner_vertices(&self) -> VertexRange {
        VertexRange::new(0, self.ivnum() as u32)
    }

    fn outer_vertices(&self) -> VertexRange {
        let iv = self.ivnum() as u32;
        VertexRange::new(iv, iv + self.outer_gids.len() as u32)
    }

    fn frag_id(&self, v: Vertex) -> Fid {
        if self.is_inner_vertex(v) {
            self.fid
        } else {
            self.parser.fid(self.outer_vertex_gid(v))
        }
    }

    fn inner_vertex_gid(&self, v: Vertex) -> Gid {
        self.parser.gid(self.fid, v.lid() as u64)
    }

    fn outer_vertex_gid(&self, v: Vertex) -> Gid {
        self.outer_gids[v.index() - self.ivnum()]
    }

    fn gid_to_vertex(&self, gid: Gid) -> Option<Vertex> {
        if self.parser.fid(gid) == self.fid {
            let lid = self.parser.lid(gid) as usize;
            (lid < self.ivnum()).then(|| Vertex::new(lid as u32))
        } else {
            self.outer_gid_to_lid.get(&gid).map(|&lid| Vertex::new(lid))
        }
    }

    fn get_id(&self, v: Vertex) -> Oid {
        if self.is_inner_vertex(v) {
            self.inner_oids[v.index()]
        } else {
            self.outer_oids[v.index() - self.ivnum()]
        }
    }

    fn get_inner_vertex(&self, oid: Oid) -> Option<Vertex> {
        self.inner_oids
            .binary_search(&oid)
            .ok()
            .map(|lid| Vertex::new(lid as u32))
    }

    fn edge_label_num(&self) -> usize {
        self.label_num
    }

    fn outgoing_edges(&self, v: Vertex, label: LabelId) -> &[Nbr] {
        self.oe.get(label).map_or(&[], |c| c.neighbors(v.index()))
    }

    fn incoming_edges(&self, v: Vertex, label: LabelId) -> &[Nbr] {
        self.ie.get(label).map_or(&[], |c| c.neighbors(v.index()))
    }

    fn ie_dests(&self, v: Vertex, label: LabelId) -> &[Fid] {
        self.ie_dests.get(label).map_or(&[], |d| d.get(v.index()))
    }

    fn oe_dests(&self, v: Vertex, label: LabelId) -> &[Fid] {
        self.oe_dests.get(label).map_or(&[], |d| d.get(v.index()))
    }

    fn ioe_dests(&self, v: Vertex, label: LabelId) -> &[Fid] {
        self.ioe_dests.get(label).map_or(&[], |d| d.get(v.index()))
    }

    fn prepare_to_run_app(&mut self, strategy: MessageStrategy) {
        if self.prepared == Some(strategy) {
            return;
        }
        let (want_oe, want_ie) = match strategy {
            MessageStrategy::SyncOnOuterVertex => (false, false),
            MessageStrategy::AlongOutgoingEdgeToOuterVertex => (true, false),
            MessageStrategy::AlongIncomingEdgeToOuterVertex => (false, true),
            MessageStrategy::AlongEdgeToOuterVertex => (true, true),
        };
        let labels = 0..self.label_num;
        self.oe_dests = if want_oe {
            labels.clone().map(|l| self.build_dests(&[&self.oe[l]])).collect()
        } else {
            Vec::new()
        };
        self.ie_dests = if want_ie {
            labels.clone().map(|l| self.build_dests(&[&self.ie[l]])).collect()
        } else {
            Vec::new()
        };
        self.ioe_dests = if want_oe && want_ie {
            labels
                .map(|l| self.build_dests(&[&self.oe[l], &self.ie[l]]))
                .collect()
        } else {
            Vec::new()
        };
        self.prepared = Some(strategy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0 -> 1 -> 2 -> 3, 0 -> 2, partitioned by parity over two fragments.
    fn two_fragments(directed: bool) -> (VertexMap, EdgecutFragment, EdgecutFragment) {
        let vm = VertexMap::hash_partitioned(2, 0..4u64);
        let edges = [
            EdgeRecord::new(0, 1),
            EdgeRecord::new(1, 2),
            EdgeRecord::weighted(2, 3, 2.5),
            EdgeRecord::new(0, 2),
        ];
        let f0 = EdgecutFragment::new(0, &vm, &edges, directed);
        let f1 = EdgecutFragment::new(1, &vm, &edges, directed);
        (vm, f0, f1)
    }

    #[test]
    fn inner_and_outer_vertices() {
        let (vm, f0, f1) = two_fragments(true);
        assert_eq!(f0.inner_vertices().len(), 2);
        assert_eq!(f1.inner_vertices().len(), 2);
        // f0 owns {0, 2} and sees ghosts {1, 3}
        let outer: Vec<Oid> = f0.outer_vertices().iter().map(|v| f0.get_id(v)).collect();
        assert_eq!(outer, vec![1, 3]);
        for v in f0.outer_vertices().iter() {
            assert_eq!(f0.frag_id(v), 1);
            let gid = f0.outer_vertex_gid(v);
            assert_eq!(vm.get_oid(gid), Some(f0.get_id(v)));
            // the owner resolves the same gid to an inner vertex
            let owned = f1.gid_to_vertex(gid).unwrap();
            assert!(f1.is_inner_vertex(owned));
            assert_eq!(f1.get_id(owned), f0.get_id(v));
        }
        assert_eq!(f0.total_vertices_num(), 4);
        assert_eq!(f0.get_inner_vertex(2), Some(Vertex::new(1)));
        assert_eq!(f0.get_inner_vertex(1), None);
    }

    #[test]
    fn adjacency_and_weights() {
        let (_, f0, _) = two_fragments(true);
        let v0 = f0.gid_to_vertex(f0.inner_vertex_gid(Vertex::new(0))).unwrap();
        let out: Vec<Oid> = f0.outgoing_edges(v0, 0).iter().map(|n| f0.get_id(n.neighbor)).collect();
        assert_eq!(out, vec![2, 1]);
        let v2 = Vertex::new(1);
        assert_eq!(f0.get_id(v2), 2);
        let e = f0.outgoing_edges(v2, 0);
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].weight, 2.5);
        let inc: Vec<Oid> = f0.incoming_edges(v2, 0).iter().map(|n| f0.get_id(n.neighbor)).collect();
        assert_eq!(inc, vec![0, 1]);
        // outer vertices carry no adjacency
        assert!(f0.outgoing_edges(Vertex::new(2), 0).is_empty());
    }

    #[test]
    fn undirected_loads_both_directions() {
        let (_, f0, _) = two_fragments(false);
        let v2 = Vertex::new(1);
        let out: Vec<Oid> = f0.outgoing_edges(v2, 0).iter().map(|n| f0.get_id(n.neighbor)).collect();
        assert_eq!(out, vec![0, 1, 3]);
    }

    #[test]
    fn dest_lists_follow_strategy() {
        let (_, mut f0, _) = two_fragments(true);
        let v0 = Vertex::new(0);
        assert!(f0.oe_dests(v0, 0).is_empty());

        f0.prepare_to_run_app(MessageStrategy::AlongOutgoingEdgeToOuterVertex);
        assert_eq!(f0.oe_dests(v0, 0), &[1]);
        assert!(f0.ie_dests(v0, 0).is_empty());

        f0.prepare_to_run_app(MessageStrategy::AlongEdgeToOuterVertex);
        // vertex 2 has in-edge from 1 and out-edge to 3, both on fragment 1
        let v2 = Vertex::new(1);
        assert_eq!(f0.ie_dests(v2, 0), &[1]);
        assert_eq!(f0.oe_dests(v2, 0), &[1]);
        assert_eq!(f0.ioe_dests(v2, 0), &[1]);
        assert!(f0.ie_dests(v0, 0).is_empty());
        assert_eq!(f0.prepared_strategy(), Some(MessageStrategy::AlongEdgeToOuterVertex));
    }

    #[test]
    fn labels_are_separate() {
        let vm = VertexMap::hash_partitioned(1, 0..3u64);
        let edges = [EdgeRecord::new(0, 1), EdgeRecord::new(0, 2).with_label(1)];
        let f = EdgecutFragment::new(0, &vm, &edges, true);
        assert_eq!(f.edge_label_num(), 2);
        assert_eq!(f.outgoing_edges(Vertex::new(0), 0).len(), 1);
        assert_eq!(f.outgoing_edges(Vertex::new(0), 1).len(), 1);
        assert!(f.outgoing_edges(Vertex::new(0), 2).is_empty());
    }
}
