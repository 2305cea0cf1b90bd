//! The graph fragment seen by the message manager and the applications.
//!
//! A fragment is the partition of the graph owned by one worker process. Its
//! *inner* vertices are owned locally; its *outer* vertices are ghost copies
//! of vertices owned by other fragments. Every vertex has a local handle
//! ([`Vertex`]) and a cluster-wide global id ([`Gid`]).
//!
//! The core only needs the narrow interface of [`Fragment`]; the in-memory
//! [`EdgecutFragment`](edgecut::EdgecutFragment) is the implementation used
//! by the bundled applications and tests.

pub mod edgecut;
pub mod vertex_map;

use std::fmt;
use std::ops::Range;

pub use edgecut::{EdgeRecord, EdgecutFragment};
pub use vertex_map::VertexMap;

/// Fragment id.
pub type Fid = usize;
/// Global vertex id, see [`IdParser`].
pub type Gid = u64;
/// Original (user supplied) vertex id.
pub type Oid = u64;
/// Edge label index.
pub type LabelId = usize;

/// Local vertex handle. Inner vertices occupy `0..ivnum`, outer vertices
/// `ivnum..ivnum + ovnum`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Vertex(u32);

impl Vertex {
    #[inline]
    pub const fn new(lid: u32) -> Self {
        Vertex(lid)
    }

    #[inline]
    pub const fn lid(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Vertex").field(&self.0).finish()
    }
}

/// Half-open range of local vertex handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexRange(Range<u32>);

impl VertexRange {
    pub fn new(begin: u32, end: u32) -> Self {
        VertexRange(begin..end)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, v: Vertex) -> bool {
        self.0.contains(&v.0)
    }

    pub fn begin(&self) -> u32 {
        self.0.start
    }

    pub fn end(&self) -> u32 {
        self.0.end
    }

    pub fn iter(&self) -> impl Iterator<Item = Vertex> + '_ {
        self.0.clone().map(Vertex)
    }

    /// The `i`-th vertex of the range.
    #[inline]
    pub fn nth_vertex(&self, i: usize) -> Vertex {
        Vertex(self.0.start + i as u32)
    }
}

/// One adjacency entry.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Nbr {
    pub neighbor: Vertex,
    pub weight: f64,
}

/// Packs `(fid, local id)` into a [`Gid`]: the fragment id lives in the
/// high bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdParser {
    fid_offset: u32,
    lid_mask: u64,
}

impl IdParser {
    pub fn new(fnum: usize) -> Self {
        let fid_bits = usize::BITS - fnum.saturating_sub(1).leading_zeros();
        let fid_offset = u64::BITS - fid_bits.max(1);
        Self {
            fid_offset,
            lid_mask: (1u64 << fid_offset) - 1,
        }
    }

    #[inline]
    pub fn gid(&self, fid: Fid, lid: u64) -> Gid {
        ((fid as u64) << self.fid_offset) | lid
    }

    #[inline]
    pub fn fid(&self, gid: Gid) -> Fid {
        (gid >> self.fid_offset) as Fid
    }

    #[inline]
    pub fn lid(&self, gid: Gid) -> u64 {
        gid & self.lid_mask
    }
}

/// How an application routes messages; decides which destination lists a
/// fragment caches in [`Fragment::prepare_to_run_app`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum MessageStrategy {
    /// Messages go to the owner of an outer vertex.
    #[default]
    SyncOnOuterVertex,
    /// Inner vertices push to fragments holding their outgoing neighbours.
    AlongOutgoingEdgeToOuterVertex,
    /// Inner vertices push to fragments holding their incoming neighbours.
    AlongIncomingEdgeToOuterVertex,
    /// Both of the above.
    AlongEdgeToOuterVertex,
}

/// Narrow graph interface consumed by the core.
pub trait Fragment: Sync {
    fn fid(&self) -> Fid;

    fn fnum(&self) -> usize;

    fn total_vertices_num(&self) -> usize;

    fn inner_vertices(&self) -> VertexRange;

    fn outer_vertices(&self) -> VertexRange;

    /// Inner and outer vertices.
    fn vertices(&self) -> VertexRange {
        VertexRange::new(self.inner_vertices().begin(), self.outer_vertices().end())
    }

    #[inline]
    fn is_inner_vertex(&self, v: Vertex) -> bool {
        self.inner_vertices().contains(v)
    }

    #[inline]
    fn is_outer_vertex(&self, v: Vertex) -> bool {
        self.outer_vertices().contains(v)
    }

    /// Owner fragment of `v`.
    fn frag_id(&self, v: Vertex) -> Fid;

    fn inner_vertex_gid(&self, v: Vertex) -> Gid;

    fn outer_vertex_gid(&self, v: Vertex) -> Gid;

    fn vertex_gid(&self, v: Vertex) -> Gid {
        if self.is_inner_vertex(v) {
            self.inner_vertex_gid(v)
        } else {
            self.outer_vertex_gid(v)
        }
    }

    /// Resolves a global id to the local handle of the same vertex, inner or
    /// outer.
    fn gid_to_vertex(&self, gid: Gid) -> Option<Vertex>;

    /// Original id of `v`.
    fn get_id(&self, v: Vertex) -> Oid;

    /// Inner vertex with original id `oid`, if this fragment owns it.
    fn get_inner_vertex(&self, oid: Oid) -> Option<Vertex>;

    fn edge_label_num(&self) -> usize;

    /// Outgoing edges of an inner vertex.
    fn outgoing_edges(&self, v: Vertex, label: LabelId) -> &[Nbr];

    /// Incoming edges of an inner vertex.
    fn incoming_edges(&self, v: Vertex, label: LabelId) -> &[Nbr];

    /// Fragments holding a ghost of inner vertex `v` through an incoming
    /// edge of `v`.
    fn ie_dests(&self, v: Vertex, label: LabelId) -> &[Fid];

    /// Fragments holding a ghost of inner vertex `v` through an outgoing
    /// edge of `v`.
    fn oe_dests(&self, v: Vertex, label: LabelId) -> &[Fid];

    /// Union of [`ie_dests`](Self::ie_dests) and [`oe_dests`](Self::oe_dests).
    fn ioe_dests(&self, v: Vertex, label: LabelId) -> &[Fid];

    /// Builds whatever routing caches `strategy` needs.
    fn prepare_to_run_app(&mut self, strategy: MessageStrategy);
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(Vertex, u32);

    #[test]
    fn id_parser_roundtrip() {
        for fnum in [1usize, 2, 3, 4, 5, 64, 1000] {
            let p = IdParser::new(fnum);
            let fid = fnum - 1;
            let gid = p.gid(fid, 12345);
            assert_eq!(p.fid(gid), fid);
            assert_eq!(p.lid(gid), 12345);
        }
    }

    #[test]
    fn gids_order_by_fragment_then_lid() {
        let p = IdParser::new(3);
        assert!(p.gid(0, 99) < p.gid(1, 0));
        assert!(p.gid(1, 0) < p.gid(1, 1));
        assert!(p.gid(1, 99) < p.gid(2, 0));
    }

    #[test]
    fn vertex_range_iteration() {
        let r = VertexRange::new(3, 6);
        assert_eq!(r.len(), 3);
        assert!(r.contains(Vertex::new(5)));
        assert!(!r.contains(Vertex::new(6)));
        assert_eq!(r.nth_vertex(1), Vertex::new(4));
        assert_eq!(r.iter().map(|v| v.lid()).collect::<Vec<_>>(), vec![3, 4, 5]);
    }
}
