//! Thread-local staging of outgoing messages ("channels").
//!
//! A [`ThreadLocalMessageBuffer`] holds one [`InArchive`] per destination
//! fragment. Messages are appended in place; once a bucket grows past
//! `block_size` it is handed to the shared [`Outbox`] and replaced by a
//! fresh allocation of `block_cap` bytes. A channel is owned by exactly one
//! thread at a time, so none of the append paths synchronize.

use std::sync::Arc;

use bytemuck::Pod;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::archive::InArchive;
use crate::fragment::{Fid, Fragment, LabelId, Vertex};
use crate::parallel::blocking_queue::BlockingQueue;

/// Funnel every flushed buffer passes through.
///
/// Buffers for the local fragment are kept aside for the loopback hand-off
/// at the start of the next round; everything else is queued for the send
/// thread. Empty buffers are dropped, since a zero-length payload on the
/// wire is a protocol marker.
#[derive(Debug)]
pub struct Outbox {
    fid: Fid,
    sending: BlockingQueue<(Fid, Bytes)>,
    to_self: Mutex<Vec<Bytes>>,
}

impl Outbox {
    pub fn new(fid: Fid) -> Self {
        Self {
            fid,
            sending: BlockingQueue::new(0),
            to_self: Mutex::new(Vec::new()),
        }
    }

    pub fn fid(&self) -> Fid {
        self.fid
    }

    pub fn send_raw(&self, fid: Fid, payload: Bytes) {
        if payload.is_empty() {
            return;
        }
        if fid == self.fid {
            self.to_self.lock().push(payload);
        } else {
            self.sending.put((fid, payload));
        }
    }

    /// Opens the sending queue for one round with a single producer: the
    /// round itself, closed by [`close_round`](Self::close_round).
    pub(crate) fn open_round(&self) {
        self.sending.set_producer_num(1);
    }

    pub(crate) fn close_round(&self) {
        self.sending.dec_producer_num();
    }

    /// Blocks for the next remote buffer of the open round.
    pub(crate) fn next_outgoing(&self) -> Option<(Fid, Bytes)> {
        self.sending.get()
    }

    pub fn take_loopback(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.to_self.lock())
    }

    /// Removes every queued remote buffer without sending it.
    pub fn take_outgoing(&self) -> Vec<(Fid, Bytes)> {
        self.sending.drain()
    }
}

/// Per-thread, per-destination message staging buffer.
#[derive(Debug)]
pub struct ThreadLocalMessageBuffer {
    to_send: Vec<InArchive>,
    outbox: Arc<Outbox>,
    block_size: usize,
    block_cap: usize,
    sent_size: usize,
}

impl ThreadLocalMessageBuffer {
    pub fn new(fnum: usize, outbox: Arc<Outbox>, block_size: usize, block_cap: usize) -> Self {
        Self {
            to_send: (0..fnum).map(|_| InArchive::with_capacity(block_cap)).collect(),
            outbox,
            block_size,
            block_cap,
            sent_size: 0,
        }
    }

    /// Reallocates one bucket per fragment, each reserved to `block_cap`.
    pub fn init(&mut self, fnum: usize, outbox: Arc<Outbox>, block_size: usize, block_cap: usize) {
        self.to_send = (0..fnum).map(|_| InArchive::with_capacity(block_cap)).collect();
        self.outbox = outbox;
        self.block_size = block_size;
        self.block_cap = block_cap;
        self.sent_size = 0;
    }

    /// Sends `(gid(v), msg)` to the owner of outer vertex `v`.
    #[inline]
    pub fn sync_state_on_outer_vertex<F, M>(&mut self, frag: &F, v: Vertex, msg: &M)
    where
        F: Fragment + ?Sized,
        M: Pod,
    {
        debug_assert!(frag.is_outer_vertex(v), "{v:?} is not an outer vertex");
        let fid = frag.frag_id(v);
        let bucket = &mut self.to_send[fid];
        bucket.push(&frag.outer_vertex_gid(v));
        bucket.push(msg);
        self.flush_if_full(fid);
    }

    /// Sends the gid of outer vertex `v` alone to its owner.
    #[inline]
    pub fn sync_gid_on_outer_vertex<F>(&mut self, frag: &F, v: Vertex)
    where
        F: Fragment + ?Sized,
    {
        self.sync_state_on_outer_vertex(frag, v, &());
    }

    /// Sends `(gid(v), msg)` to every fragment reaching inner vertex `v`
    /// through one of its incoming edges.
    pub fn send_msg_through_iedges<F, M>(&mut self, frag: &F, v: Vertex, label: LabelId, msg: &M)
    where
        F: Fragment + ?Sized,
        M: Pod,
    {
        self.fan_out(frag.ie_dests(v, label), frag.inner_vertex_gid(v), msg);
    }

    /// Same as [`send_msg_through_iedges`](Self::send_msg_through_iedges)
    /// along outgoing edges.
    pub fn send_msg_through_oedges<F, M>(&mut self, frag: &F, v: Vertex, label: LabelId, msg: &M)
    where
        F: Fragment + ?Sized,
        M: Pod,
    {
        self.fan_out(frag.oe_dests(v, label), frag.inner_vertex_gid(v), msg);
    }

    /// Along both edge directions, each fragment once.
    pub fn send_msg_through_edges<F, M>(&mut self, frag: &F, v: Vertex, label: LabelId, msg: &M)
    where
        F: Fragment + ?Sized,
        M: Pod,
    {
        self.fan_out(frag.ioe_dests(v, label), frag.inner_vertex_gid(v), msg);
    }

    /// Sends `msg` to fragment `fid`, no gid attached.
    pub fn send_to_fragment<M: Pod>(&mut self, fid: Fid, msg: &M) {
        self.to_send[fid].push(msg);
        self.flush_if_full(fid);
    }

    /// Flushes every non-empty bucket, whatever its size.
    pub fn flush_messages(&mut self) {
        for fid in 0..self.to_send.len() {
            if !self.to_send[fid].is_empty() {
                self.flush_local_buffer(fid);
            }
        }
    }

    /// Zeroes the sent byte counter. Buckets are left untouched.
    pub fn reset(&mut self) {
        self.sent_size = 0;
    }

    /// Bytes handed to the outbox since the last [`reset`](Self::reset).
    pub fn sent_msg_size(&self) -> usize {
        self.sent_size
    }

    /// Bytes appended but not yet flushed.
    pub fn pending_size(&self) -> usize {
        self.to_send.iter().map(InArchive::size).sum()
    }

    pub fn fnum(&self) -> usize {
        self.to_send.len()
    }

    fn fan_out<M: Pod>(&mut self, dests: &[Fid], gid: u64, msg: &M) {
        for &fid in dests {
            let bucket = &mut self.to_send[fid];
            bucket.push(&gid);
            bucket.push(msg);
            self.flush_if_full(fid);
        }
    }

    #[inline]
    fn flush_if_full(&mut self, fid: Fid) {
        if self.to_send[fid].size() > self.block_size {
            self.flush_local_buffer(fid);
        }
    }

    fn flush_local_buffer(&mut self, fid: Fid) {
        let bucket = &mut self.to_send[fid];
        self.sent_size += bucket.size();
        let payload = bucket.take_and_reserve(self.block_cap);
        self.outbox.send_raw(fid, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::OutArchive;
    use crate::fragment::{EdgeRecord, EdgecutFragment, MessageStrategy, VertexMap};

    fn channel(fid: Fid, fnum: usize, block_size: usize) -> (Arc<Outbox>, ThreadLocalMessageBuffer) {
        let outbox = Arc::new(Outbox::new(fid));
        let buf = ThreadLocalMessageBuffer::new(fnum, Arc::clone(&outbox), block_size, 64);
        (outbox, buf)
    }

    #[test]
    fn below_threshold_waits_for_flush() {
        let (outbox, mut buf) = channel(0, 2, 1024);
        buf.send_to_fragment(1, &7u32);
        assert!(outbox.take_outgoing().is_empty());
        assert_eq!(buf.pending_size(), 4);
        buf.flush_messages();
        assert_eq!(buf.sent_msg_size(), 4);
        let out = outbox.take_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 1);
        assert_eq!(OutArchive::new(out[0].1.clone()).pop::<u32>().unwrap(), 7);
        buf.reset();
        assert_eq!(buf.sent_msg_size(), 0);
    }

    #[test]
    fn crossing_threshold_flushes_mid_round() {
        let (outbox, mut buf) = channel(0, 2, 8);
        buf.send_to_fragment(1, &1u32);
        buf.send_to_fragment(1, &2u32);
        assert!(outbox.take_outgoing().is_empty(), "8 bytes is not above 8");
        buf.send_to_fragment(1, &3u32);
        assert_eq!(outbox.take_outgoing().len(), 1);
        assert_eq!(buf.pending_size(), 0);
        assert_eq!(buf.sent_msg_size(), 12);
    }

    #[test]
    fn self_addressed_buffers_stay_local() {
        let (outbox, mut buf) = channel(1, 2, 1024);
        buf.send_to_fragment(1, &9u64);
        buf.flush_messages();
        assert!(outbox.take_outgoing().is_empty());
        let looped = outbox.take_loopback();
        assert_eq!(looped.len(), 1);
        assert_eq!(&looped[0][..], &9u64.to_ne_bytes());
    }

    #[test]
    fn sync_on_outer_vertex_tags_with_remote_gid() {
        let vm = VertexMap::hash_partitioned(2, 0..4u64);
        let edges = [EdgeRecord::new(0, 1), EdgeRecord::new(2, 3)];
        let mut frag = EdgecutFragment::new(0, &vm, &edges, true);
        frag.prepare_to_run_app(MessageStrategy::SyncOnOuterVertex);

        let (outbox, mut buf) = channel(0, 2, 1024);
        for v in frag.outer_vertices().iter() {
            buf.sync_state_on_outer_vertex(&frag, v, &5u32);
        }
        buf.flush_messages();
        let (fid, payload) = outbox.take_outgoing().remove(0);
        assert_eq!(fid, 1);
        let mut arc = OutArchive::new(payload);
        let mut gids = Vec::new();
        while !arc.is_empty() {
            gids.push(arc.pop::<u64>().unwrap());
            assert_eq!(arc.pop::<u32>().unwrap(), 5);
        }
        assert_eq!(gids, vec![vm.get_gid(1).unwrap(), vm.get_gid(3).unwrap()]);
    }

    #[test]
    fn through_oedges_uses_own_gid() {
        let vm = VertexMap::hash_partitioned(2, 0..4u64);
        let edges = [EdgeRecord::new(0, 1), EdgeRecord::new(0, 3), EdgeRecord::new(2, 0)];
        let mut frag = EdgecutFragment::new(0, &vm, &edges, true);
        frag.prepare_to_run_app(MessageStrategy::AlongOutgoingEdgeToOuterVertex);
        let v0 = frag.gid_to_vertex(vm.get_gid(0).unwrap()).unwrap();

        let (outbox, mut buf) = channel(0, 2, 1024);
        buf.send_msg_through_oedges(&frag, v0, 0, &1.5f64);
        buf.flush_messages();
        let out = outbox.take_outgoing();
        assert_eq!(out.len(), 1, "both neighbours live on fragment 1");
        let mut arc = OutArchive::new(out[0].1.clone());
        assert_eq!(arc.pop::<u64>().unwrap(), vm.get_gid(0).unwrap());
        assert_eq!(arc.pop::<f64>().unwrap(), 1.5);
        assert!(arc.is_empty());
    }

    // fnum 3: fragment 0 owns {0, 3}; 0 has in-edges from 1 and 2 and
    // out-edges to 1 and 4, all owned by fragments 1 and 2.
    fn star_on_zero() -> (VertexMap, EdgecutFragment) {
        let vm = VertexMap::hash_partitioned(3, 0..6u64);
        let edges = [
            EdgeRecord::new(1, 0),
            EdgeRecord::new(2, 0),
            EdgeRecord::new(0, 1),
            EdgeRecord::new(0, 4),
        ];
        let mut frag = EdgecutFragment::new(0, &vm, &edges, true);
        frag.prepare_to_run_app(MessageStrategy::AlongEdgeToOuterVertex);
        (vm, frag)
    }

    fn gids_and_values(payload: Bytes) -> Vec<(u64, u32)> {
        let mut arc = OutArchive::new(payload);
        let mut out = Vec::new();
        while !arc.is_empty() {
            out.push((arc.pop::<u64>().unwrap(), arc.pop::<u32>().unwrap()));
        }
        out
    }

    #[test]
    fn gid_only_sync_carries_no_payload() {
        let vm = VertexMap::hash_partitioned(2, 0..4u64);
        let edges = [EdgeRecord::new(0, 1), EdgeRecord::new(2, 3)];
        let mut frag = EdgecutFragment::new(0, &vm, &edges, true);
        frag.prepare_to_run_app(MessageStrategy::SyncOnOuterVertex);

        let (outbox, mut buf) = channel(0, 2, 1024);
        for v in frag.outer_vertices().iter() {
            buf.sync_gid_on_outer_vertex(&frag, v);
        }
        assert_eq!(buf.pending_size(), 16);
        buf.flush_messages();
        let (fid, payload) = outbox.take_outgoing().remove(0);
        assert_eq!(fid, 1);
        let mut arc = OutArchive::new(payload);
        assert_eq!(arc.pop::<u64>().unwrap(), vm.get_gid(1).unwrap());
        arc.pop::<()>().unwrap();
        assert_eq!(arc.pop::<u64>().unwrap(), vm.get_gid(3).unwrap());
        assert!(arc.is_empty());
    }

    #[test]
    fn through_iedges_reaches_in_neighbour_owners() {
        let (vm, frag) = star_on_zero();
        let v0 = frag.get_inner_vertex(0).unwrap();
        let gid0 = vm.get_gid(0).unwrap();

        let (outbox, mut buf) = channel(0, 3, 1024);
        buf.send_msg_through_iedges(&frag, v0, 0, &7u32);
        buf.flush_messages();
        let mut out = outbox.take_outgoing();
        out.sort_by_key(|(fid, _)| *fid);
        let dests: Vec<Fid> = out.iter().map(|(fid, _)| *fid).collect();
        assert_eq!(dests, vec![1, 2]);
        for (_, payload) in out {
            assert_eq!(gids_and_values(payload), vec![(gid0, 7)]);
        }
    }

    #[test]
    fn through_edges_visits_each_fragment_once() {
        let (vm, frag) = star_on_zero();
        let v0 = frag.get_inner_vertex(0).unwrap();
        let gid0 = vm.get_gid(0).unwrap();
        // fragment 1 is reached by an in-edge and two out-edges
        assert_eq!(frag.ioe_dests(v0, 0), &[1, 2]);

        let (outbox, mut buf) = channel(0, 3, 1024);
        buf.send_msg_through_edges(&frag, v0, 0, &9u32);
        buf.flush_messages();
        assert_eq!(buf.sent_msg_size(), 2 * 12);
        let mut out = outbox.take_outgoing();
        out.sort_by_key(|(fid, _)| *fid);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, 1);
        assert_eq!(out[1].0, 2);
        for (_, payload) in out {
            assert_eq!(gids_and_values(payload), vec![(gid0, 9)]);
        }
    }

    #[test]
    fn init_rebinds_and_drops_staged_data() {
        let (old, mut buf) = channel(0, 2, 1024);
        buf.send_to_fragment(1, &1u32);
        buf.send_to_fragment(1, &2u32);
        buf.flush_messages();
        buf.send_to_fragment(1, &3u32);
        assert_eq!(buf.sent_msg_size(), 8);

        let new = Arc::new(Outbox::new(0));
        buf.init(3, Arc::clone(&new), 4, 16);
        assert_eq!(buf.fnum(), 3);
        assert_eq!(buf.pending_size(), 0);
        assert_eq!(buf.sent_msg_size(), 0);

        buf.send_to_fragment(2, &4u32);
        assert!(new.take_outgoing().is_empty(), "4 bytes is not above 4");
        buf.send_to_fragment(2, &5u32);
        assert_eq!(new.take_outgoing().len(), 1);
        assert_eq!(old.take_outgoing().len(), 1, "only the flush before init");
    }
}
