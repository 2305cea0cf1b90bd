//! Double-buffered receive queues as an explicit two-slot ring.
//!
//! Traffic produced in round `r` carries a tag of parity `(r + 1) % 2` and
//! lands in that slot while round `r` is still computing; it is drained in
//! round `r + 1`. Each slot counts `fnum` producers: one end-of-round marker
//! per remote fragment plus the local loopback hand-off.
//!
//! A slot is either `Filling` (accepting traffic, not yet consumed) or
//! `Draining` (the current round consumes it). At most one slot drains at a
//! time, and only from `begin_drain` until `finish_round` of the same round.

use bytes::Bytes;
use parking_lot::Mutex;

use crate::bsp_error::BspError;
use crate::comm::wire::{round_parity, tag_parity};
use crate::debug_invariants::DebugInvariants;
use crate::parallel::blocking_queue::BlockingQueue;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotPhase {
    Filling,
    Draining,
}

#[derive(Debug)]
struct RecvSlot {
    queue: BlockingQueue<Bytes>,
    phase: Mutex<SlotPhase>,
}

impl RecvSlot {
    fn new(fnum: usize) -> Self {
        Self {
            queue: BlockingQueue::new(fnum),
            phase: Mutex::new(SlotPhase::Filling),
        }
    }
}

#[derive(Debug)]
pub struct RecvRing {
    fnum: usize,
    slots: [RecvSlot; 2],
}

impl RecvRing {
    pub fn new(fnum: usize) -> Self {
        Self {
            fnum,
            slots: [RecvSlot::new(fnum), RecvSlot::new(fnum)],
        }
    }

    /// Receive thread: a non-empty buffer tagged `tag` arrived.
    pub fn deliver(&self, tag: u32, payload: Bytes) {
        self.slots[tag_parity(tag)].queue.put(payload);
    }

    /// Receive thread: a remote fragment has no more data under `tag`.
    pub fn end_of_round(&self, tag: u32) {
        self.slots[tag_parity(tag)].queue.dec_producer_num();
    }

    /// Starts consuming the slot of `round`: hands over the loopback
    /// buffers, signs off the local producer and marks the slot `Draining`.
    pub fn begin_drain(&self, round: u32, loopback: Vec<Bytes>) {
        let slot = &self.slots[round_parity(round)];
        slot.queue.put_all(loopback);
        slot.queue.dec_producer_num();
        *slot.phase.lock() = SlotPhase::Draining;
        self.debug_assert_invariants();
    }

    /// Queue of `round` if it is being drained.
    pub fn draining(&self, round: u32) -> Option<&BlockingQueue<Bytes>> {
        let slot = &self.slots[round_parity(round)];
        (*slot.phase.lock() == SlotPhase::Draining).then_some(&slot.queue)
    }

    /// Ends `round`. A slot that was drained is emptied until every
    /// producer has signed off, then re-armed for the traffic consumed two
    /// rounds later. Returns the number of buffers nobody consumed.
    ///
    /// A slot that never started draining (round 0) is left as is: its
    /// producers have not reported yet.
    pub fn finish_round(&self, round: u32) -> usize {
        let parity = round_parity(round);
        if self.phase(parity) != SlotPhase::Draining {
            return 0;
        }
        let slot = &self.slots[parity];
        let mut leftovers = 0;
        while slot.queue.get().is_some() {
            leftovers += 1;
        }
        slot.queue.set_producer_num(self.fnum);
        *slot.phase.lock() = SlotPhase::Filling;
        leftovers
    }

    /// Wakes every consumer for good; used when the receive side fails.
    pub fn close(&self) {
        for slot in &self.slots {
            slot.queue.set_producer_num(0);
        }
    }

    pub fn phase(&self, parity: usize) -> SlotPhase {
        *self.slots[parity].phase.lock()
    }

    /// Buffers currently queued in slot `parity`.
    pub fn pending(&self, parity: usize) -> usize {
        self.slots[parity].queue.len()
    }
}

impl DebugInvariants for RecvRing {
    const NAME: &'static str = "RecvRing";

    fn validate_invariants(&self) -> Result<(), BspError> {
        if self.phase(0) == SlotPhase::Draining && self.phase(1) == SlotPhase::Draining {
            return Err(BspError::InvalidState {
                op: "RecvRing::begin_drain",
                state: "already draining the other slot",
            });
        }
        Ok(())
    }
}
