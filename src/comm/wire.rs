//! Fixed wire conventions of the superstep protocol.

use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

/// Tags wrap inside the range every MPI implementation must accept
/// (`MPI_TAG_UB >= 32767`). The modulus is even, so parity survives.
pub const TAG_SPACE: u32 = 1 << 15;

/// Tag carried by traffic produced while computing `round`; it is consumed
/// in `round + 1`.
#[inline]
pub fn round_tag(round: u32) -> u32 {
    round.wrapping_add(1) % TAG_SPACE
}

/// Receive-ring slot a tag is delivered to.
#[inline]
pub fn tag_parity(tag: u32) -> usize {
    (tag & 1) as usize
}

/// Receive-ring slot drained while computing `round`.
#[inline]
pub fn round_parity(round: u32) -> usize {
    (round & 1) as usize
}

/// Per-fragment termination vote, summed across the cluster.
///
/// `active` counts fragments that sent at least one byte or asked to force
/// continue; `abort` counts fragments that called `force_terminate`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TerminateVote {
    pub active: u64,
    pub abort: u64,
}

impl TerminateVote {
    pub fn local(active: bool, abort: bool) -> Self {
        Self {
            active: active as u64,
            abort: abort as u64,
        }
    }

    pub fn as_words(&self) -> [u64; 2] {
        [self.active, self.abort]
    }

    pub fn from_words(words: &[u64]) -> Self {
        Self {
            active: words.first().copied().unwrap_or(0),
            abort: words.get(1).copied().unwrap_or(0),
        }
    }
}

const _: () = {
    assert!(size_of::<TerminateVote>() == 16);
    assert!(TAG_SPACE % 2 == 0);
};
