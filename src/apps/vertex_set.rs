//! Concurrent dense vertex set over a contiguous vertex range.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::fragment::{Vertex, VertexRange};

#[derive(Debug)]
pub struct DenseVertexSet {
    begin: u32,
    len: usize,
    words: Vec<AtomicU64>,
}

impl DenseVertexSet {
    pub fn new(range: &VertexRange) -> Self {
        Self {
            begin: range.begin(),
            len: range.len(),
            words: (0..range.len().div_ceil(64)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline]
    fn slot(&self, v: Vertex) -> (usize, u64) {
        let i = (v.lid() - self.begin) as usize;
        debug_assert!(i < self.len, "{v:?} outside the set's range");
        (i / 64, 1u64 << (i % 64))
    }

    /// Returns `true` if `v` was not yet in the set.
    #[inline]
    pub fn insert(&self, v: Vertex) -> bool {
        let (w, bit) = self.slot(v);
        self.words[w].fetch_or(bit, Ordering::AcqRel) & bit == 0
    }

    #[inline]
    pub fn contains(&self, v: Vertex) -> bool {
        let (w, bit) = self.slot(v);
        self.words[w].load(Ordering::Acquire) & bit != 0
    }

    pub fn clear(&mut self) {
        for w in &mut self.words {
            *w.get_mut() = 0;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Acquire) == 0)
    }

    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    /// Members in ascending order.
    pub fn to_vec(&self) -> Vec<Vertex> {
        let mut out = Vec::with_capacity(self.count());
        for (wi, w) in self.words.iter().enumerate() {
            let mut bits = w.load(Ordering::Acquire);
            while bits != 0 {
                let b = bits.trailing_zeros();
                out.push(Vertex::new(self.begin + (wi * 64) as u32 + b));
                bits &= bits - 1;
            }
        }
        out
    }
}
