//! Atomic helpers for commutative updates from many threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// `f64` stored as bits in an `AtomicU64`.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        AtomicF64(AtomicU64::new(v.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }

    /// Lowers the value to `v`; returns `true` if it changed.
    pub fn fetch_min(&self, v: f64) -> bool {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            if f64::from_bits(cur) <= v {
                return false;
            }
            match self
                .0
                .compare_exchange_weak(cur, v.to_bits(), Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn fetch_add(&self, v: f64) -> f64 {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            let next = f64::from_bits(cur) + v;
            match self
                .0
                .compare_exchange_weak(cur, next.to_bits(), Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return f64::from_bits(cur),
                Err(actual) => cur = actual,
            }
        }
    }
}

/// Lowers `a` to `v`; returns `true` if it changed.
#[inline]
pub fn atomic_min_u64(a: &AtomicU64, v: u64) -> bool {
    a.fetch_min(v, Ordering::AcqRel) > v
}
