//! Static cluster topology: which fragment this process owns and where the
//! other fragments live.

use crate::bsp_error::BspError;
use crate::comm::communicator::Communicator;
use crate::fragment::Fid;

/// Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommSpec {
    fid: Fid,
    fnum: usize,
    worker_id: usize,
    worker_num: usize,
    frag_to_worker: Vec<usize>,
}

impl CommSpec {
    /// One fragment per rank, fragment id equal to rank.
    pub fn from_communicator<C: Communicator>(comm: &C) -> Self {
        let worker_num = comm.size();
        Self {
            fid: comm.rank(),
            fnum: worker_num,
            worker_id: comm.rank(),
            worker_num,
            frag_to_worker: (0..worker_num).collect(),
        }
    }

    /// Replaces the identity placement with `frag_to_worker[fid] = rank`.
    ///
    /// # Errors
    /// The mapping must be a permutation of `0..worker_num`.
    pub fn with_frag_mapping(mut self, frag_to_worker: Vec<usize>) -> Result<Self, BspError> {
        if frag_to_worker.len() != self.worker_num {
            return Err(BspError::FragmentMismatch {
                expected: self.worker_num,
                got: frag_to_worker.len(),
            });
        }
        let mut seen = vec![false; self.worker_num];
        for &w in &frag_to_worker {
            if w >= self.worker_num || std::mem::replace(&mut seen[w], true) {
                return Err(BspError::InvalidState {
                    op: "with_frag_mapping",
                    state: "given a mapping that is not a permutation of the ranks",
                });
            }
        }
        self.fid = frag_to_worker
            .iter()
            .position(|&w| w == self.worker_id)
            .unwrap_or(self.worker_id);
        self.frag_to_worker = frag_to_worker;
        Ok(self)
    }

    #[inline]
    pub fn fid(&self) -> Fid {
        self.fid
    }

    #[inline]
    pub fn fnum(&self) -> usize {
        self.fnum
    }

    #[inline]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    #[inline]
    pub fn worker_num(&self) -> usize {
        self.worker_num
    }

    /// Rank hosting fragment `fid`.
    #[inline]
    pub fn frag_to_worker(&self, fid: Fid) -> usize {
        self.frag_to_worker[fid]
    }

    /// Fragment hosted by `worker`.
    pub fn worker_to_frag(&self, worker: usize) -> Option<Fid> {
        self.frag_to_worker.iter().position(|&w| w == worker)
    }
}
