//! Thin façade over inter-fragment message passing.
//!
//! Payloads are contiguous byte buffers handed over as [`Bytes`]; a backend
//! may keep them alive as long as it needs without copying. Two backends
//! ship with the crate: [`LocalComm`](super::local::LocalComm), which runs
//! every fragment of a cluster inside one process, and `MpiComm` behind the
//! `mpi-support` feature.
//!
//! Implementations must be usable from several threads at once: the message
//! manager receives on one thread, sends on another and runs collectives on
//! the thread that drives the rounds.

use bytes::Bytes;

use crate::bsp_error::BspError;

/// One received point-to-point message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub source: usize,
    pub tag: u32,
    pub payload: Bytes,
}

/// Communication interface required by the BSP message manager.
pub trait Communicator: Send + Sync + 'static {
    /// Rank of this process within the communicator.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Collective: returns a communicator with the same group and an
    /// isolated message space. Every rank must call it in the same order.
    fn duplicate(&self) -> Result<Self, BspError>
    where
        Self: Sized;

    /// Sends `payload` to `peer` with `tag`. May return before the peer has
    /// received it; delivery order per `(source, peer, tag)` is preserved.
    fn send(&self, peer: usize, tag: u32, payload: Bytes) -> Result<(), BspError>;

    /// Blocks until a message from any source with any tag is available.
    fn recv_any(&self) -> Result<Envelope, BspError>;

    /// Collective: every rank contributes `local` and receives all
    /// contributions in rank order.
    fn all_gather(&self, local: &[u8]) -> Result<Vec<Vec<u8>>, BspError>;

    /// Collective: blocks until every rank has entered the barrier.
    fn barrier(&self) -> Result<(), BspError> {
        self.all_gather(&[]).map(|_| ())
    }

    /// Collective element-wise sum.
    fn all_reduce_sum_u64(&self, local: &[u64]) -> Result<Vec<u64>, BspError> {
        fold_gathered(self, local, 0u64, |acc, x| acc.wrapping_add(x))
    }

    /// Collective element-wise maximum.
    fn all_reduce_max_u64(&self, local: &[u64]) -> Result<Vec<u64>, BspError> {
        fold_gathered(self, local, 0u64, u64::max)
    }

    /// Collective element-wise sum, folded in rank order so every rank
    /// obtains the same bits.
    fn all_reduce_sum_f64(&self, local: &[f64]) -> Result<Vec<f64>, BspError> {
        fold_gathered(self, local, 0.0f64, |acc, x| acc + x)
    }
}

fn fold_gathered<C, T, F>(comm: &C, local: &[T], init: T, op: F) -> Result<Vec<T>, BspError>
where
    C: Communicator + ?Sized,
    T: bytemuck::Pod,
    F: Fn(T, T) -> T,
{
    let gathered = comm.all_gather(bytemuck::cast_slice(local))?;
    let mut out = vec![init; local.len()];
    for (rank, blob) in gathered.iter().enumerate() {
        let expected = std::mem::size_of_val(local);
        if blob.len() != expected {
            return Err(BspError::CollectiveFailed(format!(
                "rank {rank} contributed {} bytes, expected {expected}",
                blob.len()
            )));
        }
        let values: Vec<T> = blob
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        for (acc, x) in out.iter_mut().zip(values) {
            *acc = op(*acc, x);
        }
    }
    Ok(out)
}
