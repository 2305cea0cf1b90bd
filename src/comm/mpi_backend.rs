//! MPI backend (feature = "mpi-support").
//!
//! The message manager talks to MPI from three threads at once (receive,
//! send, and collectives on the driving thread), so MPI must be initialized
//! with `MPI_THREAD_MULTIPLE`. Use [`initialize`] rather than
//! `mpi::initialize`; it refuses any lower threading level.
//!
//! Sends are blocking `MPI_Send`s issued from the manager's send thread,
//! which is already off the compute path; the peer's receive thread is
//! always probing, so a send never waits on application progress.

use bytes::Bytes;
use mpi::collective::SystemOperation;
use mpi::datatype::PartitionMut;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::{Count, Threading};

use crate::bsp_error::BspError;
use crate::comm::communicator::{Communicator as BspCommunicator, Envelope};

/// Initializes MPI with full thread support.
pub fn initialize() -> Result<Universe, BspError> {
    let (universe, level) = mpi::initialize_with_threading(Threading::Multiple)
        .ok_or_else(|| BspError::MpiInit("MPI was already initialized".into()))?;
    if level != Threading::Multiple {
        return Err(BspError::MpiInit(format!(
            "MPI_THREAD_MULTIPLE required, library provides {level:?}"
        )));
    }
    Ok(universe)
}

pub struct MpiComm {
    comm: SimpleCommunicator,
    rank: usize,
    size: usize,
}

// SAFETY: the communicator handle is only passed to MPI calls, and MPI was
// initialized with MPI_THREAD_MULTIPLE by `initialize`, which makes
// concurrent calls on one communicator legal.
unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl MpiComm {
    /// Wraps `MPI_COMM_WORLD` of an initialized universe.
    pub fn world(universe: &Universe) -> Self {
        Self::from_simple(universe.world())
    }

    fn from_simple(comm: SimpleCommunicator) -> Self {
        let rank = comm.rank() as usize;
        let size = comm.size() as usize;
        Self { comm, rank, size }
    }
}

impl BspCommunicator for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn duplicate(&self) -> Result<Self, BspError> {
        let dup: SimpleCommunicator = self.comm.duplicate();
        Ok(Self::from_simple(dup))
    }

    fn send(&self, peer: usize, tag: u32, payload: Bytes) -> Result<(), BspError> {
        if peer >= self.size {
            return Err(BspError::CommError {
                peer,
                reason: format!("rank out of range (communicator size {})", self.size),
            });
        }
        self.comm
            .process_at_rank(peer as i32)
            .send_with_tag(&payload[..], tag as i32);
        Ok(())
    }

    fn recv_any(&self) -> Result<Envelope, BspError> {
        let (msg, status) = self.comm.any_process().matched_probe();
        let (data, _) = msg.matched_receive_vec::<u8>();
        Ok(Envelope {
            source: status.source_rank() as usize,
            tag: status.tag() as u32,
            payload: Bytes::from(data),
        })
    }

    fn all_gather(&self, local: &[u8]) -> Result<Vec<Vec<u8>>, BspError> {
        let local_count = local.len() as Count;
        let mut counts: Vec<Count> = vec![0; self.size];
        self.comm.all_gather_into(&local_count, &mut counts[..]);

        let displs: Vec<Count> = counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        let mut buf = vec![0u8; total];
        {
            let mut partition = PartitionMut::new(&mut buf[..], counts.clone(), &displs[..]);
            self.comm.all_gather_varcount_into(local, &mut partition);
        }
        Ok(counts
            .iter()
            .zip(&displs)
            .map(|(&c, &d)| buf[d as usize..(d + c) as usize].to_vec())
            .collect())
    }

    fn barrier(&self) -> Result<(), BspError> {
        self.comm.barrier();
        Ok(())
    }

    fn all_reduce_sum_u64(&self, local: &[u64]) -> Result<Vec<u64>, BspError> {
        let mut out = vec![0u64; local.len()];
        self.comm
            .all_reduce_into(local, &mut out[..], SystemOperation::sum());
        Ok(out)
    }

    fn all_reduce_max_u64(&self, local: &[u64]) -> Result<Vec<u64>, BspError> {
        let mut out = vec![0u64; local.len()];
        self.comm
            .all_reduce_into(local, &mut out[..], SystemOperation::max());
        Ok(out)
    }
}
