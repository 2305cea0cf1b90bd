//! BspError: unified error type for grape-bsp public APIs
//!
//! Every fallible operation of the message manager, the worker and the
//! communication backends reports through this type. Application-level
//! failures are not errors of the core: they travel through
//! `ForceTerminate` and surface in [`TerminateInfo`](crate::parallel::message_manager::TerminateInfo).

use thiserror::Error;

/// Unified error type for grape-bsp operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BspError {
    /// Point-to-point communication with `peer` failed.
    #[error("communication with rank {peer} failed: {reason}")]
    CommError { peer: usize, reason: String },
    /// A collective (all-reduce, all-gather, barrier) failed.
    #[error("collective operation failed: {0}")]
    CollectiveFailed(String),
    /// An archive ran out of bytes while decoding a message.
    #[error("archive underflow: needed {needed} bytes, {remaining} remaining")]
    ArchiveUnderflow { needed: usize, remaining: usize },
    /// A received gid does not name any vertex of this fragment.
    #[error("gid {0:#x} does not resolve to a vertex of this fragment")]
    UnknownGid(u64),
    /// An operation was called in the wrong lifecycle state.
    #[error("`{op}` is not allowed while the message manager is {state}")]
    InvalidState { op: &'static str, state: &'static str },
    /// A background thread panicked.
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
    /// Building the worker thread pool failed.
    #[error("thread pool: {0}")]
    ThreadPool(String),
    /// MPI could not be initialized with the required threading level.
    #[error("MPI initialization failed: {0}")]
    MpiInit(String),
    /// Fragment count and communicator size disagree.
    #[error("fragment count mismatch: communicator has {expected} ranks, fragment reports {got}")]
    FragmentMismatch { expected: usize, got: usize },
    /// A send was attempted before `init_channels`.
    #[error("channels are not initialized; call init_channels first")]
    ChannelsNotInitialized,
    /// An application ran before `init_parallel_engine`.
    #[error("parallel engine is not initialized")]
    EngineNotInitialized,
    /// The worker was queried or read before it was ready.
    #[error("worker: {0}")]
    Worker(&'static str),
    /// Writing results failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BspError {
    fn from(e: std::io::Error) -> Self {
        BspError::Io(e.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for BspError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        BspError::ThreadPool(e.to_string())
    }
}
