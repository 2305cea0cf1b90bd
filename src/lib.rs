#![cfg_attr(docsrs, feature(doc_cfg))]
//! # grape-bsp
//!
//! grape-bsp is a bulk-synchronous-parallel (BSP) runtime for vertex-centric
//! graph analytics over a partitioned graph. One process (or, in tests, one
//! thread) owns one fragment of the graph; algorithms are written as a
//! single `peval` followed by `inc_eval` rounds, and the runtime decides
//! globally when nothing is left to do.
//!
//! ## Features
//! - Per-thread message channels that batch outgoing messages per
//!   destination fragment and flush past a soft size threshold
//! - A message manager with a long-lived receive thread, a per-round send
//!   thread overlapping with the next round's computation, and a
//!   double-buffered receive ring keyed by round parity
//! - A cluster-wide termination vote with cooperative forced termination
//! - Pluggable communication backends: in-process ([`comm::LocalComm`]) and
//!   MPI (`mpi-support` feature)
//! - An in-memory edge-cut fragment and sample applications (BFS, SSSP,
//!   WCC, PageRank)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! grape-bsp = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! A query on one fragment:
//!
//! ```no_run
//! use grape_bsp::prelude::*;
//! use grape_bsp::apps::Bfs;
//!
//! # fn run(comm: LocalComm, frag: EdgecutFragment) -> Result<(), BspError> {
//! let mut worker = Worker::new(Bfs::new(), frag);
//! worker.init(&comm, &ParallelEngineSpec::default())?;
//! worker.query(0)?;
//! worker.output(&mut std::io::stdout())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Liveness
//!
//! Every fragment must take part in every round and in every termination
//! vote. There is no timeout: a fragment that stops voting stalls the whole
//! cluster, and failure of a process is left to external supervision.

pub mod apps;
pub mod archive;
pub mod bsp_error;
pub mod comm;
pub mod config;
pub mod debug_invariants;
pub mod fragment;
pub mod parallel;
pub mod worker;

pub use bsp_error::BspError;
pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::archive::{InArchive, OutArchive};
    pub use crate::bsp_error::BspError;
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::comm::{CommSpec, Communicator, LocalComm};
    pub use crate::config::{ChannelSpec, ParallelEngineSpec};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::fragment::{
        EdgeRecord, EdgecutFragment, Fid, Fragment, Gid, MessageStrategy, Oid, Vertex,
        VertexMap, VertexRange,
    };
    pub use crate::parallel::{
        ParallelEngine, ParallelMessageManager, TerminateInfo, ThreadLocalMessageBuffer,
    };
    pub use crate::worker::{App, AppContext, Worker};
}
