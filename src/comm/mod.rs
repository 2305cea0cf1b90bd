//! Inter-fragment communication: the communicator seam, its backends, the
//! cluster topology and the wire conventions of the superstep protocol.

pub mod comm_spec;
pub mod communicator;
pub mod local;
#[cfg(feature = "mpi-support")]
pub mod mpi_backend;
pub mod wire;

pub use comm_spec::CommSpec;
pub use communicator::{Communicator, Envelope};
pub use local::LocalComm;
#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
