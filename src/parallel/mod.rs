//! Message staging, the BSP message manager and the compute pool.

pub mod blocking_queue;
pub mod engine;
pub mod message_buffer;
pub mod message_manager;
pub mod recv_ring;

pub use blocking_queue::BlockingQueue;
pub use engine::ParallelEngine;
pub use message_buffer::{Outbox, ThreadLocalMessageBuffer};
pub use message_manager::{ManagerState, ParallelMessageManager, RoundPhase, TerminateInfo};
pub use recv_ring::{RecvRing, SlotPhase};
