//! Contract between the superstep driver and an algorithm.

use std::io::Write;

use crate::bsp_error::BspError;
use crate::comm::Communicator;
use crate::config::ParallelEngineSpec;
use crate::fragment::{Fragment, MessageStrategy};
use crate::parallel::ParallelMessageManager;

/// Per-query state of an application.
pub trait AppContext<F: Fragment + ?Sized>: Send {
    /// Query arguments.
    type Args;

    fn init(frag: &F, args: Self::Args) -> Self
    where
        Self: Sized;

    /// Writes one line per inner vertex.
    fn output(&self, frag: &F, writer: &mut dyn Write) -> Result<(), BspError>;
}

/// A PIE algorithm: one `peval`, then `inc_eval` until the cluster agrees
/// nothing is left to do.
///
/// Incoming messages arrive in no particular order, so every update an
/// application applies to received data must be commutative or idempotent.
pub trait App<F: Fragment + ?Sized>: Send + Sync {
    type Context: AppContext<F>;

    /// Routing caches the fragment has to build before the first round.
    fn message_strategy(&self) -> MessageStrategy {
        MessageStrategy::default()
    }

    fn init_parallel_engine(&mut self, _spec: &ParallelEngineSpec) -> Result<(), BspError> {
        Ok(())
    }

    /// Runs once. Must call `messages.force_continue()` if more rounds are
    /// needed without having sent anything.
    fn peval<C: Communicator>(
        &self,
        frag: &F,
        ctx: &mut Self::Context,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError>;

    /// Runs every later round: drain this round's messages, update, send,
    /// and force continuation iff local changes are still unseen elsewhere.
    fn inc_eval<C: Communicator>(
        &self,
        frag: &F,
        ctx: &mut Self::Context,
        messages: &mut ParallelMessageManager<C>,
    ) -> Result<(), BspError>;
}
