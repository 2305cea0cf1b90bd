//! Superstep driver.

use std::io::Write;

use crate::bsp_error::BspError;
use crate::comm::Communicator;
use crate::config::ParallelEngineSpec;
use crate::fragment::Fragment;
use crate::parallel::{ParallelMessageManager, TerminateInfo};
use crate::worker::app::{App, AppContext};

/// Runs one application on one fragment.
///
/// The message manager is finalized at the end of [`query`](Self::query),
/// so a worker answers a single query.
pub struct Worker<A, F, C>
where
    A: App<F>,
    F: Fragment,
    C: Communicator,
{
    app: A,
    fragment: F,
    context: Option<A::Context>,
    messages: ParallelMessageManager<C>,
    rounds: u32,
}

impl<A, F, C> Worker<A, F, C>
where
    A: App<F>,
    F: Fragment,
    C: Communicator,
{
    pub fn new(app: A, fragment: F) -> Self {
        Self {
            app,
            fragment,
            context: None,
            messages: ParallelMessageManager::new(),
            rounds: 0,
        }
    }

    /// Prepares the fragment for the application's message strategy and
    /// brings up the message manager and the compute pool.
    pub fn init(&mut self, comm: &C, pe_spec: &ParallelEngineSpec) -> Result<(), BspError> {
        if self.fragment.fnum() != comm.size() {
            return Err(BspError::FragmentMismatch {
                expected: comm.size(),
                got: self.fragment.fnum(),
            });
        }
        self.fragment.prepare_to_run_app(self.app.message_strategy());
        self.messages.init(comm)?;
        self.app.init_parallel_engine(pe_spec)
    }

    /// One `peval`, then `inc_eval` rounds until the termination vote
    /// passes.
    pub fn query(&mut self, args: <A::Context as AppContext<F>>::Args) -> Result<(), BspError> {
        let frag = &self.fragment;
        let messages = &mut self.messages;
        let mut ctx = A::Context::init(frag, args);

        messages.start()?;
        messages.start_round()?;
        self.app.peval(frag, &mut ctx, messages)?;
        messages.finish_round()?;

        let mut rounds = 1;
        while !messages.to_terminate()? {
            messages.start_round()?;
            self.app.inc_eval(frag, &mut ctx, messages)?;
            messages.finish_round()?;
            rounds += 1;
        }
        messages.finalize()?;

        self.rounds = rounds;
        self.context = Some(ctx);
        let info = self.messages.terminate_info();
        if info.success {
            log::info!("fragment {}: query finished after {rounds} rounds", frag.fid());
        } else {
            log::error!("fragment {}: query aborted: {:?}", frag.fid(), info.info);
        }
        Ok(())
    }

    pub fn output(&self, writer: &mut dyn Write) -> Result<(), BspError> {
        let ctx = self
            .context
            .as_ref()
            .ok_or(BspError::Worker("output called before query"))?;
        ctx.output(&self.fragment, writer)
    }

    /// Cleanup lives in the message manager.
    pub fn finalize(&mut self) {}

    /// Supersteps executed by the last query, `peval` included.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn context(&self) -> Option<&A::Context> {
        self.context.as_ref()
    }

    pub fn terminate_info(&self) -> &TerminateInfo {
        self.messages.terminate_info()
    }

    pub fn fragment(&self) -> &F {
        &self.fragment
    }
}
