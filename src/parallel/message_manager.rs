//! BSP coordinator: background I/O threads, round bracketing, termination
//! vote and message consumption.
//!
//! Lifecycle:
//!
//! ```text
//! Uninit --init--> Initialized --start--> Running --finalize--> Finalized
//!                                          | start_round / finish_round
//!                                          | to_terminate (collective)
//! ```
//!
//! Sends of round `r` are tagged [`round_tag(r)`](crate::comm::wire::round_tag)
//! and overlap with the computation of round `r + 1`: `finish_round` only
//! queues the flushed buffers, and the next `start_round` joins the send
//! thread before handing the received data to the application.
//!
//! While `Running`, rounds alternate between [`RoundPhase::Open`]
//! (`start_round` .. `finish_round`, when sending is allowed) and
//! [`RoundPhase::Closed`] (voting, `finalize`). Calls out of that order
//! fail with [`BspError::InvalidState`].
//!
//! Every fragment must call `to_terminate` exactly once per round, in
//! lockstep with the others; a fragment that stops voting stalls the whole
//! cluster.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use bytemuck::Pod;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::archive::{InArchive, OutArchive};
use crate::bsp_error::BspError;
use crate::comm::comm_spec::CommSpec;
use crate::comm::communicator::Communicator;
use crate::comm::wire::{TerminateVote, round_tag};
use crate::debug_invariants::DebugInvariants;
use crate::fragment::{Fid, Fragment, Vertex};
use crate::parallel::message_buffer::{Outbox, ThreadLocalMessageBuffer};
use crate::parallel::recv_ring::RecvRing;

/// Tag of the shutdown sentinel a manager sends to its own receive thread.
const SENTINEL_TAG: u32 = 0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ManagerState {
    Uninit,
    Initialized,
    Running,
    Finalized,
}

impl ManagerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ManagerState::Uninit => "uninitialized",
            ManagerState::Initialized => "initialized",
            ManagerState::Running => "running",
            ManagerState::Finalized => "finalized",
        }
    }
}

/// Whether a round is between `start_round` and `finish_round`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RoundPhase {
    Open,
    Closed,
}

impl RoundPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::Open => "running with a round open",
            RoundPhase::Closed => "running between rounds",
        }
    }
}

/// Outcome of the termination vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminateInfo {
    /// `false` once any fragment forced termination.
    pub success: bool,
    /// After a forced termination: one diagnostic per fragment, in fragment
    /// id order (empty for fragments that did not abort). Empty otherwise.
    pub info: Vec<String>,
}

impl Default for TerminateInfo {
    fn default() -> Self {
        Self {
            success: true,
            info: Vec::new(),
        }
    }
}

/// Background thread joined on drop.
#[derive(Debug)]
struct ScopedThread {
    name: &'static str,
    handle: Option<JoinHandle<Result<(), BspError>>>,
}

impl ScopedThread {
    fn spawn<F>(name: &'static str, fid: Fid, body: F) -> Result<Self, BspError>
    where
        F: FnOnce() -> Result<(), BspError> + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(format!("bsp-{name}-{fid}"))
            .spawn(body)
            .map_err(|e| BspError::ThreadPool(e.to_string()))?;
        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    fn join(mut self) -> Result<(), BspError> {
        match self.handle.take() {
            Some(h) => h.join().map_err(|_| BspError::ThreadPanicked(self.name))?,
            None => Ok(()),
        }
    }
}

impl Drop for ScopedThread {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Everything that exists between `init` and `finalize`.
struct Session<C> {
    comm: Arc<C>,
    spec: CommSpec,
    ring: Arc<RecvRing>,
    outbox: Arc<Outbox>,
}

pub struct ParallelMessageManager<C: Communicator> {
    state: ManagerState,
    phase: RoundPhase,
    session: Option<Session<C>>,
    channels: Vec<ThreadLocalMessageBuffer>,
    recv_thread: Option<ScopedThread>,
    send_thread: Option<ScopedThread>,
    round: u32,
    sent_size: usize,
    raw_sent: AtomicUsize,
    force_continue: AtomicBool,
    force_terminate: Mutex<Option<String>>,
    terminate_info: TerminateInfo,
}

impl<C: Communicator> Default for ParallelMessageManager<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Communicator> ParallelMessageManager<C> {
    pub fn new() -> Self {
        Self {
            state: ManagerState::Uninit,
            phase: RoundPhase::Closed,
            session: None,
            channels: Vec::new(),
            recv_thread: None,
            send_thread: None,
            round: 0,
            sent_size: 0,
            raw_sent: AtomicUsize::new(0),
            force_continue: AtomicBool::new(false),
            force_terminate: Mutex::new(None),
            terminate_info: TerminateInfo::default(),
        }
    }

    /// Duplicates `comm` and places one fragment per rank.
    pub fn init(&mut self, comm: &C) -> Result<(), BspError> {
        self.expect_state("init", ManagerState::Uninit)?;
        let dup = comm.duplicate()?;
        let spec = CommSpec::from_communicator(&dup);
        self.init_with_spec(dup, spec)
    }

    /// Takes ownership of an already duplicated communicator with a custom
    /// fragment placement.
    pub fn init_with_spec(&mut self, comm: C, spec: CommSpec) -> Result<(), BspError> {
        self.expect_state("init", ManagerState::Uninit)?;
        let fnum = spec.fnum();
        self.session = Some(Session {
            ring: Arc::new(RecvRing::new(fnum)),
            outbox: Arc::new(Outbox::new(spec.fid())),
            comm: Arc::new(comm),
            spec,
        });
        self.round = 0;
        self.phase = RoundPhase::Closed;
        self.sent_size = 0;
        self.raw_sent.store(0, Ordering::Relaxed);
        self.terminate_info = TerminateInfo::default();
        self.state = ManagerState::Initialized;
        Ok(())
    }

    /// Spawns the long-lived receive thread.
    pub fn start(&mut self) -> Result<(), BspError> {
        self.expect_state("start", ManagerState::Initialized)?;
        let session = self.session("start")?;
        let comm = Arc::clone(&session.comm);
        let ring = Arc::clone(&session.ring);
        let fid = session.spec.fid();
        self.recv_thread = Some(ScopedThread::spawn("recv", fid, move || {
            recv_loop(&*comm, &ring)
        })?);
        self.state = ManagerState::Running;
        log::info!("fragment {fid}: message manager started");
        Ok(())
    }

    /// Opens the current round: hands last round's data to the receive
    /// side and spawns the send thread for this round's traffic.
    pub fn start_round(&mut self) -> Result<(), BspError> {
        self.expect_phase("start_round", RoundPhase::Closed)?;
        // the first round of a session has no predecessor to hand over
        let resumed = self.send_thread.is_some();
        if resumed {
            self.wait_send()?;
        }
        let session = self.session("start_round")?;
        if resumed {
            session
                .ring
                .begin_drain(self.round, session.outbox.take_loopback());
        }
        let comm = Arc::clone(&session.comm);
        let spec = session.spec.clone();
        let outbox = Arc::clone(&session.outbox);
        let tag = round_tag(self.round);
        outbox.open_round();
        self.sent_size = 0;
        self.raw_sent.store(0, Ordering::Relaxed);
        for ch in &mut self.channels {
            ch.reset();
        }
        let send = ScopedThread::spawn("send", spec.fid(), {
            let outbox = Arc::clone(&outbox);
            move || send_loop(&*comm, &spec, &outbox, tag)
        });
        match send {
            Ok(t) => self.send_thread = Some(t),
            Err(e) => {
                outbox.close_round();
                return Err(e);
            }
        }
        self.phase = RoundPhase::Open;
        self.debug_assert_invariants();
        Ok(())
    }

    /// Closes the current round: flushes every channel, records the bytes
    /// sent and re-arms the drained receive slot.
    pub fn finish_round(&mut self) -> Result<(), BspError> {
        self.expect_phase("finish_round", RoundPhase::Open)?;
        let mut sent = self.raw_sent.load(Ordering::Acquire);
        for ch in &mut self.channels {
            ch.flush_messages();
            sent += ch.sent_msg_size();
        }
        self.sent_size = sent;
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| self.invalid("finish_round"))?;
        session.outbox.close_round();
        self.phase = RoundPhase::Closed;
        let leftovers = session.ring.finish_round(self.round);
        if leftovers > 0 {
            log::warn!(
                "fragment {}: {leftovers} message buffers of round {} were never consumed",
                session.spec.fid(),
                self.round
            );
        }
        log::debug!(
            "fragment {}: round {} sent {} bytes",
            session.spec.fid(),
            self.round,
            self.sent_size
        );
        self.round = self.round.wrapping_add(1);
        Ok(())
    }

    /// Collective termination vote. Returns `true` when no fragment sent a
    /// byte or forced continuation in the round just finished, or when any
    /// fragment forced termination.
    pub fn to_terminate(&mut self) -> Result<bool, BspError> {
        self.expect_phase("to_terminate", RoundPhase::Closed)?;
        let abort_info = self.force_terminate.lock().take();
        let active = self.sent_size > 0 || self.force_continue.swap(false, Ordering::AcqRel);
        let session = self.session("to_terminate")?;
        let local = TerminateVote::local(active, abort_info.is_some());
        let total = TerminateVote::from_words(&session.comm.all_reduce_sum_u64(&local.as_words())?);

        if total.abort > 0 {
            let mine = abort_info.unwrap_or_default();
            let gathered = session.comm.all_gather(mine.as_bytes())?;
            let info = (0..session.spec.fnum())
                .map(|fid| {
                    gathered
                        .get(session.spec.frag_to_worker(fid))
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>();
            log::error!(
                "fragment {}: {} fragment(s) forced termination: {:?}",
                session.spec.fid(),
                total.abort,
                info
            );
            self.terminate_info = TerminateInfo {
                success: false,
                info,
            };
            return Ok(true);
        }
        log::debug!(
            "fragment {}: vote after round {}: {} active",
            session.spec.fid(),
            self.round,
            total.active
        );
        Ok(total.active == 0)
    }

    /// Keeps the cluster running for one more round even if nothing was
    /// sent. Must be repeated every round it is needed.
    pub fn force_continue(&self) {
        self.force_continue.store(true, Ordering::Release);
    }

    /// Aborts the whole run at the next vote, reporting `info`.
    pub fn force_terminate(&self, info: impl Into<String>) {
        *self.force_terminate.lock() = Some(info.into());
    }

    /// Sets up `n` channels, re-initializing the ones already allocated.
    /// Anything still staged in a re-initialized channel is discarded.
    pub fn init_channels(
        &mut self,
        n: usize,
        block_size: usize,
        block_cap: usize,
    ) -> Result<(), BspError> {
        let session = self.session("init_channels")?;
        let fnum = session.spec.fnum();
        let outbox = Arc::clone(&session.outbox);
        self.channels.truncate(n);
        for ch in &mut self.channels {
            ch.init(fnum, Arc::clone(&outbox), block_size, block_cap);
        }
        let missing = n - self.channels.len();
        self.channels.extend(
            (0..missing)
                .map(|_| ThreadLocalMessageBuffer::new(fnum, Arc::clone(&outbox), block_size, block_cap)),
        );
        Ok(())
    }

    pub fn channels(&self) -> &[ThreadLocalMessageBuffer] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [ThreadLocalMessageBuffer] {
        &mut self.channels
    }

    pub fn thread_local_buffer(
        &mut self,
        tid: usize,
    ) -> Result<&mut ThreadLocalMessageBuffer, BspError> {
        self.channels
            .get_mut(tid)
            .ok_or(BspError::ChannelsNotInitialized)
    }

    /// Ships a ready-made archive to fragment `fid`, bypassing channels.
    pub fn send_raw_msg_by_fid(&self, fid: Fid, arc: InArchive) -> Result<(), BspError> {
        self.expect_phase("send_raw_msg_by_fid", RoundPhase::Open)?;
        let session = self.session("send_raw_msg_by_fid")?;
        self.raw_sent.fetch_add(arc.size(), Ordering::AcqRel);
        session.outbox.send_raw(fid, arc.freeze());
        Ok(())
    }

    /// Pops one received buffer of the current round, blocking until one
    /// arrives or every producer has signed off.
    pub fn get_messages(&self) -> Option<OutArchive> {
        let session = self.session.as_ref()?;
        match session.ring.draining(self.round) {
            Some(q) => q.get().map(OutArchive::new),
            None => {
                log::warn!(
                    "fragment {}: no messages to drain in round {}",
                    session.spec.fid(),
                    self.round
                );
                None
            }
        }
    }

    /// Drains the current round on `thread_num` threads, handing each
    /// buffer to `func(tid, archive)`. Returns the first error any thread
    /// reported; the other threads still drain to the end.
    pub fn drain_parallel(
        &self,
        thread_num: usize,
        func: &(dyn Fn(usize, OutArchive) -> Result<(), BspError> + Sync),
    ) -> Result<(), BspError> {
        let Some(session) = self.session.as_ref() else {
            return Err(self.invalid("drain_parallel"));
        };
        let Some(queue) = session.ring.draining(self.round) else {
            log::warn!(
                "fragment {}: no messages to drain in round {}",
                session.spec.fid(),
                self.round
            );
            return Ok(());
        };
        std::thread::scope(|s| {
            let workers: Vec<_> = (0..thread_num.max(1))
                .map(|tid| {
                    s.spawn(move || -> Result<(), BspError> {
                        let mut first_err = None;
                        while let Some(buf) = queue.get() {
                            if let Err(e) = func(tid, OutArchive::new(buf)) {
                                first_err.get_or_insert(e);
                            }
                        }
                        first_err.map_or(Ok(()), Err)
                    })
                })
                .collect();
            workers.into_iter().try_fold((), |(), w| {
                w.join().map_err(|_| BspError::ThreadPanicked("message processing"))?
            })
        })
    }

    /// Decodes `(gid, M)` pairs and calls `func(tid, vertex, msg)`.
    pub fn parallel_process<F, M, Func>(
        &self,
        thread_num: usize,
        frag: &F,
        func: Func,
    ) -> Result<(), BspError>
    where
        F: Fragment + ?Sized,
        M: Pod,
        Func: Fn(usize, Vertex, M) + Sync,
    {
        self.drain_parallel(thread_num, &|tid: usize, mut arc: OutArchive| -> Result<(), BspError> {
            while !arc.is_empty() {
                let gid: u64 = arc.pop()?;
                let msg: M = arc.pop()?;
                let v = frag.gid_to_vertex(gid).ok_or(BspError::UnknownGid(gid))?;
                func(tid, v, msg);
            }
            Ok(())
        })
    }

    /// Decodes bare `M` values and calls `func(tid, msg)`.
    pub fn parallel_process_plain<M, Func>(&self, thread_num: usize, func: Func) -> Result<(), BspError>
    where
        M: Pod,
        Func: Fn(usize, M) + Sync,
    {
        const { assert!(std::mem::size_of::<M>() > 0, "bare messages cannot be zero-sized") };
        self.drain_parallel(thread_num, &|tid: usize, mut arc: OutArchive| -> Result<(), BspError> {
            while !arc.is_empty() {
                func(tid, arc.pop::<M>()?);
            }
            Ok(())
        })
    }

    /// Cluster-wide sum; collective.
    pub fn aggregate_sum_f64(&self, value: f64) -> Result<f64, BspError> {
        let session = self.session("aggregate_sum_f64")?;
        Ok(session.comm.all_reduce_sum_f64(&[value])?[0])
    }

    pub fn aggregate_sum_u64(&self, value: u64) -> Result<u64, BspError> {
        let session = self.session("aggregate_sum_u64")?;
        Ok(session.comm.all_reduce_sum_u64(&[value])?[0])
    }

    pub fn aggregate_max_u64(&self, value: u64) -> Result<u64, BspError> {
        let session = self.session("aggregate_max_u64")?;
        Ok(session.comm.all_reduce_max_u64(&[value])?[0])
    }

    /// Joins both background threads and releases the communicator.
    /// Collective when running.
    pub fn finalize(&mut self) -> Result<(), BspError> {
        match self.state {
            ManagerState::Running => self.expect_phase("finalize", RoundPhase::Closed)?,
            ManagerState::Initialized => {
                self.release();
                return Ok(());
            }
            _ => return Err(self.invalid("finalize")),
        }
        let sent = self.wait_send();
        let session = self.session("finalize")?;
        let comm = Arc::clone(&session.comm);
        let fid = session.spec.fid();
        let barrier = comm.barrier();
        let sentinel = comm.send(comm.rank(), SENTINEL_TAG, Bytes::new());
        let received = match (&sentinel, self.recv_thread.take()) {
            (Ok(()), Some(t)) => t.join(),
            // without a sentinel the receive thread never returns
            (Err(_), Some(t)) => {
                std::mem::forget(t);
                Ok(())
            }
            (_, None) => Ok(()),
        };
        self.release();
        log::info!("fragment {fid}: message manager finalized after {} rounds", self.round);
        sent.and(barrier).and(sentinel).and(received)
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn round_phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn fid(&self) -> Option<Fid> {
        self.session.as_ref().map(|s| s.spec.fid())
    }

    pub fn fnum(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.spec.fnum())
    }

    pub fn comm_spec(&self) -> Option<&CommSpec> {
        self.session.as_ref().map(|s| &s.spec)
    }

    /// Bytes sent in the last finished round.
    pub fn sent_size(&self) -> usize {
        self.sent_size
    }

    pub fn terminate_info(&self) -> &TerminateInfo {
        &self.terminate_info
    }

    fn wait_send(&mut self) -> Result<(), BspError> {
        match self.send_thread.take() {
            Some(t) => t.join(),
            None => Ok(()),
        }
    }

    fn release(&mut self) {
        self.phase = RoundPhase::Closed;
        self.channels.clear();
        self.session = None;
        self.state = ManagerState::Finalized;
    }

    fn session(&self, op: &'static str) -> Result<&Session<C>, BspError> {
        self.session.as_ref().ok_or_else(|| self.invalid(op))
    }

    fn expect_state(&self, op: &'static str, want: ManagerState) -> Result<(), BspError> {
        if self.state == want {
            Ok(())
        } else {
            Err(self.invalid(op))
        }
    }

    /// `Running` and in round phase `want`.
    fn expect_phase(&self, op: &'static str, want: RoundPhase) -> Result<(), BspError> {
        self.expect_state(op, ManagerState::Running)?;
        if self.phase == want {
            Ok(())
        } else {
            Err(BspError::InvalidState {
                op,
                state: self.phase.as_str(),
            })
        }
    }

    fn invalid(&self, op: &'static str) -> BspError {
        BspError::InvalidState {
            op,
            state: self.state.as_str(),
        }
    }
}

impl<C: Communicator> DebugInvariants for ParallelMessageManager<C> {
    const NAME: &'static str = "ParallelMessageManager";

    fn validate_invariants(&self) -> Result<(), BspError> {
        if self.phase == RoundPhase::Open
            && (self.state != ManagerState::Running || self.send_thread.is_none())
        {
            return Err(BspError::InvalidState {
                op: "round bracket",
                state: "round open without a running send thread",
            });
        }
        if self.state == ManagerState::Running && self.recv_thread.is_none() {
            return Err(BspError::InvalidState {
                op: "start",
                state: "running without a receive thread",
            });
        }
        Ok(())
    }
}

impl<C: Communicator> Drop for ParallelMessageManager<C> {
    fn drop(&mut self) {
        if self.state != ManagerState::Running {
            return;
        }
        if let Some(session) = self.session.as_ref() {
            if self.phase == RoundPhase::Open {
                session.outbox.close_round();
            }
            let _ = self.send_thread.take().map(ScopedThread::join);
            let comm = &session.comm;
            if comm.send(comm.rank(), SENTINEL_TAG, Bytes::new()).is_ok() {
                let _ = self.recv_thread.take().map(ScopedThread::join);
            } else if let Some(t) = self.recv_thread.take() {
                std::mem::forget(t);
            }
        }
        self.release();
    }
}

fn recv_loop<C: Communicator + ?Sized>(comm: &C, ring: &RecvRing) -> Result<(), BspError> {
    let me = comm.rank();
    loop {
        let env = match comm.recv_any() {
            Ok(env) => env,
            Err(e) => {
                log::error!("rank {me}: receive failed: {e}");
                ring.close();
                return Err(e);
            }
        };
        if env.payload.is_empty() {
            if env.source == me {
                return Ok(());
            }
            ring.end_of_round(env.tag);
        } else {
            log::trace!(
                "rank {me}: {} bytes from rank {} tag {}",
                env.payload.len(),
                env.source,
                env.tag
            );
            ring.deliver(env.tag, env.payload);
        }
    }
}

fn send_loop<C: Communicator + ?Sized>(
    comm: &C,
    spec: &CommSpec,
    outbox: &Outbox,
    tag: u32,
) -> Result<(), BspError> {
    while let Some((fid, payload)) = outbox.next_outgoing() {
        comm.send(spec.frag_to_worker(fid), tag, payload)?;
    }
    for fid in (0..spec.fnum()).filter(|&f| f != spec.fid()) {
        comm.send(spec.frag_to_worker(fid), tag, Bytes::new())?;
    }
    Ok(())
}
