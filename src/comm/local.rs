//! In-process backend: every rank of the cluster is a thread of this
//! process.
//!
//! Mailboxes live in a shared fabric keyed by `(context, rank)`, so a
//! duplicated communicator never sees traffic of its parent. Delivery per
//! `(source, destination, context)` is FIFO, and a send completes as soon as
//! the payload sits in the destination mailbox.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::bsp_error::BspError;
use crate::comm::communicator::{Communicator, Envelope};

type ContextId = u64;

const WORLD_CONTEXT: ContextId = 0;

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    ready: Condvar,
}

struct GatherState {
    generation: u64,
    arrived: usize,
    slots: Vec<Option<Vec<u8>>>,
    result: Arc<Vec<Vec<u8>>>,
}

struct Rendezvous {
    state: Mutex<GatherState>,
    done: Condvar,
}

impl Rendezvous {
    fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(GatherState {
                generation: 0,
                arrived: 0,
                slots: vec![None; size],
                result: Arc::new(Vec::new()),
            }),
            done: Condvar::new(),
        }
    }
}

struct Fabric {
    size: usize,
    mailboxes: DashMap<(ContextId, usize), Arc<Mailbox>>,
    gathers: DashMap<ContextId, Arc<Rendezvous>>,
    contexts: DashMap<(ContextId, u64), ContextId>,
    next_context: AtomicU64,
}

impl Fabric {
    fn mailbox(&self, context: ContextId, rank: usize) -> Arc<Mailbox> {
        Arc::clone(&*self.mailboxes.entry((context, rank)).or_default())
    }

    fn rendezvous(&self, context: ContextId) -> Arc<Rendezvous> {
        Arc::clone(
            &*self
                .gathers
                .entry(context)
                .or_insert_with(|| Arc::new(Rendezvous::new(self.size))),
        )
    }
}

/// One rank's handle on an in-process cluster.
pub struct LocalComm {
    fabric: Arc<Fabric>,
    rank: usize,
    context: ContextId,
    dup_count: AtomicU64,
}

impl LocalComm {
    /// Creates a cluster of `size` ranks; element `i` is rank `i`'s handle.
    pub fn cluster(size: usize) -> Vec<LocalComm> {
        let fabric = Arc::new(Fabric {
            size,
            mailboxes: DashMap::new(),
            gathers: DashMap::new(),
            contexts: DashMap::new(),
            next_context: AtomicU64::new(WORLD_CONTEXT + 1),
        });
        (0..size)
            .map(|rank| LocalComm {
                fabric: Arc::clone(&fabric),
                rank,
                context: WORLD_CONTEXT,
                dup_count: AtomicU64::new(0),
            })
            .collect()
    }

    fn check_peer(&self, peer: usize) -> Result<(), BspError> {
        if peer < self.fabric.size {
            Ok(())
        } else {
            Err(BspError::CommError {
                peer,
                reason: format!("rank out of range (cluster size {})", self.fabric.size),
            })
        }
    }
}

impl fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.fabric.size)
            .field("context", &self.context)
            .finish()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.fabric.size
    }

    fn duplicate(&self) -> Result<Self, BspError> {
        let k = self.dup_count.fetch_add(1, Ordering::Relaxed);
        let context = *self
            .fabric
            .contexts
            .entry((self.context, k))
            .or_insert_with(|| self.fabric.next_context.fetch_add(1, Ordering::Relaxed));
        Ok(LocalComm {
            fabric: Arc::clone(&self.fabric),
            rank: self.rank,
            context,
            dup_count: AtomicU64::new(0),
        })
    }

    fn send(&self, peer: usize, tag: u32, payload: Bytes) -> Result<(), BspError> {
        self.check_peer(peer)?;
        let mailbox = self.fabric.mailbox(self.context, peer);
        mailbox.queue.lock().push_back(Envelope {
            source: self.rank,
            tag,
            payload,
        });
        mailbox.ready.notify_all();
        Ok(())
    }

    fn recv_any(&self) -> Result<Envelope, BspError> {
        let mailbox = self.fabric.mailbox(self.context, self.rank);
        let mut queue = mailbox.queue.lock();
        loop {
            if let Some(env) = queue.pop_front() {
                return Ok(env);
            }
            mailbox.ready.wait(&mut queue);
        }
    }

    fn all_gather(&self, local: &[u8]) -> Result<Vec<Vec<u8>>, BspError> {
        let rv = self.fabric.rendezvous(self.context);
        let mut st = rv.state.lock();
        if st.slots[self.rank].is_some() {
            return Err(BspError::CollectiveFailed(format!(
                "rank {} entered the same collective twice",
                self.rank
            )));
        }
        let generation = st.generation;
        st.slots[self.rank] = Some(local.to_vec());
        st.arrived += 1;
        if st.arrived == self.fabric.size {
            let gathered: Vec<Vec<u8>> = st
                .slots
                .iter_mut()
                .map(|s| s.take().unwrap_or_default())
                .collect();
            st.result = Arc::new(gathered);
            st.arrived = 0;
            st.generation += 1;
            rv.done.notify_all();
        } else {
            while st.generation == generation {
                rv.done.wait(&mut st);
            }
        }
        Ok(st.result.as_ref().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fifo_per_pair() {
        let comms = LocalComm::cluster(2);
        for i in 0..10u8 {
            comms[0].send(1, 3, Bytes::from(vec![i])).unwrap();
        }
        let got: Vec<u8> = (0..10)
            .map(|_| comms[1].recv_any().unwrap().payload[0])
            .collect();
        assert_eq!(got, (0u8..10).collect::<Vec<_>>());
    }

    #[test]
    fn duplicate_isolates_traffic() {
        let comms = LocalComm::cluster(2);
        let dup0 = comms[0].duplicate().unwrap();
        let dup1 = comms[1].duplicate().unwrap();

        comms[0].send(1, 1, Bytes::from_static(b"world")).unwrap();
        dup0.send(1, 1, Bytes::from_static(b"dup")).unwrap();

        let env = dup1.recv_any().unwrap();
        assert_eq!(&env.payload[..], b"dup");
        assert_eq!(env.source, 0);
        let env = comms[1].recv_any().unwrap();
        assert_eq!(&env.payload[..], b"world");
    }

    #[test]
    fn out_of_range_peer_is_an_error() {
        let comms = LocalComm::cluster(1);
        assert!(matches!(
            comms[0].send(3, 0, Bytes::new()),
            Err(BspError::CommError { peer: 3, .. })
        ));
    }

    #[test]
    fn collectives_agree_across_threads() {
        let comms = LocalComm::cluster(4);
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let r = c.rank() as u64;
                        let sum = c.all_reduce_sum_u64(&[r, 1]).unwrap();
                        let max = c.all_reduce_max_u64(&[r * 10]).unwrap();
                        let fsum = c.all_reduce_sum_f64(&[0.5]).unwrap();
                        c.barrier().unwrap();
                        let names = c.all_gather(format!("r{r}").as_bytes()).unwrap();
                        (sum, max, fsum, names)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (sum, max, fsum, names) in results {
            assert_eq!(sum, vec![6, 4]);
            assert_eq!(max, vec![30]);
            assert_eq!(fsum, vec![2.0]);
            let names: Vec<String> = names
                .into_iter()
                .map(|b| String::from_utf8(b).unwrap())
                .collect();
            assert_eq!(names, vec!["r0", "r1", "r2", "r3"]);
        }
    }
}
