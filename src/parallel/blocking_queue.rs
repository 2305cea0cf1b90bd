//! Multi-producer, multi-consumer queue with a producer countdown.
//!
//! Consumers block in [`BlockingQueue::get`] until an item is available or
//! every registered producer has signed off, at which point the queue is
//! exhausted and `get` returns `None`. Items put before the last sign-off
//! are always observed before exhaustion.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    producers: usize,
}

#[derive(Debug)]
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    changed: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> BlockingQueue<T> {
    pub fn new(producers: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                producers,
            }),
            changed: Condvar::new(),
        }
    }

    /// Re-arms the countdown.
    pub fn set_producer_num(&self, producers: usize) {
        self.state.lock().producers = producers;
        self.changed.notify_all();
    }

    /// One producer signs off. Extra sign-offs are ignored.
    pub fn dec_producer_num(&self) {
        let mut st = self.state.lock();
        st.producers = st.producers.saturating_sub(1);
        if st.producers == 0 {
            self.changed.notify_all();
        }
    }

    pub fn producer_num(&self) -> usize {
        self.state.lock().producers
    }

    pub fn put(&self, item: T) {
        self.state.lock().items.push_back(item);
        self.changed.notify_one();
    }

    pub fn put_all(&self, items: impl IntoIterator<Item = T>) {
        self.state.lock().items.extend(items);
        self.changed.notify_all();
    }

    /// Blocks until an item is available (`Some`) or the queue is
    /// exhausted (`None`).
    pub fn get(&self) -> Option<T> {
        let mut st = self.state.lock();
        loop {
            if let Some(item) = st.items.pop_front() {
                return Some(item);
            }
            if st.producers == 0 {
                return None;
            }
            self.changed.wait(&mut st);
        }
    }

    /// Removes and returns every queued item.
    pub fn drain(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
