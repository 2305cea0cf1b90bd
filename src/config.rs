//! Runtime configuration for the parallel engine and message channels.
//!
//! Both structs deserialize with `#[serde(default)]`, so a partial document
//! (or an empty one) yields the defaults for the missing fields.

use serde::{Deserialize, Serialize};

/// Default soft flush threshold of a channel bucket, in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 2 * 1023 * 64;
/// Default capacity a channel bucket is re-reserved to after a flush.
pub const DEFAULT_BLOCK_CAP: usize = 2 * 1024 * 64;

/// Thread configuration of the per-fragment compute pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelEngineSpec {
    /// Number of worker threads (and channels) per fragment.
    pub thread_num: usize,
}

impl Default for ParallelEngineSpec {
    fn default() -> Self {
        Self {
            thread_num: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl ParallelEngineSpec {
    pub fn with_threads(thread_num: usize) -> Self {
        Self {
            thread_num: thread_num.max(1),
        }
    }
}

/// Sizing of the thread-local message buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSpec {
    /// A bucket larger than this is flushed mid-round.
    pub block_size: usize,
    /// Capacity each bucket is reserved to after a flush.
    pub block_cap: usize,
}

impl Default for ChannelSpec {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_cap: DEFAULT_BLOCK_CAP,
        }
    }
}
