//! Sample applications built on the PEval/IncEval contract.

pub mod atomic;
pub mod bfs;
pub mod pagerank;
pub mod sssp;
pub mod vertex_set;
pub mod wcc;

pub use bfs::{Bfs, BfsContext};
pub use pagerank::{PageRank, PageRankContext};
pub use sssp::{Sssp, SsspContext};
pub use wcc::{Wcc, WccContext};

use crate::bsp_error::BspError;
use crate::config::{ChannelSpec, ParallelEngineSpec};
use crate::parallel::ParallelEngine;

/// Compute pool and channel sizing shared by the sample applications.
#[derive(Debug, Default)]
pub struct AppEngine {
    engine: Option<ParallelEngine>,
    channels: ChannelSpec,
}

impl AppEngine {
    pub fn with_channel_spec(channels: ChannelSpec) -> Self {
        Self {
            engine: None,
            channels,
        }
    }

    pub fn init(&mut self, spec: &ParallelEngineSpec) -> Result<(), BspError> {
        self.engine = Some(ParallelEngine::new(spec)?);
        Ok(())
    }

    pub fn get(&self) -> Result<&ParallelEngine, BspError> {
        self.engine.as_ref().ok_or(BspError::EngineNotInitialized)
    }

    pub fn channel_spec(&self) -> ChannelSpec {
        self.channels
    }
}
