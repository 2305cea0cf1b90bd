//! The PEval/IncEval application contract and the worker that drives it.

pub mod app;
#[allow(clippy::module_inception)]
pub mod worker;

pub use app::{App, AppContext};
pub use worker::Worker;
