//! The tick-driven side of the engine: payload fetching, the scheduler loop
//! that drives the evaluation core once per tick, and bootstrap/shutdown.
//! Everything here is async; the synchronous evaluation itself lives in
//! `cira-core`.

#[macro_use]
mod log_macros;

pub mod error;
pub mod fetcher;
pub mod lifecycle;
pub mod scheduler;
pub mod tracing_init;

pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
