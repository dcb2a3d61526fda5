//! Parallel throughput benchmark.
//!
//! Each of `parallelism` workers owns one connection and one OS thread, grows
//! its iteration count until a round lasts [`DEFAULT_TARGET`], and reports
//! per-op latency and allocations. [`AggregateReport`] folds the workers
//! together once all of them have finished.

pub mod alloc;
pub mod bencher;
pub mod harness;
pub mod report;
pub mod workload;

use std::num::NonZeroUsize;

use tracing::info;

pub use alloc::TrackingAllocator;
pub use bencher::{Bencher, DEFAULT_TARGET, measure};
pub use harness::{BenchError, Harness};
pub use report::{AggregateReport, WorkerResult};
pub use workload::BenchConnection;

use crate::client::ServerAddr;

/// Runs the `GET` workload against `addr` over `parallelism` connections.
///
/// Blocks the calling thread; it must not be called from inside a Tokio runtime.
pub fn run(addr: &ServerAddr, parallelism: NonZeroUsize) -> Result<AggregateReport, BenchError> {
    info!(%addr, parallelism, "starting benchmark");
    Harness::connect(parallelism, |_| BenchConnection::open(addr))?.run(workload::get_keys)
}
