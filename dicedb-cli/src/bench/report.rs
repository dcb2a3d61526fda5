//! Per-worker measurements and their aggregate.

use std::{fmt, time::Duration};

use serde::Serialize;

use super::alloc::AllocSnapshot;

const NANOS_PER_SEC: f64 = 1e9;

/// What one worker measured over its final round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerResult {
    pub worker: usize,
    pub iterations: u64,
    pub ns_per_op: f64,
    pub allocs_per_op: u64,
    pub bytes_per_op: u64,
    /// Operations per second, the inverse of `ns_per_op`.
    pub throughput: f64,
}

impl WorkerResult {
    pub fn new(worker: usize, ns_per_op: f64, allocs_per_op: u64, bytes_per_op: u64) -> Self {
        let throughput = if ns_per_op > 0.0 {
            NANOS_PER_SEC / ns_per_op
        } else {
            0.0
        };
        Self {
            worker,
            iterations: 0,
            ns_per_op,
            allocs_per_op,
            bytes_per_op,
            throughput,
        }
    }

    pub fn from_totals(
        worker: usize,
        iterations: u64,
        elapsed: Duration,
        allocs: AllocSnapshot,
    ) -> Self {
        let per_op = iterations.max(1);
        let mut result = Self::new(
            worker,
            elapsed.as_nanos() as f64 / per_op as f64,
            allocs.count / per_op,
            allocs.bytes / per_op,
        );
        result.iterations = iterations;
        result
    }
}

/// Means of every per-worker metric, except throughput which is summed:
/// independent connections add up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub parallelism: usize,
    pub ns_per_op: f64,
    pub allocs_per_op: u64,
    pub bytes_per_op: u64,
    pub throughput: f64,
}

impl AggregateReport {
    /// Reduces in worker order, so the report does not depend on which worker finished first.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_results(results: &[WorkerResult]) -> Option<Self> {
        if results.is_empty() {
            return None;
        }

        let mut ordered: Vec<&WorkerResult> = results.iter().collect();
        ordered.sort_by_key(|result| result.worker);

        let workers = ordered.len();
        let total_ns: f64 = ordered.iter().map(|result| result.ns_per_op).sum();
        let total_allocs: u64 = ordered.iter().map(|result| result.allocs_per_op).sum();
        let total_bytes: u64 = ordered.iter().map(|result| result.bytes_per_op).sum();
        let throughput: f64 = ordered.iter().map(|result| result.throughput).sum();

        Some(Self {
            parallelism: workers,
            ns_per_op: total_ns / workers as f64,
            allocs_per_op: total_allocs / workers as u64,
            bytes_per_op: total_bytes / workers as u64,
            throughput,
        })
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "parallelism: {}", self.parallelism)?;
        writeln!(f, "avg ns/op: {:.2}", self.ns_per_op)?;
        writeln!(f, "avg allocs/op: {}", self.allocs_per_op)?;
        writeln!(f, "avg bytes/op: {}", self.bytes_per_op)?;
        write!(f, "total throughput: {:.2} ops/sec", self.throughput)
    }
}
