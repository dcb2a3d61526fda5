use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::trace;

use super::{alloc::AllocSnapshot, report::WorkerResult};

const MAX_ITERATIONS: u64 = 1_000_000_000;
const MAX_GROWTH: u64 = 100;

pub const DEFAULT_TARGET: Duration = Duration::from_secs(1);

/// Timer and iteration budget handed to a workload for one round.
///
/// The workload runs its operation `iterations()` times. Setup done before
/// the loop can be excluded with [`Bencher::reset_timer`].
#[derive(Debug)]
pub struct Bencher {
    iterations: u64,
    elapsed: Duration,
    allocs: AllocSnapshot,
    running_since: Option<(Instant, AllocSnapshot)>,
}

impl Bencher {
    fn new(iterations: u64) -> Self {
        Self {
            iterations,
            elapsed: Duration::ZERO,
            allocs: AllocSnapshot::default(),
            running_since: None,
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn start_timer(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some((Instant::now(), AllocSnapshot::current()));
        }
    }

    pub fn stop_timer(&mut self) {
        if let Some((started, allocs)) = self.running_since.take() {
            self.elapsed += started.elapsed();
            let delta = AllocSnapshot::current().since(allocs);
            self.allocs.count += delta.count;
            self.allocs.bytes += delta.bytes;
        }
    }

    /// Discards time and allocations measured so far.
    pub fn reset_timer(&mut self) {
        self.elapsed = Duration::ZERO;
        self.allocs = AllocSnapshot::default();
        if self.running_since.is_some() {
            self.running_since = Some((Instant::now(), AllocSnapshot::current()));
        }
    }

    fn round<F>(iterations: u64, workload: &mut F) -> Result<Self>
    where
        F: FnMut(&mut Bencher) -> Result<()>,
    {
        let mut bencher = Self::new(iterations);
        bencher.start_timer();
        workload(&mut bencher)?;
        bencher.stop_timer();
        Ok(bencher)
    }
}

/// Next iteration count: aim 20% past `target`, grow at most 100x, always by at least one.
fn predict(previous: u64, elapsed: Duration, target: Duration) -> u64 {
    let elapsed_ns = elapsed.as_nanos().max(1);
    let predicted = target.as_nanos().saturating_mul(u128::from(previous)) / elapsed_ns;
    let predicted = u64::try_from(predicted).unwrap_or(u64::MAX);
    predicted
        .saturating_add(predicted / 5)
        .min(previous.saturating_mul(MAX_GROWTH))
        .max(previous + 1)
        .min(MAX_ITERATIONS)
}

/// Runs `workload` with growing iteration counts until one round lasts `target`.
pub fn measure<F>(worker: usize, target: Duration, mut workload: F) -> Result<WorkerResult>
where
    F: FnMut(&mut Bencher) -> Result<()>,
{
    let mut bencher = Bencher::round(1, &mut workload)?;
    while bencher.elapsed < target && bencher.iterations < MAX_ITERATIONS {
        let next = predict(bencher.iterations, bencher.elapsed, target);
        trace!(worker, iterations = next, "growing benchmark round");
        bencher = Bencher::round(next, &mut workload)?;
    }

    Ok(WorkerResult::from_totals(
        worker,
        bencher.iterations,
        bencher.elapsed,
        bencher.allocs,
    ))
}
