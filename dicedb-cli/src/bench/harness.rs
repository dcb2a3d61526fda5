use std::{num::NonZeroUsize, thread, time::Duration};

use crossbeam_channel::bounded;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    bencher::{Bencher, DEFAULT_TARGET, measure},
    report::{AggregateReport, WorkerResult},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("failed to open connection {index} of {parallelism}")]
    Connect {
        index: usize,
        parallelism: usize,
        #[source]
        source: BoxError,
    },
    #[error("failed to spawn benchmark worker {worker}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("benchmark worker {worker} failed")]
    Worker {
        worker: usize,
        #[source]
        source: BoxError,
    },
    #[error("benchmark worker {worker} panicked")]
    Panicked { worker: usize },
    #[error("benchmark produced no results")]
    NoResults,
}

/// Fans one workload out over a fixed set of connections and joins the results.
///
/// Every connection is opened before any worker starts, so an unreachable
/// server fails the run before work begins. A worker that fails mid-run
/// fails the whole run once all workers have stopped; partial reports are
/// never produced.
pub struct Harness<C> {
    connections: Vec<C>,
    target: Duration,
}

impl<C: Send> Harness<C> {
    pub fn connect<F>(parallelism: NonZeroUsize, mut connect: F) -> Result<Self, BenchError>
    where
        F: FnMut(usize) -> anyhow::Result<C>,
    {
        let parallelism = parallelism.get();
        let connections = (0..parallelism)
            .map(|index| {
                connect(index).map_err(|source| BenchError::Connect {
                    index,
                    parallelism,
                    source: source.into(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(parallelism, "benchmark connections ready");

        Ok(Self {
            connections,
            target: DEFAULT_TARGET,
        })
    }

    /// Minimum duration of the measured round in every worker.
    pub fn with_target(mut self, target: Duration) -> Self {
        self.target = target;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.connections.len()
    }

    pub fn run<W>(self, workload: W) -> Result<AggregateReport, BenchError>
    where
        W: Fn(&mut C, &mut Bencher) -> anyhow::Result<()> + Sync,
    {
        let Harness {
            connections,
            target,
        } = self;
        let parallelism = connections.len();
        let workload = &workload;
        let (results_tx, results_rx) = bounded(parallelism);

        let outcomes = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(parallelism);
            for (worker, mut connection) in connections.into_iter().enumerate() {
                let results_tx = results_tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("bench-worker-{worker}"))
                    .spawn_scoped(scope, move || {
                        let outcome =
                            measure(worker, target, |b| workload(&mut connection, b));
                        // The receiver outlives every worker inside this scope.
                        let _ = results_tx.send((worker, outcome));
                    })
                    .map_err(|source| BenchError::Spawn { worker, source })?;
                handles.push((worker, handle));
            }
            drop(results_tx);

            // Join barrier: wait for every worker before looking at any result.
            let mut panicked = None;
            for (worker, handle) in handles {
                if handle.join().is_err() {
                    warn!(worker, "benchmark worker panicked");
                    panicked.get_or_insert(worker);
                }
            }
            match panicked {
                Some(worker) => Err(BenchError::Panicked { worker }),
                None => Ok(results_rx.try_iter().collect::<Vec<_>>()),
            }
        })?;

        let mut results: Vec<WorkerResult> = Vec::with_capacity(parallelism);
        for (worker, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    info!(
                        worker,
                        ns_per_op = result.ns_per_op,
                        iterations = result.iterations,
                        "worker finished"
                    );
                    results.push(result);
                }
                Err(source) => {
                    return Err(BenchError::Worker {
                        worker,
                        source: source.into(),
                    });
                }
            }
        }

        AggregateReport::from_results(&results).ok_or(BenchError::NoResults)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn workers(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero")
    }

    #[test]
    fn runs_exactly_one_worker_per_connection() {
        let started = Arc::new(AtomicUsize::new(0));
        let harness = Harness::connect(workers(3), |index| Ok(index))
            .expect("connect")
            .with_target(Duration::ZERO);
        assert_eq!(harness.parallelism(), 3);

        let seen = Arc::clone(&started);
        let report = harness
            .run(move |_connection, b| {
                seen.fetch_add(1, Ordering::SeqCst);
                for _ in 0..b.iterations() {
                    std::hint::black_box(0u64);
                }
                Ok(())
            })
            .expect("run");

        assert_eq!(report.parallelism, 3);
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn workers_run_concurrently() {
        // Every worker blocks until all of them are running.
        let barrier = Barrier::new(4);
        let report = Harness::connect(workers(4), |_| Ok(()))
            .expect("connect")
            .with_target(Duration::ZERO)
            .run(|_, _| {
                barrier.wait();
                Ok(())
            })
            .expect("run");

        assert_eq!(report.parallelism, 4);
    }

    #[test]
    fn connection_failure_aborts_before_any_work() {
        let harness = Harness::<usize>::connect(workers(4), |index| {
            if index == 2 {
                anyhow::bail!("connection refused");
            }
            Ok(index)
        });

        match harness {
            Err(BenchError::Connect {
                index, parallelism, ..
            }) => {
                assert_eq!(index, 2);
                assert_eq!(parallelism, 4);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[test]
    fn mid_run_failure_fails_the_whole_run() {
        let result = Harness::connect(workers(3), |index| Ok(index))
            .expect("connect")
            .with_target(Duration::ZERO)
            .run(|connection, _| {
                if *connection == 1 {
                    anyhow::bail!("connection reset");
                }
                Ok(())
            });

        assert!(matches!(result, Err(BenchError::Worker { worker: 1, .. })));
    }

    #[test]
    fn panicking_worker_is_reported() {
        let result = Harness::connect(workers(2), |index| Ok(index))
            .expect("connect")
            .with_target(Duration::ZERO)
            .run(|connection, _| {
                if *connection == 0 {
                    panic!("boom");
                }
                Ok(())
            });

        assert!(matches!(result, Err(BenchError::Panicked { worker: 0 })));
    }

    #[test]
    fn each_worker_owns_its_connection() {
        let report = Harness::connect(workers(4), |index| Ok(vec![index]))
            .expect("connect")
            .with_target(Duration::ZERO)
            .run(|connection, _| {
                connection.push(connection[0]);
                assert_eq!(connection.len(), 2, "connection shared between workers");
                Ok(())
            })
            .expect("run");

        assert_eq!(report.parallelism, 4);
    }
}
