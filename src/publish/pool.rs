//! Concurrent publishing of batches.
//!
//! [`PublishWorkerPool`] runs a fixed number of workers against one shared,
//! unbounded queue of batches. Each worker connects its own store session
//! and loops until the queue is closed and empty:
//!
//! ```text
//!   producer ──► [ batch | batch | batch | ... ]  (unbounded queue)
//!                   │        │        │
//!                   ▼        ▼        ▼
//!               worker 0  worker 1  worker N-1
//!                   │ aggregate → create_results → correlate
//!                   ▼
//!           failure flag (mutex)  ◄── set by any failed batch
//! ```
//!
//! A batch that errors or panics is logged, sets the failure flag, and is
//! not retried. The worker carries on with the next batch. Batches publish
//! in no particular order relative to each other.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex as StdMutex, PoisonError};

use anyhow::Context;
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use super::{BatchOutcome, PublishContext, PublishLimits, RunTarget, StoreFactory, process_batch};
use crate::model::CanonicalResult;

/// Receiving end of the batch queue.
pub type BatchQueue = mpsc::UnboundedReceiver<Vec<CanonicalResult>>;

/// What one worker did over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub batches: usize,
    pub failed_batches: usize,
    pub results: usize,
    pub records: usize,
    pub rejected: usize,
    pub attachments_uploaded: usize,
    pub attachments_failed: usize,
}

impl WorkerReport {
    fn absorb(&mut self, outcome: &BatchOutcome) {
        self.results += outcome.results;
        self.records += outcome.records;
        self.rejected += outcome.rejected;
        self.attachments_uploaded += outcome.attachments_uploaded;
        self.attachments_failed += outcome.attachments_failed;
    }
}

/// Totals across all workers once the queue is drained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Whether any batch failed.
    pub failed: bool,
    pub workers: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub results: usize,
    pub records: usize,
    pub rejected: usize,
    pub attachments_uploaded: usize,
    pub attachments_failed: usize,
}

impl PoolReport {
    fn from_workers(failed: bool, workers: &[WorkerReport]) -> Self {
        workers.iter().fold(
            PoolReport {
                failed,
                workers: workers.len(),
                ..Default::default()
            },
            |mut total, w| {
                total.batches += w.batches;
                total.failed_batches += w.failed_batches;
                total.results += w.results;
                total.records += w.records;
                total.rejected += w.rejected;
                total.attachments_uploaded += w.attachments_uploaded;
                total.attachments_failed += w.attachments_failed;
                total
            },
        )
    }
}

/// A fixed-size pool of publishers draining one batch queue.
pub struct PublishWorkerPool<F: StoreFactory> {
    factory: F,
    target: RunTarget,
    workers: usize,
    limits: PublishLimits,
}

impl<F: StoreFactory> PublishWorkerPool<F> {
    /// Creates a pool of `workers` publishers (at least one).
    pub fn new(factory: F, target: RunTarget, workers: usize) -> Self {
        Self {
            factory,
            target,
            workers: workers.max(1),
            limits: PublishLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: PublishLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs every worker until `queue` is closed and empty.
    ///
    /// Returns only after all enqueued batches have been dequeued and
    /// processed. Requires a multi-threaded runtime.
    pub async fn run(&self, queue: BatchQueue) -> PoolReport {
        let queue = Mutex::new(queue);
        let failed = StdMutex::new(false);
        let mut reports = vec![WorkerReport::default(); self.workers];

        info!(
            "Publishing to {} with {} workers",
            self.target, self.workers
        );

        tokio_scoped::scope(|scope| {
            for (worker_id, slot) in reports.iter_mut().enumerate() {
                let queue = &queue;
                let failed = &failed;
                scope.spawn(async move {
                    *slot = self.work(worker_id, queue, failed).await;
                });
            }
        });

        let failed = *failed.lock().unwrap_or_else(PoisonError::into_inner);
        let report = PoolReport::from_workers(failed, &reports);
        info!(
            "Publishing complete: {} results in {} batches ({} failed)",
            report.results, report.batches, report.failed_batches
        );
        report
    }

    async fn work(
        &self,
        worker_id: usize,
        queue: &Mutex<BatchQueue>,
        failed: &StdMutex<bool>,
    ) -> WorkerReport {
        let mut report = WorkerReport::default();
        let mut ctx = PublishContext::new(self.limits);
        let mut store = match self.factory.connect().await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("Worker {} could not connect: {}", worker_id, e);
                None
            }
        };

        loop {
            let next = queue.lock().await.recv().await;
            let Some(batch) = next else {
                break;
            };
            report.batches += 1;

            let publish = self.publish(&mut store, &batch, &mut ctx);
            match AssertUnwindSafe(publish).catch_unwind().await {
                Ok(Ok(outcome)) => {
                    for event in &outcome.telemetry {
                        warn!("Worker {}: {}", worker_id, event);
                    }
                    report.absorb(&outcome);
                    info!(
                        "Worker {} uploaded {} results (running total {})",
                        worker_id,
                        outcome.results,
                        ctx.results_uploaded()
                    );
                }
                Ok(Err(e)) => {
                    error!(
                        "Worker {} failed to publish a batch of {} results: {:#}",
                        worker_id,
                        batch.len(),
                        e
                    );
                    report.failed_batches += 1;
                    mark_failed(failed);
                }
                Err(panic) => {
                    error!(
                        "Worker {} panicked publishing a batch of {} results: {}",
                        worker_id,
                        batch.len(),
                        panic_message(panic.as_ref())
                    );
                    report.failed_batches += 1;
                    mark_failed(failed);
                }
            }
        }

        report
    }

    async fn publish(
        &self,
        store: &mut Option<F::Store>,
        batch: &[CanonicalResult],
        ctx: &mut PublishContext,
    ) -> anyhow::Result<BatchOutcome> {
        if store.is_none() {
            *store = Some(
                self.factory
                    .connect()
                    .await
                    .context("Failed to connect to the test-run store")?,
            );
        }
        let Some(store) = store.as_ref() else {
            anyhow::bail!("No store session");
        };
        process_batch(store, &self.target, batch, ctx).await
    }
}

fn mark_failed(flag: &StdMutex<bool>) {
    *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::FakeStore;
    use super::*;
    use crate::format::Format;
    use crate::model::Outcome;

    fn target() -> RunTarget {
        RunTarget {
            project: "proj".to_string(),
            run_id: 3,
        }
    }

    fn queue_of(batches: Vec<Vec<CanonicalResult>>) -> BatchQueue {
        let (tx, rx) = mpsc::unbounded_channel();
        for batch in batches {
            tx.send(batch).unwrap();
        }
        rx
    }

    fn batch(names: &[&str]) -> Vec<CanonicalResult> {
        names
            .iter()
            .map(|n| CanonicalResult::new(*n, Format::XUnit, Outcome::Pass))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_all_batches_processed() {
        let store = FakeStore::new();
        let batches: Vec<_> = (0..25)
            .map(|i| batch(&[format!("T{}", i).as_str(), "Shared(1)"]))
            .collect();

        let pool = PublishWorkerPool::new(store.clone(), target(), 4);
        let report = pool.run(queue_of(batches)).await;

        assert!(!report.failed);
        assert_eq!(report.workers, 4);
        assert_eq!(report.batches, 25);
        assert_eq!(report.results, 50);
        assert_eq!(report.records, 50);
        let calls = store.calls();
        assert_eq!(calls.batches.len(), 25);
        assert_eq!(calls.connects, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_and_panicking_batches_are_isolated() {
        let store = FakeStore::new().fail_on("Boom").panic_on("Crash");
        let batches = vec![
            batch(&["A"]),
            batch(&["Boom"]),
            batch(&["B"]),
            batch(&["Crash"]),
            batch(&["C"]),
        ];

        let pool = PublishWorkerPool::new(store.clone(), target(), 2);
        let report = pool.run(queue_of(batches)).await;

        assert!(report.failed);
        assert_eq!(report.batches, 5);
        assert_eq!(report.failed_batches, 2);
        assert_eq!(report.results, 3);

        let mut published: Vec<_> = store
            .calls()
            .published
            .into_iter()
            .map(|r| r.automated_test_name)
            .collect();
        published.sort();
        assert_eq!(published, vec!["A", "B", "C"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_connect_failure_fails_every_batch() {
        let store = FakeStore::new().fail_connect();
        let pool = PublishWorkerPool::new(store.clone(), target(), 2);
        let report = pool.run(queue_of(vec![batch(&["A"]), batch(&["B"])])).await;

        assert!(report.failed);
        assert_eq!(report.batches, 2);
        assert_eq!(report.failed_batches, 2);
        assert!(store.calls().batches.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_queue() {
        let pool = PublishWorkerPool::new(FakeStore::new(), target(), 3);
        let report = pool.run(queue_of(Vec::new())).await;
        assert!(!report.failed);
        assert_eq!(report.batches, 0);
        assert_eq!(report.workers, 3);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let pool = PublishWorkerPool::new(FakeStore::new(), target(), 0);
        assert_eq!(pool.workers(), 1);
    }
}
