//! Bounded worker pool.
//!
//! A fixed number of workers drain a bounded job queue. Handlers may push
//! follow-up jobs while they run; the pool finishes once the queue is empty
//! and no job is in flight, at which point every worker is stopped.
//!
//! Handlers report failures through their own state rather than a return
//! value, so one failing job never stops the others. A panicking handler
//! does not take its worker down; the panic is counted and reported once
//! the queue has drained.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt as _;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, trace};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Processes jobs taken from the queue.
#[async_trait]
pub trait JobHandler<J: Send + 'static>: Send + Sync {
    /// Handles one job. Follow-up work goes through `queue`.
    async fn handle(&self, job: J, queue: &JobQueue<J>);
}

/// Handle for adding jobs to a running pool.
#[derive(Debug)]
pub struct JobQueue<J> {
    tx: mpsc::Sender<J>,
    outstanding: Arc<watch::Sender<usize>>,
}

impl<J> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            outstanding: Arc::clone(&self.outstanding),
        }
    }
}

impl<J: Send + 'static> JobQueue<J> {
    /// Adds a job.
    ///
    /// Never blocks. When the queue is full the job is handed to a task
    /// that waits for room, and it still counts as outstanding.
    pub fn push(&self, job: J) {
        self.begin();
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                trace!("job queue full, deferring push");
                let queue = self.clone();
                tokio::spawn(async move {
                    if queue.tx.send(job).await.is_err() {
                        queue.finish();
                    }
                });
            }
            Err(TrySendError::Closed(_)) => self.finish(),
        }
    }

    /// Number of jobs queued or in flight.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    fn begin(&self) {
        self.outstanding.send_modify(|count| *count += 1);
    }

    fn finish(&self) {
        self.outstanding
            .send_modify(|count| *count = count.saturating_sub(1));
    }

    async fn wait_idle(&self) {
        let mut rx = self.outstanding.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

/// Marks a job finished even if its handler panics.
struct Finished<'a, J: Send + 'static>(&'a JobQueue<J>);

impl<J: Send + 'static> Drop for Finished<'_, J> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Runs jobs on a fixed number of workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Creates a pool. Zero workers or capacity is raised to one.
    #[must_use]
    pub fn new(workers: usize, capacity: usize) -> Self {
        Self {
            workers: workers.max(1),
            capacity: capacity.max(1),
        }
    }

    /// Creates a pool sized by `config`.
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.workers, config.queue_capacity)
    }

    /// Number of workers.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Seeds the queue with `populate` and runs until every job, including
    /// jobs pushed by handlers, has finished.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler or worker panicked. Every other job
    /// still runs.
    pub async fn run<J, H, P>(&self, handler: Arc<H>, populate: P) -> Result<()>
    where
        J: Send + 'static,
        H: JobHandler<J> + 'static,
        P: FnOnce(&JobQueue<J>),
    {
        let (tx, rx) = mpsc::channel(self.capacity);
        let rx = Arc::new(Mutex::new(rx));
        let (stop_tx, stop_rx) = watch::channel(false);
        let panicked = Arc::new(AtomicUsize::new(0));
        let queue = JobQueue {
            tx,
            outstanding: Arc::new(watch::channel(0).0),
        };

        let handles: Vec<_> = (0..self.workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let queue = queue.clone();
                let handler = Arc::clone(&handler);
                let panicked = Arc::clone(&panicked);
                let mut stop = stop_rx.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                job = rx.recv() => job,
                                _ = stop.wait_for(|stopped| *stopped) => None,
                            }
                        };
                        let Some(job) = job else { break };
                        let _finished = Finished(&queue);
                        let handled = AssertUnwindSafe(handler.handle(job, &queue))
                            .catch_unwind()
                            .await;
                        if handled.is_err() {
                            error!(worker, "job handler panicked");
                            panicked.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    trace!(worker, "worker stopped");
                })
            })
            .collect();

        // Hold the count above zero while seeding so no worker sees an idle
        // queue before the last seed job lands.
        queue.begin();
        populate(&queue);
        queue.finish();

        queue.wait_idle().await;
        let _ = stop_tx.send(true);

        let results = join_all(handles).await;
        debug!(workers = self.workers, "worker pool drained");
        for result in results {
            result?;
        }
        match panicked.load(Ordering::SeqCst) {
            0 => Ok(()),
            count => Err(SyncError::HandlerPanicked { count }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        handled: AtomicUsize,
        max_depth: usize,
    }

    #[async_trait]
    impl JobHandler<usize> for Counter {
        async fn handle(&self, depth: usize, queue: &JobQueue<usize>) {
            self.handled.fetch_add(1, Ordering::SeqCst);
            if depth < self.max_depth {
                queue.push(depth + 1);
                queue.push(depth + 1);
            }
        }
    }

    #[tokio::test]
    async fn test_runs_seed_jobs() {
        let handler = Arc::new(Counter {
            handled: AtomicUsize::new(0),
            max_depth: 0,
        });
        WorkerPool::new(4, 2)
            .run(Arc::clone(&handler), |queue| {
                for _ in 0..50 {
                    queue.push(0);
                }
            })
            .await
            .unwrap();
        assert_eq!(handler.handled.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_follow_up_jobs_are_drained() {
        let handler = Arc::new(Counter {
            handled: AtomicUsize::new(0),
            max_depth: 6,
        });
        WorkerPool::new(3, 4)
            .run(Arc::clone(&handler), |queue| queue.push(0))
            .await
            .unwrap();
        // A full binary tree of depth 6.
        assert_eq!(handler.handled.load(Ordering::SeqCst), 127);
    }

    #[tokio::test]
    async fn test_empty_seed_returns() {
        let handler = Arc::new(Counter {
            handled: AtomicUsize::new(0),
            max_depth: 0,
        });
        WorkerPool::new(2, 1)
            .run(Arc::clone(&handler), |_queue: &JobQueue<usize>| {})
            .await
            .unwrap();
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);
    }

    struct Panics;

    #[async_trait]
    impl JobHandler<u8> for Panics {
        async fn handle(&self, job: u8, _queue: &JobQueue<u8>) {
            assert!(job != 3, "bad job");
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_reports_error() {
        let result = WorkerPool::new(2, 8)
            .run(Arc::new(Panics), |queue| {
                for job in 0..6 {
                    queue.push(job);
                }
            })
            .await;
        assert!(result.is_err());
    }

    struct PanicsFirst {
        handled: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler<u8> for PanicsFirst {
        async fn handle(&self, job: u8, _queue: &JobQueue<u8>) {
            assert!(job != 0, "first job fails");
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_single_worker_survives_panic() {
        let handler = Arc::new(PanicsFirst {
            handled: AtomicUsize::new(0),
        });
        let pool = WorkerPool::new(1, 8);
        let run = pool.run(Arc::clone(&handler), |queue| {
            for job in 0..4 {
                queue.push(job);
            }
        });
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), run)
            .await
            .expect("pool drains after a panic");
        assert!(matches!(result, Err(SyncError::HandlerPanicked { count: 1 })));
        assert_eq!(handler.handled.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_workers_clamped() {
        let pool = WorkerPool::new(0, 0);
        assert_eq!(pool.workers(), 1);
    }
}
