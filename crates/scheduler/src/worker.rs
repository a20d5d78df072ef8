//! Decode worker pool.
//!
//! Workers block on the [`DecodeQueue`], run each job through the executor
//! callback, and exit once the pool is shut down or the queue is closed.

use crate::{DecodeJob, DecodeQueue};
use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound on the default worker count. Decoding is memory-heavy, so a
/// large machine should not fan out to dozens of page rasters at once.
const MAX_DEFAULT_WORKERS: usize = 4;

/// Callback invoked by a worker for each job it pops.
pub type JobExecutor = Arc<dyn Fn(&DecodeJob) + Send + Sync>;

/// Configuration for the decode worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: available parallelism, capped at 4.
    pub num_workers: usize,

    /// Maximum time a worker waits for a job before checking shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(default_workers())
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// A fixed set of named decode threads sharing one queue.
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
    queue: Arc<DecodeQueue>,
}

impl WorkerPool {
    /// Spawn the workers.
    ///
    /// Fails if the OS refuses to create a thread; workers spawned before
    /// the failure are stopped again.
    pub fn new(
        queue: Arc<DecodeQueue>,
        executor: JobExecutor,
        config: WorkerPoolConfig,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(config.num_workers);

        for id in 0..config.num_workers {
            match Worker::spawn(
                id,
                queue.clone(),
                executor.clone(),
                shutdown.clone(),
                config.poll_interval,
            ) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    shutdown.store(true, Ordering::Release);
                    return Err(err);
                }
            }
        }

        tracing::debug!(workers = workers.len(), "decode worker pool started");

        Ok(Self { workers, shutdown, queue })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop all workers and wait for them to exit.
    ///
    /// A worker in the middle of a decode finishes that job first.
    pub fn shutdown(self) {
        self.signal();
        for worker in self.workers {
            worker.join();
        }
    }

    /// Stop all workers without waiting for them.
    pub fn shutdown_nowait(self) {
        self.signal();
    }

    fn signal(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.queue.close();
    }
}

struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        queue: Arc<DecodeQueue>,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("folio-decode-worker-{id}"))
            .spawn(move || Self::run(queue, executor, shutdown, poll_interval))?;

        Ok(Self { thread: Some(thread) })
    }

    fn run(
        queue: Arc<DecodeQueue>,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        while !shutdown.load(Ordering::Acquire) {
            if let Some(job) = queue.pop_timeout(poll_interval) {
                executor(&job);
            } else if queue.is_closed() {
                break;
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("decode worker panicked");
            }
        }
    }
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MAX_DEFAULT_WORKERS)
        .min(MAX_DEFAULT_WORKERS)
}
