//! Bounded worker pool for request dispatch.
//!
//! The FUSE session loop reads one request at a time and hands it to the
//! adapter on the same thread. Capability calls may block (network
//! backends, locks with `sleep` set), so the adapter packages each
//! request and its reply object into a job and submits it here. Workers
//! run the job and send the reply themselves.
//!
//! # Design
//!
//! - Fixed number of worker threads
//! - Bounded submission queue
//! - When the queue is full the job runs on the submitting thread, which
//!   stalls the session loop and pushes back on the kernel instead of
//!   failing the request

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Default number of worker threads.
pub const DEFAULT_WORKERS: usize = 8;

/// Default capacity of the submission queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// How often idle workers check the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// A unit of work: one request, including sending its reply.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counters for the pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Jobs accepted into the queue.
    pub jobs_submitted: AtomicU64,
    /// Jobs a worker finished.
    pub jobs_completed: AtomicU64,
    /// Jobs that ran on the submitting thread because the queue was full.
    pub jobs_inline: AtomicU64,
    /// Jobs queued but not yet started.
    pub queue_depth: AtomicU64,
    /// Total worker execution time in nanoseconds.
    pub total_execution_nanos: AtomicU64,
}

impl PoolStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_submit(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_start(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_complete(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        let nanos = duration.as_nanos() as u64;
        self.total_execution_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn record_inline(&self) {
        self.jobs_inline.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean time a worker spent on one job.
    pub fn avg_execution_time(&self) -> Duration {
        let completed = self.jobs_completed.load(Ordering::Relaxed);
        if completed == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_execution_nanos.load(Ordering::Relaxed) / completed)
    }
}

/// Configuration for the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads. Zero runs every job inline.
    pub workers: usize,
    /// Capacity of the submission queue.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

/// Error when submitting to the pool.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Queue is full.
    #[error("dispatch queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },
    /// Pool has been shut down.
    #[error("dispatch pool has been shut down")]
    Shutdown,
}

/// A fixed set of threads draining a bounded job queue.
pub struct DispatchPool {
    submit_tx: Sender<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<PoolStats>,
    config: PoolConfig,
}

impl DispatchPool {
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// # Panics
    ///
    /// If a worker thread cannot be spawned.
    pub fn with_config(config: PoolConfig) -> Self {
        let (submit_tx, submit_rx) = bounded(config.queue_capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = PoolStats::new();

        let workers = (0..config.workers)
            .map(|worker_id| {
                let rx = submit_rx.clone();
                let shutdown = Arc::clone(&shutdown);
                let stats = Arc::clone(&stats);
                thread::Builder::new()
                    .name(format!("treefs-worker-{worker_id}"))
                    .spawn(move || worker_loop(worker_id, &rx, &shutdown, &stats))
                    .expect("failed to spawn dispatch worker thread")
            })
            .collect();

        info!(
            workers = config.workers,
            capacity = config.queue_capacity,
            "dispatch pool started"
        );

        Self {
            submit_tx,
            workers: Mutex::new(workers),
            shutdown,
            stats,
            config,
        }
    }

    /// Queues `job` for a worker. On failure the job is handed back.
    pub fn try_submit(&self, job: Job) -> Result<(), (SubmitError, Job)> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err((SubmitError::Shutdown, job));
        }
        if self.config.workers == 0 {
            return Err((
                SubmitError::QueueFull {
                    capacity: self.config.queue_capacity,
                },
                job,
            ));
        }

        match self.submit_tx.try_send(job) {
            Ok(()) => {
                self.stats.record_submit();
                trace!("job submitted");
                Ok(())
            }
            Err(TrySendError::Full(rejected)) => Err((
                SubmitError::QueueFull {
                    capacity: self.config.queue_capacity,
                },
                rejected,
            )),
            Err(TrySendError::Disconnected(rejected)) => {
                error!("dispatch channel disconnected");
                Err((SubmitError::Shutdown, rejected))
            }
        }
    }

    /// Runs `job` on a worker, or on the calling thread if the queue is
    /// full or the pool is shut down.
    pub fn run(&self, job: Job) {
        match self.try_submit(job) {
            Ok(()) => {}
            Err((err, job)) => {
                if self.config.workers > 0 {
                    warn!(
                        error = %err,
                        depth = self.stats.queue_depth.load(Ordering::Relaxed),
                        "running request on the session thread"
                    );
                }
                self.stats.record_inline();
                run_guarded(job);
            }
        }
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    pub fn queue_depth(&self) -> u64 {
        self.stats.queue_depth.load(Ordering::Relaxed)
    }

    pub fn workers(&self) -> usize {
        self.config.workers
    }

    pub fn is_healthy(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }

    /// Stops accepting jobs. Workers finish what is queued, then exit.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            info!("dispatch pool shutting down");
        }
    }

    /// Waits for all workers to exit. Call after [`shutdown`](Self::shutdown).
    pub fn wait(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        debug!(count = workers.len(), "waiting for dispatch workers");
        for handle in workers {
            let _ = handle.join();
        }
        info!("dispatch pool stopped");
    }
}

impl Default for DispatchPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// Runs `job`, catching a panic so the calling thread survives it. The
/// reply object is dropped during the unwind, which answers the kernel
/// with EIO.
fn run_guarded(job: Job) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(panic = %message, "dispatched request panicked");
    }
}

fn worker_loop(worker_id: usize, rx: &Receiver<Job>, shutdown: &AtomicBool, stats: &PoolStats) {
    debug!(worker_id, "dispatch worker started");

    let run = |job: Job| {
        stats.record_start();
        let start = Instant::now();
        run_guarded(job);
        stats.record_complete(start.elapsed());
    };

    loop {
        if shutdown.load(Ordering::Acquire) {
            // Queued jobs own reply objects; run them so the kernel gets
            // an answer.
            while let Ok(job) = rx.try_recv() {
                run(job);
            }
            break;
        }

        match rx.recv_timeout(SHUTDOWN_POLL) {
            Ok(job) => run(job),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!(worker_id, "channel disconnected, worker exiting");
                break;
            }
        }
    }

    debug!(worker_id, "dispatch worker exiting");
}
