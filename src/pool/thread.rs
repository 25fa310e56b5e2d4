//! Bounded thread pool for blocking filter and handler bodies.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tokio::sync::oneshot;

use super::error::{PoolError, PoolResult};
use super::lane;
use super::panic_message;

/// Default queue capacity multiplier per worker.
const DEFAULT_QUEUE_MULTIPLIER: usize = 100;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A job waiting in the queue.
struct QueuedJob {
    job: Job,
    queued_at: Instant,
}

/// A pool of plain OS threads that run blocking closures.
///
/// Workers are not tokio runtime threads, so code running on them may block
/// on a oneshot receiver (this is what a blocking `proceed` does) without
/// stalling the event loop.
pub struct BlockingPool {
    /// Channel to send jobs to workers.
    job_tx: mpsc::SyncSender<QueuedJob>,
    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    queue_capacity: usize,
    /// Jobs accepted but not yet picked up by a worker.
    pending: Arc<AtomicUsize>,
    shutdown: AtomicBool,
    /// Pool name for logging and thread names.
    name: String,
}

impl BlockingPool {
    /// Create a new pool with auto-calculated queue capacity.
    ///
    /// `num_workers == 0` uses the CPU count.
    pub fn new(num_workers: usize, name: impl Into<String>) -> std::io::Result<Self> {
        let num_workers = if num_workers == 0 {
            num_cpus::get()
        } else {
            num_workers
        };
        Self::with_capacity(num_workers, num_workers * DEFAULT_QUEUE_MULTIPLIER, name)
    }

    /// Create a new pool with custom queue capacity.
    pub fn with_capacity(
        num_workers: usize,
        queue_capacity: usize,
        name: impl Into<String>,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let (job_tx, job_rx) = mpsc::sync_channel::<QueuedJob>(queue_capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let pending = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let rx = Arc::clone(&job_rx);
            let pending = Arc::clone(&pending);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || Self::worker_loop(id, rx, pending))?;
            workers.push(handle);
        }

        tracing::info!(
            pool = %name,
            workers = num_workers,
            capacity = queue_capacity,
            "blocking pool created"
        );

        Ok(Self {
            job_tx,
            workers: Mutex::new(workers),
            worker_count: num_workers,
            queue_capacity,
            pending,
            shutdown: AtomicBool::new(false),
            name,
        })
    }

    /// Worker thread main loop.
    fn worker_loop(
        id: usize,
        rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
        pending: Arc<AtomicUsize>,
    ) {
        tracing::debug!(worker = id, "worker started");

        loop {
            let work = match rx.lock() {
                Ok(guard) => guard.recv(),
                // Another worker panicked while holding the lock; the queue is unusable.
                Err(_) => break,
            };

            match work {
                Ok(QueuedJob { job, queued_at }) => {
                    pending.fetch_sub(1, Ordering::SeqCst);
                    tracing::trace!(
                        worker = id,
                        queue_wait_us = queued_at.elapsed().as_micros() as u64,
                        "job dequeued"
                    );
                    job();
                }
                Err(_) => {
                    // Channel closed, shutdown
                    break;
                }
            }
        }

        tracing::debug!(worker = id, "worker stopped");
    }

    /// Run a blocking closure on the pool and await its result.
    ///
    /// A panic inside `f` is caught on the worker and reported as
    /// [`PoolError::WorkerPanic`]; the worker keeps serving. Inside a
    /// request that has a worker parked in a blocking `proceed`, `f` runs on
    /// that worker instead of waiting in the queue.
    pub async fn execute<F, R>(&self, f: F) -> PoolResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(PoolError::Shutdown);
        }

        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message);
            let _ = result_tx.send(result);
        });

        if let Err(job) = lane::submit_parked(job) {
            self.enqueue(job)?;
        }

        match result_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(msg)) => Err(PoolError::WorkerPanic(msg)),
            Err(_) => Err(PoolError::ChannelClosed),
        }
    }

    fn enqueue(&self, job: Job) -> PoolResult<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedJob {
            job,
            queued_at: Instant::now(),
        };

        // Use try_send to detect queue full
        if let Err(e) = self.job_tx.try_send(queued) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return match e {
                mpsc::TrySendError::Full(_) => Err(PoolError::QueueFull {
                    capacity: self.queue_capacity,
                    pending: self.pending.load(Ordering::SeqCst),
                }),
                mpsc::TrySendError::Disconnected(_) => Err(PoolError::Shutdown),
            };
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Jobs queued but not yet started.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting new jobs. Queued jobs still run.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return; // Already shutting down
        }
        tracing::info!(pool = %self.name, "shutting down blocking pool");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for BlockingPool {
    fn drop(&mut self) {
        self.shutdown();
        // Workers exit once the sender (dropped with self) disconnects. Joining
        // here would deadlock if the last reference is dropped on a worker.
        if let Ok(mut workers) = self.workers.lock() {
            workers.clear();
        }
    }
}
