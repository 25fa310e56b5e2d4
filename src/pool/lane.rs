//! Parked pool workers that keep serving their own request.
//!
//! A blocking around filter that proceeds parks its worker until the rest of
//! the chain answers. Blocking jobs that the same request submits meanwhile
//! are handed to the innermost parked worker instead of the shared queue, so
//! a request never waits for a worker it is itself holding.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::thread::Job;

tokio::task_local! {
    static LANES: Arc<ParkedLanes>;
}

/// Workers parked by one request, innermost last.
#[derive(Default)]
pub struct ParkedLanes {
    lanes: Mutex<Vec<(u64, mpsc::UnboundedSender<Job>)>>,
    next_id: AtomicU64,
}

impl ParkedLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` with `lanes` visible to [`BlockingPool::execute`].
    ///
    /// [`BlockingPool::execute`]: super::BlockingPool::execute
    pub fn scope<F: Future>(lanes: Arc<ParkedLanes>, fut: F) -> impl Future<Output = F::Output> {
        LANES.scope(lanes, fut)
    }

    /// Number of workers currently parked.
    pub fn parked(&self) -> usize {
        self.lanes.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Block the current thread on `done`, running jobs handed to this lane
    /// in the meantime.
    ///
    /// Must be called off the runtime, like [`Handle::block_on`].
    pub fn park<T>(&self, runtime: &Handle, done: impl Future<Output = T>) -> T {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut lanes) = self.lanes.lock() {
            lanes.push((id, tx));
        }

        tokio::pin!(done);
        let out = loop {
            let step = runtime.block_on(async {
                tokio::select! {
                    biased;
                    out = &mut done => Ok(out),
                    Some(job) = rx.recv() => Err(job),
                }
            });
            match step {
                Ok(out) => break out,
                // Outside block_on, so the job may park again
                Err(job) => job(),
            }
        };

        if let Ok(mut lanes) = self.lanes.lock() {
            lanes.retain(|(lane, _)| *lane != id);
        }
        // Jobs that raced the unpark still belong to this request
        while let Ok(job) = rx.try_recv() {
            job();
        }
        out
    }

    /// Hand `job` to the innermost parked worker, or give it back.
    fn submit(&self, job: Job) -> Result<(), Job> {
        let lane = match self.lanes.lock() {
            Ok(lanes) => lanes.last().map(|(_, tx)| tx.clone()),
            Err(_) => None,
        };
        match lane {
            Some(tx) => tx.send(job).map_err(|e| e.0),
            None => Err(job),
        }
    }
}

/// Hand `job` to a worker parked by the current request, if there is one.
pub(crate) fn submit_parked(job: Job) -> Result<(), Job> {
    match LANES.try_with(Arc::clone) {
        Ok(lanes) => lanes.submit(job),
        Err(_) => Err(job),
    }
}
