// Sequential update scheduler.
//
// One FIFO queue per synchronization domain. Jobs are started lazily and run
// one at a time to completion, so updates land in enqueue order no matter
// how long each fetch takes. A failing or panicking job is logged and the
// queue moves on.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::{debug, error, trace};

use crate::error::SyncError;

type Job = Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send>>;
type StartJob = Box<dyn FnOnce() -> Job + Send>;

struct QueuedJob {
    root_path: String,
    start: StartJob,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<QueuedJob>,
    busy: bool,
}

#[derive(Default)]
pub struct UpdateScheduler {
    queue: Mutex<Queue>,
    idle: Notify,
}

impl UpdateScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a job for `root_path`. The closure is not called until every
    /// earlier job has finished. Must be called inside a tokio runtime.
    pub fn enqueue<F, Fut>(self: &Arc<Self>, root_path: impl Into<String>, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let root_path = root_path.into();
        let start_drain = {
            let mut queue = self.lock();
            trace!(root_path = %root_path, pending = queue.jobs.len(), "enqueue update");
            queue.jobs.push_back(QueuedJob {
                root_path,
                start: Box::new(move || Box::pin(job()) as Job),
            });
            !std::mem::replace(&mut queue.busy, true)
        };

        if start_drain {
            tokio::spawn(Arc::clone(self).drain());
        }
    }

    /// Drop every queued job for `root_path`. A job already running is not
    /// interrupted. Returns how many were dropped.
    pub fn discard(&self, root_path: &str) -> usize {
        let mut queue = self.lock();
        let before = queue.jobs.len();
        queue.jobs.retain(|job| job.root_path != root_path);
        let dropped = before - queue.jobs.len();
        if dropped > 0 {
            debug!(root_path, dropped, "discarded queued updates");
        }
        dropped
    }

    /// Jobs waiting to start.
    pub fn pending(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    /// Resolves once the queue is empty and no job is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a drain finishing in between is seen.
            notified.as_mut().enable();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut queue = self.lock();
                match queue.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        queue.busy = false;
                        break;
                    }
                }
            };

            let QueuedJob { root_path, start } = next;
            // Run on its own task so a panic is contained to this job.
            match tokio::spawn(start()).await {
                Ok(Ok(())) => trace!(root_path = %root_path, "update finished"),
                Ok(Err(err)) => error!(root_path = %root_path, error = %err, "update failed"),
                Err(join_error) => {
                    error!(root_path = %root_path, error = %join_error, "update panicked")
                }
            }
        }
        self.idle.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        // A poisoned queue is still structurally valid.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
