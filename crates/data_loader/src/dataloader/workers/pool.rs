//! Worker pool implementation for parallel data loading.
//!
//! Spawns one named thread per shard, all producing into a single
//! `AckQueue`, and owns their teardown.
//!
//! # Key features
//! - Each worker gets an explicit `WorkerInit`; nothing else is shared except
//!   the queue and the cancel flag
//! - Errors and panics inside a worker become one `Error` message
//! - Bounded teardown: join, close the queue for stragglers, join again,
//!   then detach whatever is still running

use anyhow::{Context, Result};
use log::{debug, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{WorkerInit, WorkerMessage, JOIN_POLL_MS};
use crate::dataloader::common::thread::set_worker_info;
use crate::dataloader::config::StartMethod;
use crate::dataloader::queue::AckQueue;
use crate::reader::{DatasetReader, WorkerInfo};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Thread pool for one iteration's workers.
///
/// - Queue: Workers -> consumer (values and sentinels)
/// - Cancel flag: consumer -> workers, checked between records
pub(crate) struct WorkerPool<T> {
    handles: Vec<(usize, thread::JoinHandle<()>)>,
    queue: Arc<AckQueue<WorkerMessage<T>>>,
    cancel: Arc<AtomicBool>,
    join_timeout: Duration,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawns `num_workers` threads running `body` on their shard.
    ///
    /// With `StartMethod::Fork` every worker shares `reader`; with `Spawn`
    /// each gets its own clone.
    pub(crate) fn spawn<R, F>(
        reader: &Arc<R>,
        data_path: &Path,
        num_workers: usize,
        start_method: StartMethod,
        capacity: Option<usize>,
        join_timeout: Duration,
        body: F,
    ) -> Result<Self>
    where
        R: DatasetReader + Clone,
        F: Fn(WorkerInit<R>, &AckQueue<WorkerMessage<T>>) -> Result<()> + Send + Sync + 'static,
    {
        let mut pool = Self {
            handles: Vec::with_capacity(num_workers),
            queue: Arc::new(AckQueue::new(capacity)),
            cancel: Arc::new(AtomicBool::new(false)),
            join_timeout,
        };
        let body = Arc::new(body);

        for worker_id in 0..num_workers {
            let info = WorkerInfo::new(num_workers, worker_id);
            let init = WorkerInit {
                info,
                reader: match start_method {
                    StartMethod::Fork => Arc::clone(reader),
                    StartMethod::Spawn => Arc::new((**reader).clone()),
                },
                data_path: data_path.to_path_buf(),
                cancel: Arc::clone(&pool.cancel),
            };
            let queue = Arc::clone(&pool.queue);
            let body = Arc::clone(&body);

            // On failure `pool` drops here and tears down the workers already running.
            let handle = thread::Builder::new()
                .name(format!("dataloader-worker-{}", worker_id))
                .spawn(move || {
                    set_worker_info(info);
                    debug!("Worker {} started", worker_id);

                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(init, &queue)));
                    let failure = match outcome {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(WorkerMessage::from_error(worker_id, &e)),
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            Some(WorkerMessage::Error {
                                worker_id,
                                kind: super::FailureKind::Failure,
                                traceback: format!("panic in worker {}: {}", worker_id, message),
                                message,
                            })
                        }
                    };

                    if let Some(failure) = failure {
                        let _ = queue.push(failure);
                    }
                    let _ = queue.push(WorkerMessage::Done { worker_id });
                    queue.await_all_acked();
                    debug!("Worker {} exited", worker_id);
                })
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id))?;

            pool.handles.push((worker_id, handle));
        }

        Ok(pool)
    }

    pub(crate) fn queue(&self) -> &AckQueue<WorkerMessage<T>> {
        &self.queue
    }

    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// True once every worker thread has returned.
    pub(crate) fn all_finished(&self) -> bool {
        self.handles.iter().all(|(_, handle)| handle.is_finished())
    }

    pub(crate) fn join_timeout(&self) -> Duration {
        self.join_timeout
    }

    fn join_until(&mut self, deadline: Instant) {
        loop {
            let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.handles)
                .into_iter()
                .partition(|(_, handle)| handle.is_finished());
            for (worker_id, handle) in finished {
                if handle.join().is_err() {
                    warn!("Worker {} panicked outside its body", worker_id);
                }
            }
            self.handles = running;
            if self.handles.is_empty() || Instant::now() >= deadline {
                return;
            }
            thread::sleep(Duration::from_millis(JOIN_POLL_MS));
        }
    }

    /// Joins every worker. Workers still running after `join_timeout` get the
    /// queue closed under them and one more `join_timeout`; after that they
    /// are detached.
    pub(crate) fn join(&mut self) {
        self.join_until(Instant::now() + self.join_timeout);
        if self.handles.is_empty() {
            return;
        }

        self.cancel();
        self.queue.close();
        self.join_until(Instant::now() + self.join_timeout);

        for (worker_id, _handle) in self.handles.drain(..) {
            warn!(
                "Worker {} did not exit within {:?}; detaching it",
                worker_id, self.join_timeout
            );
        }
    }

    /// Number of workers not yet joined.
    #[cfg(test)]
    pub(crate) fn alive(&self) -> usize {
        self.handles.len()
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.cancel.store(true, Ordering::Relaxed);
        // Nobody will acknowledge anything anymore.
        self.queue.close();
        let deadline = Instant::now() + self.join_timeout;
        while !self.handles.is_empty() && Instant::now() < deadline {
            self.handles.retain(|(_, handle)| !handle.is_finished());
            thread::sleep(Duration::from_millis(JOIN_POLL_MS));
        }
        for (worker_id, handle) in self.handles.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("Worker {} still running at drop; detaching it", worker_id);
            }
        }
    }
}
