//! Consumer side of the worker queue.
//!
//! `FanIn` merges the values of every worker into one stream, strips the
//! `Done` / `Error` sentinels and owns teardown of the worker pool.
//!
//! Acknowledgment: a `Value` is acknowledged when the *next* item is
//! requested (the consumer is done with it by then), sentinels as soon as
//! they are received.

use anyhow::Result;
use log::{debug, error};
use std::time::{Duration, Instant};

use crate::dataloader::workers::pool::WorkerPool;
use crate::dataloader::workers::{rebuild_error, WorkerMessage, RECV_TIMEOUT_MS};
use crate::error::LoaderError;

pub(crate) struct FanIn<T: Send + 'static> {
    pool: WorkerPool<T>,
    num_workers: usize,
    done: usize,
    reported: Vec<bool>,
    awaiting_ack: bool,
    finished: bool,
}

impl<T: Send + 'static> FanIn<T> {
    pub(crate) fn new(pool: WorkerPool<T>, num_workers: usize) -> Self {
        Self {
            pool,
            num_workers,
            done: 0,
            reported: vec![false; num_workers],
            awaiting_ack: false,
            finished: false,
        }
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.pool.queue().peak_in_flight()
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.pool.queue().capacity()
    }

    fn ack(&self) {
        if let Err(e) = self.pool.queue().ack() {
            error!("Worker queue accounting is off: {:#}", e);
        }
    }

    fn ack_outstanding(&mut self) {
        if self.awaiting_ack {
            self.awaiting_ack = false;
            self.ack();
        }
    }

    /// Acknowledges everything left in the queue until every worker sent
    /// `Done` or `join_timeout` passed, then joins the pool.
    fn teardown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.pool.cancel();
        self.ack_outstanding();

        let deadline = Instant::now() + self.pool.join_timeout();
        while self.done < self.num_workers && Instant::now() < deadline {
            match self
                .pool
                .queue()
                .pop_timeout(Duration::from_millis(RECV_TIMEOUT_MS))
            {
                Some(message) => {
                    self.ack();
                    if let WorkerMessage::Done { worker_id } = message {
                        self.mark_done(worker_id);
                    }
                }
                None if self.pool.all_finished() => break,
                None => {}
            }
        }
        // Workers may still be pushing between our last pop and their `Done`.
        while self.pool.queue().try_pop().is_some() {
            self.ack();
        }
        self.pool.join();
        debug!(
            "Worker pool torn down ({} of {} workers reported done)",
            self.done, self.num_workers
        );
    }

    fn mark_done(&mut self, worker_id: usize) {
        self.done += 1;
        if let Some(flag) = self.reported.get_mut(worker_id) {
            *flag = true;
        }
    }

    fn fail(&mut self, err: LoaderError) -> anyhow::Error {
        self.teardown();
        err.into()
    }
}

impl<T: Send + 'static> Iterator for FanIn<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        self.ack_outstanding();

        loop {
            if self.done == self.num_workers {
                self.teardown();
                return None;
            }

            match self
                .pool
                .queue()
                .pop_timeout(Duration::from_millis(RECV_TIMEOUT_MS))
            {
                Some(WorkerMessage::Value(value)) => {
                    self.awaiting_ack = true;
                    return Some(Ok(value));
                }
                Some(WorkerMessage::Done { worker_id }) => {
                    self.ack();
                    self.mark_done(worker_id);
                    debug!(
                        "Worker {} done ({}/{})",
                        worker_id, self.done, self.num_workers
                    );
                }
                Some(WorkerMessage::Error {
                    worker_id,
                    kind,
                    message,
                    traceback,
                }) => {
                    self.ack();
                    error!("Worker {} failed:\n{}", worker_id, traceback);
                    let err = rebuild_error(worker_id, kind, message, traceback);
                    return Some(Err(self.fail(err)));
                }
                None => {
                    if self.pool.all_finished() && self.pool.queue().in_flight() == 0 {
                        let worker_id = self.reported.iter().position(|&r| !r).unwrap_or(0);
                        let err = LoaderError::Worker {
                            worker_id,
                            message: format!(
                                "Worker {} exited without signalling completion",
                                worker_id
                            ),
                            traceback: String::new(),
                        };
                        return Some(Err(self.fail(err)));
                    }
                }
            }
        }
    }
}

impl<T: Send + 'static> Drop for FanIn<T> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Worker stream abandoned; cancelling workers");
            self.teardown();
        }
    }
}
