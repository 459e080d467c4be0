//! Worker management for parallel data loading.
//!
//! - `pool`: spawns and tears down worker threads bound to one `AckQueue`
//! - `instance`: workers that stream raw instances of their shard
//! - `batch`: workers that build complete batches from their shard
//!
//! Every worker follows the same message protocol: zero or more `Value`s, at
//! most one `Error`, then exactly one `Done`, then nothing. After `Done` the
//! worker waits until the consumer acknowledged everything it sent.

use crate::error::LoaderError;
use crate::reader::WorkerInfo;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) mod batch;
pub(crate) mod instance;
pub(crate) mod pool;

/// Whether a worker failure is a misconfiguration or a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    Config,
    Failure,
}

#[derive(Debug)]
pub(crate) enum WorkerMessage<T> {
    Value(T),
    /// Errors cross the thread boundary as text only.
    Error {
        worker_id: usize,
        kind: FailureKind,
        message: String,
        traceback: String,
    },
    Done {
        worker_id: usize,
    },
}

impl<T> WorkerMessage<T> {
    /// Formats `err` into an `Error` message.
    pub(crate) fn from_error(worker_id: usize, err: &anyhow::Error) -> Self {
        let (kind, message) = match err.downcast_ref::<LoaderError>() {
            Some(LoaderError::Config(msg)) => (FailureKind::Config, msg.clone()),
            _ => (FailureKind::Failure, format!("{:#}", err)),
        };
        WorkerMessage::Error {
            worker_id,
            kind,
            message,
            traceback: format!("{:?}", err),
        }
    }
}

/// Rebuilds the typed error on the consumer side.
pub(crate) fn rebuild_error(
    worker_id: usize,
    kind: FailureKind,
    message: String,
    traceback: String,
) -> LoaderError {
    match kind {
        FailureKind::Config => LoaderError::Config(message),
        FailureKind::Failure => LoaderError::Worker {
            worker_id,
            message,
            traceback,
        },
    }
}

/// Everything one worker needs, handed over when it is spawned.
pub(crate) struct WorkerInit<R> {
    pub(crate) info: WorkerInfo,
    pub(crate) reader: Arc<R>,
    pub(crate) data_path: PathBuf,
    pub(crate) cancel: Arc<AtomicBool>,
}

impl<R> WorkerInit<R> {
    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// How long the consumer waits on the queue before re-checking worker health (milliseconds)
pub(crate) const RECV_TIMEOUT_MS: u64 = 100;

/// Polling interval while joining worker threads (milliseconds)
pub(crate) const JOIN_POLL_MS: u64 = 10;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn config_errors_keep_their_kind() {
        let err: anyhow::Error = LoaderError::config("bad indexers").into();
        match WorkerMessage::<()>::from_error(3, &err) {
            WorkerMessage::Error {
                worker_id,
                kind,
                message,
                ..
            } => {
                assert_eq!(worker_id, 3);
                assert_eq!(kind, FailureKind::Config);
                assert_eq!(message, "bad indexers");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn failures_carry_the_whole_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("disk on fire"))
            .context("reading record 3")
            .unwrap_err();
        let WorkerMessage::<()>::Error {
            kind,
            message,
            traceback,
            worker_id,
        } = WorkerMessage::from_error(1, &err)
        else {
            panic!("expected an error message");
        };
        assert_eq!(kind, FailureKind::Failure);
        assert!(message.contains("reading record 3"));
        assert!(message.contains("disk on fire"));

        let rebuilt = rebuild_error(worker_id, kind, message, traceback);
        assert!(matches!(rebuilt, LoaderError::Worker { worker_id: 1, .. }));
    }
}
