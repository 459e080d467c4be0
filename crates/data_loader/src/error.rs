//! Typed errors raised by the `DataLoader`.
//!
//! Public operations return `anyhow::Result`. The variants below travel inside
//! `anyhow::Error` and can be recovered with `err.downcast_ref::<LoaderError>()`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// Invalid option combination or a violated precondition.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Iteration was attempted before a vocabulary was attached.
    #[error(
        "This DataLoader has not been indexed with a Vocabulary yet. \
         Did you forget to call DataLoader::index_with(vocab)?"
    )]
    NotIndexed,

    /// Length requested on a lazy loader without `batches_per_epoch`.
    #[error(
        "The number of batches is unknown for a lazy DataLoader \
         (max_instances_in_memory is set and batches_per_epoch is not)"
    )]
    LengthUnknown,

    /// A worker failed. Only the formatted message and trace cross the
    /// worker boundary.
    #[error("Worker {worker_id} failed: {message}")]
    Worker {
        worker_id: usize,
        message: String,
        traceback: String,
    },
}

impl LoaderError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Returns the `LoaderError` carried by `err`, if any.
pub fn loader_error(err: &anyhow::Error) -> Option<&LoaderError> {
    err.downcast_ref::<LoaderError>()
}
