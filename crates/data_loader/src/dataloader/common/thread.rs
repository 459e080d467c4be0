//! Thread-local storage for worker identification.
//!
//! Every worker thread records its shard descriptor on startup so that code
//! running inside the worker (readers, transforms) can find out which shard it
//! is producing.

use crate::reader::WorkerInfo;
use std::cell::Cell;

thread_local! {
    /// Shard descriptor of the current worker thread, `None` on other threads.
    pub static WORKER_INFO: Cell<Option<WorkerInfo>> = const { Cell::new(None) };
}

pub(crate) fn set_worker_info(info: WorkerInfo) {
    WORKER_INFO.with(|cell| cell.set(Some(info)));
}

/// Returns the shard descriptor of the calling worker thread.
pub fn current_worker_info() -> Option<WorkerInfo> {
    WORKER_INFO.with(Cell::get)
}

/// Seed for one worker in one epoch: `base_seed + (epoch << 32) + worker_id`.
/// Unique per worker, reproducible across runs.
pub fn worker_seed(base_seed: u64, epoch: usize, worker_id: usize) -> u64 {
    base_seed
        .wrapping_add((epoch as u64) << 32)
        .wrapping_add(worker_id as u64)
}
