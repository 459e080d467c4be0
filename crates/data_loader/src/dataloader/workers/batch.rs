//! Workers that build complete batches from their shard.
//!
//! Each worker applies token indexers itself and runs its own `BatchBuilder`,
//! with a window sized so that all workers together stay within
//! `max_instances_in_memory`.

use anyhow::Result;
use log::{debug, warn};
use std::sync::Arc;

use super::{WorkerInit, WorkerMessage};
use crate::batching::BatchBuilder;
use crate::dataloader::common::thread::worker_seed;
use crate::dataloader::queue::AckQueue;
use crate::minibatch::MiniBatch;
use crate::reader::DatasetReader;

pub(crate) fn run<R: DatasetReader>(
    init: WorkerInit<R>,
    queue: &AckQueue<WorkerMessage<MiniBatch>>,
    builder: &BatchBuilder,
    base_seed: u64,
    epoch: usize,
) -> Result<()> {
    let worker_id = init.info.id;
    let reader = Arc::clone(&init.reader);
    let instances = init
        .reader
        .read(&init.data_path, Some(init.info))?
        .map(move |instance| {
            instance.map(|mut instance| {
                reader.apply_token_indexers(&mut instance);
                instance
            })
        });

    let mut produced = 0usize;
    for batch in builder.batches(instances, worker_seed(base_seed, epoch, worker_id)) {
        if init.cancelled() {
            debug!("Worker {} cancelled after {} batches", worker_id, produced);
            return Ok(());
        }
        queue.push(WorkerMessage::Value(batch?))?;
        produced += 1;
    }

    if produced == 0 {
        warn!("Worker {} produced no batches", worker_id);
    }
    Ok(())
}
