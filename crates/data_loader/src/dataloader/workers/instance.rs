//! Workers that stream the raw instances of their shard.
//!
//! Token indexers are applied later, on the consuming thread, so an instance
//! that already carries one was built by a reader that attaches indexers in
//! the wrong place. The first instance of every shard is checked for that.

use anyhow::Result;
use log::{debug, warn};

use super::{WorkerInit, WorkerMessage};
use crate::dataloader::queue::AckQueue;
use crate::error::LoaderError;
use crate::instance::Instance;
use crate::reader::DatasetReader;

pub(crate) fn run<R: DatasetReader>(
    init: WorkerInit<R>,
    queue: &AckQueue<WorkerMessage<Instance>>,
) -> Result<()> {
    let worker_id = init.info.id;
    let mut produced = 0usize;

    for instance in init.reader.read(&init.data_path, Some(init.info))? {
        if init.cancelled() {
            debug!("Worker {} cancelled after {} instances", worker_id, produced);
            return Ok(());
        }
        let instance = instance?;

        if produced == 0 {
            if let Some(field) = instance.text_field_with_indexer() {
                return Err(LoaderError::config(format!(
                    "Found a TextField ({}) with token indexers already applied, but \
                     num_workers > 0. DatasetReader::read must not attach token indexers; \
                     attach them in DatasetReader::apply_token_indexers instead.",
                    field
                ))
                .into());
            }
        }

        queue.push(WorkerMessage::Value(instance))?;
        produced += 1;
    }

    if produced == 0 {
        warn!(
            "Worker {} produced no instances; its shard of {} is empty",
            worker_id,
            init.data_path.display()
        );
    }
    Ok(())
}
