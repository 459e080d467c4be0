#![allow(dead_code)]

use data_loader::{
    dataloader::current_worker_info,
    instance::{Instance, TextField, TokenIndexer},
    minibatch::MiniBatch,
    reader::{shard_iter, DatasetReader, InstanceIter, WorkerInfo},
    vocab::Vocabulary,
};

use anyhow::{anyhow, Result};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `n` sentences of 1 to 5 tokens.
pub fn sentences(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            (0..=(i % 5))
                .map(|j| format!("w{}", (i + j) % 7))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

pub fn vocab_for(records: &[String]) -> Result<Vocabulary> {
    Vocabulary::from_instances(
        records
            .iter()
            .enumerate()
            .map(|(i, text)| Ok(to_instance(i, text))),
    )
}

fn to_instance(id: usize, text: &str) -> Instance {
    Instance::new()
        .with_field("tokens", TextField::from_text(text))
        .with_field("id", json!(id))
}

/// The `id` metadata column of a batch.
pub fn ids(batch: &MiniBatch) -> Result<Vec<u64>> {
    batch
        .metadata("id")?
        .iter()
        .map(|v| v.as_u64().ok_or_else(|| anyhow!("id is not a number: {}", v)))
        .collect()
}

/// Decrements the active-read counter when the stream is dropped.
struct ActiveRead(Arc<AtomicUsize>);

impl Drop for ActiveRead {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reader over an in-memory list of sentences, sharded round-robin.
///
/// Counters are shared between clones so tests can observe what every
/// worker did.
pub struct MemoryReader {
    pub records: Arc<Vec<String>>,
    /// Fails with "record N is corrupt" when reaching this record.
    pub fail_at: Option<usize>,
    /// Attaches token indexers inside `read`, which workers reject.
    pub indexers_in_read: bool,
    pub delay: Option<Duration>,
    pub reads: Arc<AtomicUsize>,
    pub active: Arc<AtomicUsize>,
    pub clones: Arc<AtomicUsize>,
    pub shards_seen: Arc<Mutex<Vec<Option<WorkerInfo>>>>,
}

impl MemoryReader {
    pub fn new(records: Vec<String>) -> Self {
        Self {
            records: Arc::new(records),
            fail_at: None,
            indexers_in_read: false,
            delay: None,
            reads: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            clones: Arc::new(AtomicUsize::new(0)),
            shards_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_at(mut self, record: usize) -> Self {
        self.fail_at = Some(record);
        self
    }

    pub fn with_indexers_in_read(mut self) -> Self {
        self.indexers_in_read = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Clone for MemoryReader {
    fn clone(&self) -> Self {
        self.clones.fetch_add(1, Ordering::SeqCst);
        Self {
            records: Arc::clone(&self.records),
            fail_at: self.fail_at,
            indexers_in_read: self.indexers_in_read,
            delay: self.delay,
            reads: Arc::clone(&self.reads),
            active: Arc::clone(&self.active),
            clones: Arc::clone(&self.clones),
            shards_seen: Arc::clone(&self.shards_seen),
        }
    }
}

impl DatasetReader for MemoryReader {
    fn read(&self, _data_path: &Path, shard: Option<WorkerInfo>) -> Result<InstanceIter> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        self.shards_seen
            .lock()
            .map_err(|_| anyhow!("shards_seen poisoned"))?
            .push(current_worker_info());

        let guard = ActiveRead(Arc::clone(&self.active));
        let records = Arc::clone(&self.records);
        let fail_at = self.fail_at;
        let indexers_in_read = self.indexers_in_read;
        let delay = self.delay;

        let iter = (0..records.len()).map(move |i| {
            let _ = &guard;
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            if Some(i) == fail_at {
                return Err(anyhow!("record {} is corrupt", i));
            }
            let mut instance = to_instance(i, &records[i]);
            if indexers_in_read {
                for text in instance.text_fields_mut() {
                    text.set_token_indexer(TokenIndexer::default());
                }
            }
            Ok(instance)
        });
        Ok(shard_iter(iter, shard))
    }

    fn apply_token_indexers(&self, instance: &mut Instance) {
        for text in instance.text_fields_mut() {
            text.set_token_indexer(TokenIndexer::default());
        }
    }
}
