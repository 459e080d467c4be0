//! src/dataloader/config.rs
//!
//! Configuration for DataLoader behaviour
//!
//! The `DataLoaderConfig` struct stores the parameters that control how
//! instances are read, batched and moved. It is immutable once handed to a
//! `DataLoader`, which validates it up front.
//!
//! Example:
//! ```ignore
//! let config = DataLoaderConfig::builder()
//!     .batch_size(32)
//!     .shuffle(true)
//!     .num_workers(4)
//!     .max_instances_in_memory(1000)
//!     .build();
//! ```
//!
//! # Memory considerations:
//! - `max_instances_in_memory = None`: every instance is read once and cached.
//! - `max_instances_in_memory = M`: at most `M` instances are held at a time,
//!   split across workers; up to `M * 4` raw instances (or `4 * M / batch_size`
//!   batches) may be waiting in the worker queue.

use crate::error::LoaderError;
use crate::minibatch::Device;
use crate::sampler::BatchSampler;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How worker threads receive the dataset reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMethod {
    /// Every worker shares the loader's reader.
    #[default]
    Fork,
    /// Every worker gets its own clone of the reader.
    Spawn,
}

/// Configuration for DataLoader
#[derive(Clone)]
pub struct DataLoaderConfig {
    /// Number of instances per batch. Required unless `batch_sampler` is set.
    pub batch_size: Option<usize>,
    /// Whether to drop the last incomplete batch of each window.
    pub drop_last: bool,
    /// Whether to shuffle instances within each window.
    pub shuffle: bool,
    /// Custom grouping of instances into batches.
    /// Mutually exclusive with `batch_size`, `drop_last` and `shuffle`.
    pub batch_sampler: Option<Arc<dyn BatchSampler>>,
    /// Fixed number of batches per `iter()` call, continuing across passes
    /// over the data.
    pub batches_per_epoch: Option<usize>,
    /// Number of worker threads (0 = read on the calling thread).
    pub num_workers: usize,
    /// Bound on the number of instances held in memory. `None` caches the
    /// whole dataset.
    pub max_instances_in_memory: Option<usize>,
    pub start_method: StartMethod,
    /// Whether batches are pinned before they are handed out.
    pub pin_memory: bool,
    /// Device every batch is moved to.
    pub device: Option<Device>,
    /// Random seed for reproducible shuffling. Drawn at random when unset.
    pub seed: Option<u64>,
    /// How long teardown waits for workers before detaching them. Default: 30s
    pub join_timeout: Duration,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            drop_last: false,
            shuffle: false,
            batch_sampler: None,
            batches_per_epoch: None,
            num_workers: 0,
            max_instances_in_memory: None,
            start_method: StartMethod::Fork,
            pin_memory: false,
            device: None,
            seed: None,
            join_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for DataLoaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoaderConfig")
            .field("batch_size", &self.batch_size)
            .field("drop_last", &self.drop_last)
            .field("shuffle", &self.shuffle)
            .field("batch_sampler", &self.batch_sampler.as_ref().map(|_| "<dyn BatchSampler>"))
            .field("batches_per_epoch", &self.batches_per_epoch)
            .field("num_workers", &self.num_workers)
            .field("max_instances_in_memory", &self.max_instances_in_memory)
            .field("start_method", &self.start_method)
            .field("pin_memory", &self.pin_memory)
            .field("device", &self.device)
            .field("seed", &self.seed)
            .field("join_timeout", &self.join_timeout)
            .finish()
    }
}

fn check(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(LoaderError::config(message).into())
    }
}

impl DataLoaderConfig {
    pub fn builder() -> DataLoaderConfigBuilder {
        DataLoaderConfigBuilder::default()
    }

    /// Checks option combinations. Fails with `LoaderError::Config`.
    pub fn validate(&self) -> Result<()> {
        if let Some(batch_size) = self.batch_size {
            check(batch_size >= 1, "batch_size must be at least 1")?;
        }

        if self.batch_sampler.is_some() {
            check(
                self.batch_size.is_none(),
                "batch_sampler option is mutually exclusive with batch_size",
            )?;
            check(
                !self.drop_last,
                "batch_sampler option is mutually exclusive with drop_last",
            )?;
            check(
                !self.shuffle,
                "batch_sampler option is mutually exclusive with shuffle",
            )?;
        } else {
            check(
                self.batch_size.is_some(),
                "batch_size is required when batch_sampler is not supplied",
            )?;
        }

        if let Some(batches_per_epoch) = self.batches_per_epoch {
            check(batches_per_epoch >= 1, "batches_per_epoch must be at least 1")?;
        }

        if let Some(max_instances) = self.max_instances_in_memory {
            match self.batch_size {
                Some(batch_size) => check(
                    max_instances >= batch_size,
                    "max_instances_in_memory must be at least batch_size",
                )?,
                None => check(max_instances >= 1, "max_instances_in_memory must be at least 1")?,
            }
        }

        if self.num_workers > 0 && self.start_method != StartMethod::Spawn {
            check(
                !self.pin_memory,
                "start_method must be set to 'spawn' when using memory pinning",
            )?;
            check(
                self.device.map_or(true, |device| device.is_cpu()),
                "start_method must be set to 'spawn' for data loader to put tensors onto a CUDA device",
            )?;
        }
        Ok(())
    }

    /// Unacknowledged-message bound of the raw-instance worker queue.
    pub(crate) fn instance_queue_capacity(&self) -> Option<usize> {
        self.max_instances_in_memory.map(|m| m.saturating_mul(4))
    }

    /// Unacknowledged-message bound of the batch worker queue.
    pub(crate) fn batch_queue_capacity(&self) -> Option<usize> {
        self.max_instances_in_memory
            .map(|m| (m.saturating_mul(4) / self.batch_size.unwrap_or(1)).max(1))
    }
}

/// Builder for DataLoaderConfig with method chaining
#[derive(Default)]
pub struct DataLoaderConfigBuilder {
    config: DataLoaderConfig,
}

impl DataLoaderConfigBuilder {
    /// Set the batch size (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = Some(size);
        self
    }

    pub fn drop_last(mut self, drop: bool) -> Self {
        self.config.drop_last = drop;
        self
    }

    /// Set whether to shuffle instances within each window
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    pub fn batch_sampler(mut self, sampler: impl BatchSampler) -> Self {
        self.config.batch_sampler = Some(Arc::new(sampler));
        self
    }

    pub fn shared_batch_sampler(mut self, sampler: Arc<dyn BatchSampler>) -> Self {
        self.config.batch_sampler = Some(sampler);
        self
    }

    /// Set a fixed epoch length in batches
    pub fn batches_per_epoch(mut self, batches: usize) -> Self {
        self.config.batches_per_epoch = Some(batches);
        self
    }

    /// Set the number of workers
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    pub fn max_instances_in_memory(mut self, max_instances: usize) -> Self {
        self.config.max_instances_in_memory = Some(max_instances);
        self
    }

    pub fn start_method(mut self, start_method: StartMethod) -> Self {
        self.config.start_method = start_method;
        self
    }

    pub fn pin_memory(mut self, pin: bool) -> Self {
        self.config.pin_memory = pin;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.config.device = Some(device);
        self
    }

    /// Set the random seed for reproducible data loading.
    ///
    /// When set, this seed controls within-window shuffling both on the
    /// calling thread and in batch workers.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Set how long teardown waits for workers.
    ///
    /// - Too low: workers still draining their last batch get detached.
    /// - Too high: delays returning an error when a worker is stuck.
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.config.join_timeout = timeout;
        self
    }

    /// Build the final configuration. Validation happens in `DataLoader::new`.
    pub fn build(self) -> DataLoaderConfig {
        self.config
    }
}
