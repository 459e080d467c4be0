//! src/dataloader/loader.rs
//!
//! The `DataLoader` and the logic that picks a loading topology.
//!
//! # Constructor Overview
//! - `new()` - Any `DatasetReader` + default `PaddingCollator`
//! - `new_with_collator()` - Any `DatasetReader` + custom `Collator`
//!
//! Both validate the configuration up front and fail with
//! `LoaderError::Config`. Nothing is read until the first iteration.
//!
//! # Topologies
//!
//! | `max_instances_in_memory` | cached | `num_workers` | batches built                        |
//! |---------------------------|--------|---------------|--------------------------------------|
//! | unset                     | any    | any           | in-process, from the full cache      |
//! | set                       | yes    | any           | in-process, from the cache           |
//! | set                       | no     | 0             | in-process, from a direct read       |
//! | set                       | no     | > 0           | by batch workers, fanned in          |
//!
//! Filling the cache (and `iter_instances()` in general) reads with instance
//! workers when `num_workers > 0`.
//!
//! # Seeds
//!
//! `config.seed` (random when unset) is the base seed. Every batch generator
//! gets its own epoch number: in-process shuffling uses `base_seed + epoch`,
//! worker `i` uses `worker_seed(base_seed, epoch, i)`.

use anyhow::Result;
use log::{debug, info};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batching::{window_size, BatchBuilder};
use crate::collator::{Collator, PaddingCollator};
use crate::error::LoaderError;
use crate::instance::Instance;
use crate::reader::DatasetReader;
use crate::vocab::Vocabulary;

use super::config::DataLoaderConfig;
use super::iterator::fan_in::FanIn;
use super::iterator::{BatchGenerator, DataLoaderIter, InstanceSource, Instances};
use super::workers::pool::WorkerPool;
use super::workers::{batch, instance};

// ================================================================================================
// 1. Core Types
// ================================================================================================
/// Loads instances from a `DatasetReader` and turns them into batches.
///
/// # Thread safety:
/// - Iteration borrows the loader mutably; the instance cache and the
///   persistent batch generator are only touched from the owning thread.
/// - Worker threads live for one iteration and never outlive the iterator
///   that spawned them.
///
/// # Type parameters:
/// - `R`: the reader. `Clone` is needed for `StartMethod::Spawn`.
/// - `C`: Collator type (defaults to PaddingCollator)
pub struct DataLoader<R, C = PaddingCollator> {
    pub(crate) reader: Arc<R>,
    pub(crate) data_path: PathBuf,
    pub(crate) config: DataLoaderConfig,
    pub(crate) collator: Arc<C>,
    pub(crate) vocab: Option<Arc<Vocabulary>>,
    /// Every instance of the data, once a full read has completed.
    pub(crate) instances: Option<Arc<Vec<Instance>>>,
    /// Kept between `iter()` calls when `batches_per_epoch` is set.
    pub(crate) persistent_generator: Option<BatchGenerator<R>>,
    pub(crate) base_seed: u64,
    pub(crate) epoch: usize,
}

// ================================================================================================
// 2. Constructors
// ================================================================================================
impl<R> DataLoader<R, PaddingCollator>
where
    R: DatasetReader + Clone,
{
    /// Creates a DataLoader with the default `PaddingCollator`.
    ///
    /// # Example
    /// ```ignore
    /// let reader = LineReader::new(WhitespaceTokenizer::default());
    /// let config = DataLoaderConfig::builder()
    ///     .batch_size(32)
    ///     .shuffle(true)
    ///     .num_workers(2)
    ///     .max_instances_in_memory(1000)
    ///     .build();
    /// let mut loader = DataLoader::new(reader, "train.txt", config)?;
    /// loader.index_with(vocab);
    /// ```
    pub fn new(reader: R, data_path: impl AsRef<Path>, config: DataLoaderConfig) -> Result<Self> {
        Self::new_with_collator(reader, data_path, config, PaddingCollator::default())
    }
}

impl<R, C> DataLoader<R, C>
where
    R: DatasetReader + Clone,
    C: Collator,
{
    /// Creates a DataLoader with a custom collator.
    ///
    /// # Errors
    /// - `LoaderError::Config` when the configuration is inconsistent
    pub fn new_with_collator(
        reader: R,
        data_path: impl AsRef<Path>,
        config: DataLoaderConfig,
        collator: C,
    ) -> Result<Self> {
        config.validate()?;
        let base_seed = config.seed.unwrap_or_else(|| rand::rng().random());
        debug!("DataLoader created with {:?} (base seed {})", config, base_seed);

        Ok(Self {
            reader: Arc::new(reader),
            data_path: data_path.as_ref().to_path_buf(),
            config,
            collator: Arc::new(collator),
            vocab: None,
            instances: None,
            persistent_generator: None,
            base_seed,
            epoch: 0,
        })
    }

    // ============================================================================================
    // 3. Public operations
    // ============================================================================================

    /// Attaches the vocabulary used to index instances.
    ///
    /// Cached instances are re-indexed in place, and a generator persisted for
    /// `batches_per_epoch` is discarded so later batches see the new indices.
    pub fn index_with(&mut self, vocab: impl Into<Arc<Vocabulary>>) {
        let vocab = vocab.into();
        self.persistent_generator = None;
        if let Some(cache) = self.instances.as_mut() {
            for instance in Arc::make_mut(cache).iter_mut() {
                instance.index_fields(&vocab);
            }
        }
        self.vocab = Some(vocab);
    }

    /// Number of batches one `iter()` yields.
    ///
    /// Without `batches_per_epoch` this needs every instance in memory, so the
    /// data is read (and cached) on the first call.
    ///
    /// # Errors
    /// - `LoaderError::LengthUnknown` when `max_instances_in_memory` is set
    ///   and `batches_per_epoch` is not
    pub fn len(&mut self) -> Result<usize> {
        if let Some(batches) = self.config.batches_per_epoch {
            return Ok(batches);
        }
        if self.config.max_instances_in_memory.is_some() {
            return Err(LoaderError::LengthUnknown.into());
        }

        let instances = self.ensure_cache()?;
        if let Some(sampler) = &self.config.batch_sampler {
            return Ok(sampler.get_num_batches(&instances));
        }
        let batch_size = self.config.batch_size.unwrap_or(1);
        Ok(if self.config.drop_last {
            instances.len() / batch_size
        } else {
            instances.len().div_ceil(batch_size)
        })
    }

    /// Iterates over the batches of one epoch.
    ///
    /// # Errors
    /// - `LoaderError::NotIndexed` when no vocabulary has been attached
    pub fn iter(&mut self) -> Result<DataLoaderIter<'_, R, C>> {
        if self.vocab.is_none() {
            return Err(LoaderError::NotIndexed.into());
        }
        Ok(DataLoaderIter::new(self))
    }

    /// Iterates over the raw instances, with token indexers applied and
    /// indexed when a vocabulary is attached.
    ///
    /// Without `max_instances_in_memory`, a read that runs to completion
    /// becomes the loader's cache.
    pub fn iter_instances(&mut self) -> Result<Instances<'_, R>> {
        let source = self.instance_source(self.vocab.clone())?;
        let cache = self.config.max_instances_in_memory.is_none() && self.instances.is_none();
        Ok(Instances::new(source, cache, &mut self.instances))
    }

    pub fn config(&self) -> &DataLoaderConfig {
        &self.config
    }

    pub fn vocab(&self) -> Option<&Vocabulary> {
        self.vocab.as_deref()
    }

    /// Number of cached instances, if the cache has been filled.
    pub fn cached_len(&self) -> Option<usize> {
        self.instances.as_ref().map(|cache| cache.len())
    }

    // ============================================================================================
    // 4. Topology selection
    // ============================================================================================

    fn ensure_cache(&mut self) -> Result<Arc<Vec<Instance>>> {
        if let Some(cache) = &self.instances {
            return Ok(Arc::clone(cache));
        }
        for instance in self.iter_instances()? {
            instance?;
        }
        match &self.instances {
            Some(cache) => Ok(Arc::clone(cache)),
            // Only reachable with `max_instances_in_memory` set.
            None => Err(LoaderError::LengthUnknown.into()),
        }
    }

    fn instance_source(&self, vocab: Option<Arc<Vocabulary>>) -> Result<InstanceSource<R>> {
        if let Some(cache) = &self.instances {
            return Ok(InstanceSource::Cached {
                cache: Arc::clone(cache),
                position: 0,
            });
        }

        let num_workers = self.config.num_workers;
        if num_workers == 0 {
            return Ok(InstanceSource::Stream {
                instances: self.reader.read(&self.data_path, None)?,
                reader: Arc::clone(&self.reader),
                vocab,
            });
        }

        let pool = WorkerPool::spawn(
            &self.reader,
            &self.data_path,
            num_workers,
            self.config.start_method,
            self.config.instance_queue_capacity(),
            self.config.join_timeout,
            |init, queue| instance::run(init, queue),
        )?;
        info!(
            "Reading {} with {} instance workers",
            self.data_path.display(),
            num_workers
        );
        Ok(InstanceSource::Workers {
            fan_in: FanIn::new(pool, num_workers),
            reader: Arc::clone(&self.reader),
            vocab,
        })
    }

    fn batch_builder(&self, vocab: Arc<Vocabulary>) -> BatchBuilder {
        BatchBuilder {
            batch_size: self.config.batch_size,
            drop_last: self.config.drop_last,
            shuffle: self.config.shuffle,
            batch_sampler: self.config.batch_sampler.clone(),
            window: window_size(
                self.config.max_instances_in_memory,
                self.config.batch_size,
                self.config.num_workers,
            ),
            pin_memory: self.config.pin_memory,
            device: self.config.device,
            collator: Arc::clone(&self.collator) as Arc<dyn Collator>,
            vocab,
        }
    }

    /// Starts one pass of batches over the data.
    pub(crate) fn new_batch_generator(&mut self) -> Result<BatchGenerator<R>> {
        let vocab = self.vocab.clone().ok_or(LoaderError::NotIndexed)?;
        let epoch = self.epoch;
        self.epoch += 1;
        let builder = self.batch_builder(vocab);
        let seed = self.base_seed.wrapping_add(epoch as u64);

        if self.config.max_instances_in_memory.is_none() {
            let cache = self.ensure_cache()?;
            let source = InstanceSource::Cached { cache, position: 0 };
            return Ok(BatchGenerator::InProcess(builder.batches(source, seed)));
        }

        let num_workers = self.config.num_workers;
        if self.instances.is_some() || num_workers == 0 {
            // The batch builder indexes every instance itself.
            let source = self.instance_source(None)?;
            return Ok(BatchGenerator::InProcess(builder.batches(source, seed)));
        }

        let base_seed = self.base_seed;
        let pool = WorkerPool::spawn(
            &self.reader,
            &self.data_path,
            num_workers,
            self.config.start_method,
            self.config.batch_queue_capacity(),
            self.config.join_timeout,
            move |init, queue| batch::run(init, queue, &builder, base_seed, epoch),
        )?;
        info!(
            "Epoch {}: building batches with {} workers",
            epoch, num_workers
        );
        Ok(BatchGenerator::Workers(FanIn::new(pool, num_workers)))
    }
}
