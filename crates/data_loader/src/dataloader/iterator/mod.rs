//! src/dataloader/iterator/mod.rs
//!
//! Iterator implementations for DataLoader.
//!
//! - `DataLoaderIter`: batches of one epoch, returned by `DataLoader::iter()`
//! - `Instances`: raw instances, returned by `DataLoader::iter_instances()`
//! - `BatchGenerator`: internal batch stream, either built on the calling
//!   thread or fanned in from batch workers
//! - `InstanceSource`: internal instance stream, from the cache, a direct
//!   read, or instance workers
//!
//! All of them are pull-based: nothing is read until `next()` is called.

use anyhow::Result;
use log::info;
use std::sync::Arc;

use crate::batching::Batches;
use crate::collator::Collator;
use crate::instance::Instance;
use crate::minibatch::MiniBatch;
use crate::reader::{DatasetReader, InstanceIter};
use crate::vocab::Vocabulary;

use super::loader::DataLoader;

pub(crate) mod fan_in;

use fan_in::FanIn;

/// Applies the reader's token indexers and, when attached, the vocabulary.
fn prepare<R: DatasetReader>(
    reader: &R,
    vocab: Option<&Vocabulary>,
    mut instance: Instance,
) -> Instance {
    reader.apply_token_indexers(&mut instance);
    if let Some(vocab) = vocab {
        instance.index_fields(vocab);
    }
    instance
}

pub(crate) enum InstanceSource<R> {
    /// Already prepared when they were cached.
    Cached {
        cache: Arc<Vec<Instance>>,
        position: usize,
    },
    Stream {
        instances: InstanceIter,
        reader: Arc<R>,
        vocab: Option<Arc<Vocabulary>>,
    },
    Workers {
        fan_in: FanIn<Instance>,
        reader: Arc<R>,
        vocab: Option<Arc<Vocabulary>>,
    },
}

impl<R: DatasetReader> Iterator for InstanceSource<R> {
    type Item = Result<Instance>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            InstanceSource::Cached { cache, position } => {
                let instance = cache.get(*position)?.clone();
                *position += 1;
                Some(Ok(instance))
            }
            InstanceSource::Stream {
                instances,
                reader,
                vocab,
            } => Some(
                instances
                    .next()?
                    .map(|instance| prepare(reader.as_ref(), vocab.as_deref(), instance)),
            ),
            InstanceSource::Workers {
                fan_in,
                reader,
                vocab,
            } => Some(
                fan_in
                    .next()?
                    .map(|instance| prepare(reader.as_ref(), vocab.as_deref(), instance)),
            ),
        }
    }
}

/// Iterator over the instances of one full read.
///
/// Created by calling `dataloader.iter_instances()`. When the loader keeps
/// everything in memory, the instances are collected while iterating and
/// become the loader's cache once the read completes. A read that is
/// abandoned or fails leaves no cache behind.
pub struct Instances<'a, R: DatasetReader> {
    source: InstanceSource<R>,
    staging: Option<Vec<Instance>>,
    cache_slot: &'a mut Option<Arc<Vec<Instance>>>,
    failed: bool,
}

impl<'a, R: DatasetReader> Instances<'a, R> {
    pub(crate) fn new(
        source: InstanceSource<R>,
        cache: bool,
        cache_slot: &'a mut Option<Arc<Vec<Instance>>>,
    ) -> Self {
        Self {
            source,
            staging: cache.then(Vec::new),
            cache_slot,
            failed: false,
        }
    }

    /// Highest number of unacknowledged messages in the worker queue, when
    /// the instances come from workers.
    pub fn peak_in_flight(&self) -> Option<usize> {
        match &self.source {
            InstanceSource::Workers { fan_in, .. } => Some(fan_in.peak_in_flight()),
            _ => None,
        }
    }

    /// Capacity of the worker queue, when the instances come from workers.
    pub fn queue_capacity(&self) -> Option<usize> {
        match &self.source {
            InstanceSource::Workers { fan_in, .. } => fan_in.capacity(),
            _ => None,
        }
    }
}

impl<R: DatasetReader> Iterator for Instances<'_, R> {
    type Item = Result<Instance>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.source.next() {
            Some(Ok(instance)) => {
                if let Some(staging) = self.staging.as_mut() {
                    staging.push(instance.clone());
                }
                Some(Ok(instance))
            }
            Some(Err(e)) => {
                self.failed = true;
                self.staging = None;
                Some(Err(e))
            }
            None => {
                if let Some(staging) = self.staging.take() {
                    info!("Cached {} instances", staging.len());
                    *self.cache_slot = Some(Arc::new(staging));
                }
                None
            }
        }
    }
}

/// One pass of batches over the data.
pub(crate) enum BatchGenerator<R> {
    InProcess(Batches<InstanceSource<R>>),
    Workers(FanIn<MiniBatch>),
}

impl<R: DatasetReader> Iterator for BatchGenerator<R> {
    type Item = Result<MiniBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BatchGenerator::InProcess(batches) => batches.next(),
            BatchGenerator::Workers(fan_in) => fan_in.next(),
        }
    }
}

/// Iterator over the batches of one epoch.
///
/// Created by calling `dataloader.iter()`. Without `batches_per_epoch` this
/// is a single pass over the data. With it, exactly `batches_per_epoch`
/// batches are yielded, drawn from a generator kept in the loader between
/// calls and restarted whenever it runs dry. The first error ends the epoch.
pub struct DataLoaderIter<'a, R, C>
where
    R: DatasetReader + Clone,
    C: Collator,
{
    loader: &'a mut DataLoader<R, C>,
    remaining: Option<usize>,
    generator: Option<BatchGenerator<R>>,
    fused: bool,
}

impl<'a, R, C> DataLoaderIter<'a, R, C>
where
    R: DatasetReader + Clone,
    C: Collator,
{
    pub(crate) fn new(loader: &'a mut DataLoader<R, C>) -> Self {
        let remaining = loader.config.batches_per_epoch;
        Self {
            loader,
            remaining,
            generator: None,
            fused: false,
        }
    }

    fn next_single_pass(&mut self) -> Option<Result<MiniBatch>> {
        if self.generator.is_none() {
            match self.loader.new_batch_generator() {
                Ok(generator) => self.generator = Some(generator),
                Err(e) => {
                    self.fused = true;
                    return Some(Err(e));
                }
            }
        }
        let generator = self.generator.as_mut()?;
        match generator.next() {
            Some(Ok(batch)) => Some(Ok(batch)),
            Some(Err(e)) => {
                self.fused = true;
                self.generator = None;
                Some(Err(e))
            }
            None => {
                self.fused = true;
                self.generator = None;
                None
            }
        }
    }

    fn next_fixed_length(&mut self) -> Option<Result<MiniBatch>> {
        let mut fresh = false;
        loop {
            if self.loader.persistent_generator.is_none() {
                match self.loader.new_batch_generator() {
                    Ok(generator) => self.loader.persistent_generator = Some(generator),
                    Err(e) => {
                        self.fused = true;
                        return Some(Err(e));
                    }
                }
                fresh = true;
            }

            let generator = self.loader.persistent_generator.as_mut()?;
            match generator.next() {
                Some(Ok(batch)) => return Some(Ok(batch)),
                Some(Err(e)) => {
                    self.fused = true;
                    self.loader.persistent_generator = None;
                    return Some(Err(e));
                }
                None => {
                    self.loader.persistent_generator = None;
                    // A fresh pass with nothing in it: the source is empty.
                    if fresh {
                        self.fused = true;
                        return None;
                    }
                }
            }
        }
    }
}

impl<R, C> Iterator for DataLoaderIter<'_, R, C>
where
    R: DatasetReader + Clone,
    C: Collator,
{
    type Item = Result<MiniBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        match self.remaining {
            None => self.next_single_pass(),
            Some(0) => {
                self.fused = true;
                None
            }
            Some(remaining) => {
                let item = self.next_fixed_length();
                if matches!(item, Some(Ok(_))) {
                    self.remaining = Some(remaining - 1);
                }
                item
            }
        }
    }
}
