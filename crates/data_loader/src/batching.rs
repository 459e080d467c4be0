//! Turns a stream of instances into a stream of collated batches.
//!
//! The same builder runs on the consuming thread (in-process topology) and
//! inside each batch worker.

use crate::collator::Collator;
use crate::instance::Instance;
use crate::minibatch::{Device, MiniBatch};
use crate::sampler::BatchSampler;
use crate::vocab::Vocabulary;
use anyhow::{bail, Result};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;

/// Number of instances grouped together before batching.
///
/// Each of `num_workers` workers (or the single in-process reader) holds at
/// most `max_instances_in_memory / num_workers` instances, rounded up to a
/// whole number of batches. `None` means the whole stream is one window.
pub fn window_size(
    max_instances_in_memory: Option<usize>,
    batch_size: Option<usize>,
    num_workers: usize,
) -> Option<usize> {
    let max_instances = max_instances_in_memory?;
    let mut window = (max_instances / num_workers.max(1)).max(1);
    if let Some(batch_size) = batch_size.filter(|&b| b > 1) {
        let remainder = window % batch_size;
        if remainder != 0 {
            window += batch_size - remainder;
        }
    }
    Some(window)
}

/// Batching settings plus the shared collaborators needed to build batches.
#[derive(Clone)]
pub struct BatchBuilder {
    pub(crate) batch_size: Option<usize>,
    pub(crate) drop_last: bool,
    pub(crate) shuffle: bool,
    pub(crate) batch_sampler: Option<Arc<dyn BatchSampler>>,
    pub(crate) window: Option<usize>,
    pub(crate) pin_memory: bool,
    pub(crate) device: Option<Device>,
    pub(crate) collator: Arc<dyn Collator>,
    pub(crate) vocab: Arc<Vocabulary>,
}

impl std::fmt::Debug for BatchBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchBuilder")
            .field("batch_size", &self.batch_size)
            .field("drop_last", &self.drop_last)
            .field("shuffle", &self.shuffle)
            .field("batch_sampler", &self.batch_sampler.is_some())
            .field("window", &self.window)
            .field("pin_memory", &self.pin_memory)
            .field("device", &self.device)
            .finish()
    }
}

impl BatchBuilder {
    /// Lazily batches `instances`. `seed` drives the within-window shuffle.
    pub fn batches<I>(&self, instances: I, seed: u64) -> Batches<I>
    where
        I: Iterator<Item = Result<Instance>>,
    {
        Batches {
            builder: self.clone(),
            source: instances,
            rng: StdRng::seed_from_u64(seed),
            window: Vec::new(),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    fn group(&self, window: &[Instance]) -> Result<Vec<Vec<usize>>> {
        if let Some(sampler) = &self.batch_sampler {
            let groups = sampler.get_batch_indices(window);
            for group in &groups {
                if let Some(&bad) = group.iter().find(|&&i| i >= window.len()) {
                    bail!(
                        "Batch sampler returned index {} for a window of {} instances",
                        bad,
                        window.len()
                    );
                }
            }
            return Ok(groups.into_iter().filter(|g| !g.is_empty()).collect());
        }

        let batch_size = match self.batch_size {
            Some(batch_size) => batch_size,
            None => bail!("batch_size is required when batch_sampler is not supplied"),
        };
        let indices: Vec<usize> = (0..window.len()).collect();
        Ok(indices
            .chunks(batch_size)
            .filter(|chunk| !self.drop_last || chunk.len() == batch_size)
            .map(<[usize]>::to_vec)
            .collect())
    }

    fn build(&self, window: &[Instance], group: &[usize]) -> Result<MiniBatch> {
        let instances: Vec<Instance> = group.iter().map(|&i| window[i].clone()).collect();
        let mut batch = self.collator.collate(&instances)?;
        if self.pin_memory {
            batch = batch.pin_memory();
        }
        if let Some(device) = self.device {
            batch = batch.to_device(device);
        }
        Ok(batch)
    }
}

/// Iterator returned by [`BatchBuilder::batches`].
///
/// Pulls one window at a time from the source, so at most one window of
/// instances is held in memory. The first error ends the stream.
pub struct Batches<I> {
    builder: BatchBuilder,
    source: I,
    rng: StdRng,
    window: Vec<Instance>,
    pending: VecDeque<Vec<usize>>,
    exhausted: bool,
}

impl<I> Batches<I>
where
    I: Iterator<Item = Result<Instance>>,
{
    /// Reads the next window. Returns `Ok(false)` once the source is empty.
    fn fill_window(&mut self) -> Result<bool> {
        self.window.clear();
        let limit = self.builder.window.unwrap_or(usize::MAX);
        while self.window.len() < limit {
            match self.source.next() {
                Some(instance) => {
                    let mut instance = instance?;
                    instance.index_fields(&self.builder.vocab);
                    self.window.push(instance);
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if self.window.is_empty() {
            return Ok(false);
        }

        if self.builder.shuffle {
            self.window.shuffle(&mut self.rng);
        }
        self.pending = self.builder.group(&self.window)?.into();
        Ok(true)
    }
}

impl<I> Iterator for Batches<I>
where
    I: Iterator<Item = Result<Instance>>,
{
    type Item = Result<MiniBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(group) = self.pending.pop_front() {
                return Some(self.builder.build(&self.window, &group));
            }
            if self.exhausted {
                return None;
            }
            match self.fill_window() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.exhausted = true;
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}
