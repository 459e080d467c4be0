use crate::instance::Instance;
use anyhow::{ensure, Result};
use log::warn;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Groups a window of instances into batches of indices.
///
/// The loader calls `get_batch_indices` once per window; every returned index
/// must be `< instances.len()`. `get_num_batches` is only used to report the
/// length of a fully in-memory loader.
///
/// Samplers are shared across worker threads, so any per-epoch state lives
/// behind atomics.
pub trait BatchSampler: Send + Sync + 'static {
    fn get_batch_indices(&self, instances: &[Instance]) -> Vec<Vec<usize>>;

    fn get_num_batches(&self, instances: &[Instance]) -> usize;
}

/// Sort key of one instance: the lengths of the named fields, or the longest
/// text field when no names are given.
fn sort_key(instance: &Instance, sorting_keys: Option<&[String]>) -> Vec<usize> {
    match sorting_keys {
        Some(keys) => keys
            .iter()
            .map(|key| instance.field_len(key).unwrap_or(0))
            .collect(),
        None => vec![instance.max_text_len()],
    }
}

/// Adds uniform noise of `±noise * len` to each length so that instances of
/// the same length do not always end up in the same batch.
fn noisy_keys(keys: Vec<usize>, noise: f64, rng: &mut StdRng) -> Vec<f64> {
    keys.into_iter()
        .map(|len| {
            let len = len as f64;
            if noise > 0.0 && len > 0.0 {
                let spread = noise * len;
                len + rng.random_range(-spread..=spread)
            } else {
                len
            }
        })
        .collect()
}

/// Returns indices of `instances` sorted by (possibly noisy) sort key, and the
/// unperturbed maximum length of each instance.
fn argsort_by_length(
    instances: &[Instance],
    sorting_keys: Option<&[String]>,
    noise: f64,
    rng: &mut StdRng,
) -> (Vec<usize>, Vec<usize>) {
    let mut keyed: Vec<(Vec<f64>, usize)> = instances
        .iter()
        .enumerate()
        .map(|(i, instance)| (noisy_keys(sort_key(instance, sorting_keys), noise, rng), i))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let lengths = instances
        .iter()
        .map(|instance| {
            sort_key(instance, sorting_keys)
                .into_iter()
                .max()
                .unwrap_or(0)
        })
        .collect();
    (keyed.into_iter().map(|(_, i)| i).collect(), lengths)
}

/// Hands out one RNG per call, seeded `base_seed + epoch`.
#[derive(Debug)]
struct EpochSeeds {
    base_seed: u64,
    epoch: AtomicU64,
}

impl EpochSeeds {
    fn new(base_seed: u64) -> Self {
        Self {
            base_seed,
            epoch: AtomicU64::new(0),
        }
    }

    fn next_rng(&self) -> StdRng {
        let epoch = self.epoch.fetch_add(1, AtomicOrdering::Relaxed);
        StdRng::seed_from_u64(self.base_seed.wrapping_add(epoch))
    }
}

/// ============================================================================
/// A `BatchSampler` that groups instances of similar length.
///
/// 1. Sorts the window by the lengths of `sorting_keys` (or of the longest text
///    field), optionally perturbed by `padding_noise`.
/// 2. Splits the sorted indices into consecutive batches of `batch_size`,
///    dropping a short final batch when `drop_last`.
/// 3. Shuffles the order of the batches (not their contents) with a
///    deterministic RNG seeded `base_seed + epoch`.
///
/// # Example
/// ```ignore
/// let sampler = BucketBatchSampler::new(32, 42)?
///     .with_sorting_keys(["tokens"])
///     .with_padding_noise(0.1)?;
/// let config = DataLoaderConfig::builder().batch_sampler(sampler).build();
/// ```
#[derive(Debug)]
pub struct BucketBatchSampler {
    batch_size: usize,
    sorting_keys: Option<Vec<String>>,
    padding_noise: f64,
    drop_last: bool,
    shuffle: bool,
    seeds: EpochSeeds,
}

impl BucketBatchSampler {
    pub fn new(batch_size: usize, base_seed: u64) -> Result<Self> {
        ensure!(
            batch_size > 0,
            "Batch size must be >= 1, but got batch_size={}",
            batch_size
        );
        Ok(Self {
            batch_size,
            sorting_keys: None,
            padding_noise: 0.1,
            drop_last: false,
            shuffle: true,
            seeds: EpochSeeds::new(base_seed),
        })
    }

    pub fn with_sorting_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sorting_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_padding_noise(mut self, padding_noise: f64) -> Result<Self> {
        ensure!(
            padding_noise.is_finite(),
            "padding_noise must be finite, but got padding_noise={}",
            padding_noise
        );
        self.padding_noise = padding_noise.max(0.0);
        Ok(self)
    }

    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }
}

impl BatchSampler for BucketBatchSampler {
    fn get_batch_indices(&self, instances: &[Instance]) -> Vec<Vec<usize>> {
        let mut rng = self.seeds.next_rng();
        let (sorted, _) = argsort_by_length(
            instances,
            self.sorting_keys.as_deref(),
            self.padding_noise,
            &mut rng,
        );

        let mut batches: Vec<Vec<usize>> = sorted
            .chunks(self.batch_size)
            .filter(|chunk| !self.drop_last || chunk.len() == self.batch_size)
            .map(<[usize]>::to_vec)
            .collect();

        if self.shuffle && batches.len() > 1 {
            batches.shuffle(&mut rng);
        }
        batches
    }

    fn get_num_batches(&self, instances: &[Instance]) -> usize {
        let n = instances.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }
}

/// ============================================================================
/// A `BatchSampler` that bounds the number of padded tokens per batch.
///
/// Instances are sorted by length as in [`BucketBatchSampler`], then grouped
/// greedily so that `batch_len * longest_instance <= max_tokens`. An instance
/// longer than `max_tokens` gets a batch of its own.
#[derive(Debug)]
pub struct MaxTokensBatchSampler {
    max_tokens: usize,
    sorting_keys: Option<Vec<String>>,
    padding_noise: f64,
    shuffle: bool,
    seeds: EpochSeeds,
}

impl MaxTokensBatchSampler {
    pub fn new(max_tokens: usize, base_seed: u64) -> Result<Self> {
        ensure!(
            max_tokens > 0,
            "max_tokens must be >= 1, but got max_tokens={}",
            max_tokens
        );
        Ok(Self {
            max_tokens,
            sorting_keys: None,
            padding_noise: 0.1,
            shuffle: true,
            seeds: EpochSeeds::new(base_seed),
        })
    }

    pub fn with_sorting_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sorting_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_padding_noise(mut self, padding_noise: f64) -> Result<Self> {
        ensure!(
            padding_noise.is_finite(),
            "padding_noise must be finite, but got padding_noise={}",
            padding_noise
        );
        self.padding_noise = padding_noise.max(0.0);
        Ok(self)
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    fn group(&self, sorted: &[usize], lengths: &[usize]) -> Vec<Vec<usize>> {
        let mut batches = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut longest = 0;

        for &index in sorted {
            let len = lengths[index];
            if len > self.max_tokens {
                warn!(
                    "Instance {} has {} tokens, more than max_tokens={}",
                    index, len, self.max_tokens
                );
            }
            let candidate = longest.max(len);
            if !current.is_empty() && (current.len() + 1) * candidate > self.max_tokens {
                batches.push(std::mem::take(&mut current));
                longest = 0;
            }
            longest = longest.max(len);
            current.push(index);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}

impl BatchSampler for MaxTokensBatchSampler {
    fn get_batch_indices(&self, instances: &[Instance]) -> Vec<Vec<usize>> {
        let mut rng = self.seeds.next_rng();
        let (sorted, lengths) = argsort_by_length(
            instances,
            self.sorting_keys.as_deref(),
            self.padding_noise,
            &mut rng,
        );
        let mut batches = self.group(&sorted, &lengths);
        if self.shuffle && batches.len() > 1 {
            batches.shuffle(&mut rng);
        }
        batches
    }

    /// Counted without padding noise.
    fn get_num_batches(&self, instances: &[Instance]) -> usize {
        let mut rng = StdRng::seed_from_u64(0);
        let (sorted, lengths) =
            argsort_by_length(instances, self.sorting_keys.as_deref(), 0.0, &mut rng);
        self.group(&sorted, &lengths).len()
    }
}
