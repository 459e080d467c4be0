//! Serializable form of `DataLoaderConfig`, for loaders configured from JSON.
//!
//! ```json
//! {
//!   "num_workers": 2,
//!   "max_instances_in_memory": 64,
//!   "batch_sampler": {"type": "bucket", "batch_size": 16, "sorting_keys": ["tokens"]}
//! }
//! ```

use super::config::{DataLoaderConfig, StartMethod};
use crate::minibatch::Device;
use crate::sampler::{BatchSampler, BucketBatchSampler, MaxTokensBatchSampler};
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum BatchSamplerParams {
    Bucket {
        batch_size: usize,
        #[serde(default)]
        sorting_keys: Option<Vec<String>>,
        #[serde(default)]
        padding_noise: Option<f64>,
        #[serde(default)]
        drop_last: bool,
        #[serde(default)]
        shuffle: Option<bool>,
    },
    MaxTokens {
        max_tokens: usize,
        #[serde(default)]
        sorting_keys: Option<Vec<String>>,
        #[serde(default)]
        padding_noise: Option<f64>,
        #[serde(default)]
        shuffle: Option<bool>,
    },
}

impl BatchSamplerParams {
    pub fn build(&self, seed: u64) -> Result<Arc<dyn BatchSampler>> {
        let sampler: Arc<dyn BatchSampler> = match self.clone() {
            BatchSamplerParams::Bucket {
                batch_size,
                sorting_keys,
                padding_noise,
                drop_last,
                shuffle,
            } => {
                let mut sampler = BucketBatchSampler::new(batch_size, seed)?.drop_last(drop_last);
                if let Some(keys) = sorting_keys {
                    sampler = sampler.with_sorting_keys(keys);
                }
                if let Some(noise) = padding_noise {
                    sampler = sampler.with_padding_noise(noise)?;
                }
                if let Some(shuffle) = shuffle {
                    sampler = sampler.shuffle(shuffle);
                }
                Arc::new(sampler)
            }
            BatchSamplerParams::MaxTokens {
                max_tokens,
                sorting_keys,
                padding_noise,
                shuffle,
            } => {
                let mut sampler = MaxTokensBatchSampler::new(max_tokens, seed)?;
                if let Some(keys) = sorting_keys {
                    sampler = sampler.with_sorting_keys(keys);
                }
                if let Some(noise) = padding_noise {
                    sampler = sampler.with_padding_noise(noise)?;
                }
                if let Some(shuffle) = shuffle {
                    sampler = sampler.shuffle(shuffle);
                }
                Arc::new(sampler)
            }
        };
        Ok(sampler)
    }
}

/// Every `DataLoaderConfig` option, with `join_timeout` in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataLoaderParams {
    pub batch_size: Option<usize>,
    pub drop_last: bool,
    pub shuffle: bool,
    pub batch_sampler: Option<BatchSamplerParams>,
    pub batches_per_epoch: Option<usize>,
    pub num_workers: usize,
    pub max_instances_in_memory: Option<usize>,
    pub start_method: StartMethod,
    pub pin_memory: bool,
    pub device: Option<Device>,
    pub seed: Option<u64>,
    pub join_timeout_secs: Option<f64>,
}

impl DataLoaderParams {
    /// Builds the config. The sampler is seeded with `seed` when given.
    pub fn into_config(self) -> Result<DataLoaderConfig> {
        let mut config = DataLoaderConfig {
            batch_size: self.batch_size,
            drop_last: self.drop_last,
            shuffle: self.shuffle,
            batch_sampler: None,
            batches_per_epoch: self.batches_per_epoch,
            num_workers: self.num_workers,
            max_instances_in_memory: self.max_instances_in_memory,
            start_method: self.start_method,
            pin_memory: self.pin_memory,
            device: self.device,
            seed: self.seed,
            ..DataLoaderConfig::default()
        };

        if let Some(secs) = self.join_timeout_secs {
            config.join_timeout = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("Invalid join_timeout_secs: {}", secs))?;
        }
        if let Some(sampler) = &self.batch_sampler {
            let seed = self.seed.unwrap_or_else(|| rand::rng().random());
            config.batch_sampler = Some(sampler.build(seed)?);
        }
        Ok(config)
    }
}

impl DataLoaderConfig {
    /// Parses a JSON object of [`DataLoaderParams`]. Unknown keys are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: DataLoaderParams =
            serde_json::from_str(json).context("Invalid data loader configuration")?;
        params.into_config()
    }
}
