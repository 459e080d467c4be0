//! Basic single-threaded tests for DataLoader functionality.
//!
//! Tests cover:
//! - Configuration validation
//! - Batching with and without drop_last
//! - Determinism and seeded shuffling
//! - Fixed-length epochs (batches_per_epoch)
//! - Length, indexing and caching

mod common;
use common::{ids, init_logging, sentences, vocab_for, MemoryReader};
use data_loader::{
    dataloader::{DataLoader, DataLoaderConfig, StartMethod},
    error::{loader_error, LoaderError},
    minibatch::{Device, MiniBatch},
    sampler::BucketBatchSampler,
    vocab::Vocabulary,
};

use anyhow::Result;
use ndarray::Ix2;
use std::sync::atomic::Ordering;

fn loader(records: Vec<String>, config: DataLoaderConfig) -> Result<DataLoader<MemoryReader>> {
    let vocab = vocab_for(&records)?;
    let mut loader = DataLoader::new(MemoryReader::new(records), "memory", config)?;
    loader.index_with(vocab);
    Ok(loader)
}

fn collect_ids(batches: &[MiniBatch]) -> Result<Vec<Vec<u64>>> {
    batches.iter().map(ids).collect()
}

fn config_error(config: DataLoaderConfig) -> Option<String> {
    match DataLoader::new(MemoryReader::new(sentences(4)), "memory", config) {
        Ok(_) => None,
        Err(e) => match loader_error(&e) {
            Some(LoaderError::Config(message)) => Some(message.clone()),
            _ => None,
        },
    }
}

// ================================================================================================
// 1. Configuration
// ================================================================================================
#[test]
fn test_sampler_excludes_batch_options() -> Result<()> {
    let sampler = || BucketBatchSampler::new(2, 0);

    let with_size = DataLoaderConfig::builder()
        .batch_sampler(sampler()?)
        .batch_size(2)
        .build();
    assert_eq!(
        config_error(with_size).as_deref(),
        Some("batch_sampler option is mutually exclusive with batch_size")
    );

    let with_drop = DataLoaderConfig::builder()
        .batch_sampler(sampler()?)
        .drop_last(true)
        .build();
    assert_eq!(
        config_error(with_drop).as_deref(),
        Some("batch_sampler option is mutually exclusive with drop_last")
    );

    let with_shuffle = DataLoaderConfig::builder()
        .batch_sampler(sampler()?)
        .shuffle(true)
        .build();
    assert_eq!(
        config_error(with_shuffle).as_deref(),
        Some("batch_sampler option is mutually exclusive with shuffle")
    );

    let neither = DataLoaderConfig::builder().build();
    assert_eq!(
        config_error(neither).as_deref(),
        Some("batch_size is required when batch_sampler is not supplied")
    );
    Ok(())
}

#[test]
fn test_max_instances_below_batch_size() {
    let config = DataLoaderConfig::builder()
        .batch_size(8)
        .max_instances_in_memory(5)
        .build();
    assert_eq!(
        config_error(config).as_deref(),
        Some("max_instances_in_memory must be at least batch_size")
    );
}

#[test]
fn test_pinning_with_workers_needs_spawn() {
    let fork = DataLoaderConfig::builder()
        .batch_size(2)
        .num_workers(2)
        .pin_memory(true)
        .build();
    assert!(config_error(fork).is_some());

    let spawn = DataLoaderConfig::builder()
        .batch_size(2)
        .num_workers(2)
        .pin_memory(true)
        .start_method(StartMethod::Spawn)
        .build();
    assert_eq!(config_error(spawn), None);
}

#[test]
fn test_config_from_json() -> Result<()> {
    let config = DataLoaderConfig::from_json(
        r#"{"batch_size": 4, "drop_last": true, "num_workers": 2,
            "max_instances_in_memory": 16, "start_method": "spawn", "seed": 7}"#,
    )?;
    assert_eq!(config.batch_size, Some(4));
    assert!(config.drop_last);
    assert_eq!(config.start_method, StartMethod::Spawn);

    let mut lazy = loader(sentences(8), config)?;
    assert!(lazy.len().is_err());
    Ok(())
}

// ================================================================================================
// 2. Batching
// ================================================================================================
#[test]
fn test_drop_last() -> Result<()> {
    init_logging();
    let dropped = DataLoaderConfig::builder().batch_size(4).drop_last(true).build();
    let batches: Vec<_> = loader(sentences(11), dropped)?.iter()?.collect::<Result<_>>()?;
    assert_eq!(batches.len(), 2);

    let kept = DataLoaderConfig::builder().batch_size(4).build();
    let batches: Vec<_> = loader(sentences(11), kept)?.iter()?.collect::<Result<_>>()?;
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[2].batch_size()?, 3);
    Ok(())
}

#[test]
fn test_two_iterations_are_identical() -> Result<()> {
    let config = DataLoaderConfig::builder().batch_size(3).build();
    let mut loader = loader(sentences(10), config)?;

    let first: Vec<_> = loader.iter()?.collect::<Result<_>>()?;
    let second: Vec<_> = loader.iter()?.collect::<Result<_>>()?;

    assert_eq!(first, second);
    assert_eq!(
        collect_ids(&first)?,
        vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9]]
    );
    Ok(())
}

#[test]
fn test_text_fields_are_padded() -> Result<()> {
    let config = DataLoaderConfig::builder().batch_size(5).build();
    let batches: Vec<_> = loader(sentences(5), config)?.iter()?.collect::<Result<_>>()?;
    let tokens = batches[0].get("tokens")?.clone().into_dimensionality::<Ix2>()?;
    // Sentences have 1..=5 tokens.
    assert_eq!(tokens.shape(), &[5, 5]);
    assert_eq!(tokens[[0, 1]], 0);
    assert_ne!(tokens[[4, 4]], 0);
    Ok(())
}

#[test]
fn test_seeded_shuffle() -> Result<()> {
    let config = || DataLoaderConfig::builder().batch_size(4).shuffle(true).seed(13).build();

    let mut a = loader(sentences(20), config())?;
    let mut b = loader(sentences(20), config())?;
    let first_a: Vec<_> = a.iter()?.collect::<Result<_>>()?;
    let first_b: Vec<_> = b.iter()?.collect::<Result<_>>()?;
    assert_eq!(collect_ids(&first_a)?, collect_ids(&first_b)?);

    let mut seen: Vec<u64> = collect_ids(&first_a)?.into_iter().flatten().collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());

    let second_a: Vec<_> = a.iter()?.collect::<Result<_>>()?;
    println!(
        "epoch 0: {:?}\nepoch 1: {:?}",
        collect_ids(&first_a)?,
        collect_ids(&second_a)?
    );
    assert_ne!(collect_ids(&first_a)?, collect_ids(&second_a)?);
    Ok(())
}

#[test]
fn test_bucket_sampler_covers_everything() -> Result<()> {
    let config = DataLoaderConfig::builder()
        .batch_sampler(BucketBatchSampler::new(3, 5)?.with_sorting_keys(["tokens"]))
        .build();
    let mut loader = loader(sentences(14), config)?;
    let batches: Vec<_> = loader.iter()?.collect::<Result<_>>()?;

    assert_eq!(loader.len()?, batches.len());
    let mut seen: Vec<u64> = collect_ids(&batches)?.into_iter().flatten().collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..14).collect::<Vec<_>>());
    for batch in &batches {
        assert!(batch.batch_size()? <= 3);
    }
    Ok(())
}

#[test]
fn test_pin_and_device() -> Result<()> {
    let config = DataLoaderConfig::builder()
        .batch_size(2)
        .pin_memory(true)
        .device(Device::Cuda(0))
        .build();
    for batch in loader(sentences(4), config)?.iter()? {
        let batch = batch?;
        assert!(batch.is_pinned());
        assert_eq!(batch.device(), Device::Cuda(0));
    }
    Ok(())
}

// ================================================================================================
// 3. Fixed-length epochs
// ================================================================================================
#[test]
fn test_batches_per_epoch_spans_passes() -> Result<()> {
    let config = DataLoaderConfig::builder()
        .batch_size(2)
        .batches_per_epoch(5)
        .build();
    let mut loader = loader(sentences(4), config)?;

    let first: Vec<_> = loader.iter()?.collect::<Result<_>>()?;
    assert_eq!(first.len(), 5);
    assert_eq!(
        collect_ids(&first)?,
        vec![vec![0, 1], vec![2, 3], vec![0, 1], vec![2, 3], vec![0, 1]]
    );

    // The next epoch picks up where the last one stopped.
    let second: Vec<_> = loader.iter()?.collect::<Result<_>>()?;
    assert_eq!(second.len(), 5);
    assert_eq!(ids(&second[0])?, vec![2, 3]);

    assert_eq!(loader.iter()?.count(), 5);
    Ok(())
}

#[test]
fn test_batches_per_epoch_on_empty_source() -> Result<()> {
    let config = DataLoaderConfig::builder()
        .batch_size(2)
        .batches_per_epoch(3)
        .build();
    let mut loader = loader(Vec::new(), config)?;
    assert_eq!(loader.iter()?.count(), 0);
    Ok(())
}

// ================================================================================================
// 4. Length, indexing and caching
// ================================================================================================
#[test]
fn test_len() -> Result<()> {
    let mut kept = loader(sentences(11), DataLoaderConfig::builder().batch_size(4).build())?;
    assert_eq!(kept.len()?, 3);

    let dropped_config = DataLoaderConfig::builder().batch_size(4).drop_last(true).build();
    let mut dropped = loader(sentences(11), dropped_config)?;
    assert_eq!(dropped.len()?, 2);

    let fixed_config = DataLoaderConfig::builder()
        .batch_size(4)
        .batches_per_epoch(9)
        .max_instances_in_memory(4)
        .build();
    assert_eq!(loader(sentences(11), fixed_config)?.len()?, 9);

    let lazy_config = DataLoaderConfig::builder()
        .batch_size(4)
        .max_instances_in_memory(4)
        .build();
    let err = loader(sentences(11), lazy_config)?.len().unwrap_err();
    assert_eq!(loader_error(&err), Some(&LoaderError::LengthUnknown));
    Ok(())
}

#[test]
fn test_iter_before_index_with() -> Result<()> {
    let config = DataLoaderConfig::builder().batch_size(2).build();
    let mut loader = DataLoader::new(MemoryReader::new(sentences(4)), "memory", config)?;
    let err = loader.iter().err().expect("iteration without a vocabulary");
    assert_eq!(loader_error(&err), Some(&LoaderError::NotIndexed));

    // Raw instances do not need a vocabulary.
    assert_eq!(loader.iter_instances()?.count(), 4);
    Ok(())
}

#[test]
fn test_cache_is_filled_once() -> Result<()> {
    let reader = MemoryReader::new(sentences(6));
    let reads = reader.reads.clone();
    let config = DataLoaderConfig::builder().batch_size(2).build();
    let mut loader = DataLoader::new(reader, "memory", config)?;
    loader.index_with(vocab_for(&sentences(6))?);

    assert_eq!(loader.cached_len(), None);
    assert_eq!(loader.len()?, 3);
    assert_eq!(loader.cached_len(), Some(6));
    loader.iter()?.collect::<Result<Vec<_>>>()?;
    loader.iter_instances()?.collect::<Result<Vec<_>>>()?;
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_abandoned_read_leaves_no_cache() -> Result<()> {
    let config = DataLoaderConfig::builder().batch_size(2).build();
    let mut loader = DataLoader::new(MemoryReader::new(sentences(6)), "memory", config)?;
    let first = loader.iter_instances()?.take(2).count();
    assert_eq!(first, 2);
    assert_eq!(loader.cached_len(), None);

    assert_eq!(loader.iter_instances()?.count(), 6);
    assert_eq!(loader.cached_len(), Some(6));
    Ok(())
}

#[test]
fn test_index_with_reindexes_cache() -> Result<()> {
    let config = DataLoaderConfig::builder().batch_size(4).build();
    let mut loader = loader(sentences(4), config)?;
    let before: Vec<_> = loader.iter()?.collect::<Result<_>>()?;
    assert!(before[0].get("tokens")?.iter().any(|&id| id > 1));

    // An empty vocabulary maps every token to the OOV id.
    loader.index_with(Vocabulary::new());
    let after: Vec<_> = loader.iter()?.collect::<Result<_>>()?;
    let tokens = after[0].get("tokens")?;
    assert!(tokens.iter().all(|&id| id == 0 || id == 1));
    assert_eq!(loader.cached_len(), Some(4));
    Ok(())
}
