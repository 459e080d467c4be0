use anyhow::Result;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use data_loader::{
    dataloader::{DataLoader, DataLoaderConfig},
    instance::{Instance, TextField, TokenIndexer},
    reader::{shard_iter, DatasetReader, InstanceIter, WorkerInfo},
    sampler::{BatchSampler, BucketBatchSampler},
    vocab::Vocabulary,
};
use std::path::Path;
use std::sync::Arc;

/// Benchmarks for batch production.
///
/// This measures:
/// 1. Loader throughput: in-process batching vs. batch workers
/// 2. Bucketing: the cost of `BucketBatchSampler` over one window
///
/// To run these, use:
/// ```bash
/// cargo bench --bench batching_bench
/// ```

const SIZES: [usize; 3] = [1_000, 10_000, 50_000];
const BATCH_SIZE: usize = 32;

fn sentence(i: usize) -> String {
    (0..(i % 40) + 1)
        .map(|j| format!("tok{}", (i * 31 + j) % 500))
        .collect::<Vec<_>>()
        .join(" ")
}

fn instance(i: usize) -> Instance {
    Instance::new().with_field("tokens", TextField::from_text(&sentence(i)))
}

#[derive(Clone)]
struct SyntheticReader {
    size: usize,
}

impl DatasetReader for SyntheticReader {
    fn read(&self, _: &Path, shard: Option<WorkerInfo>) -> Result<InstanceIter> {
        Ok(shard_iter((0..self.size).map(|i| Ok(instance(i))), shard))
    }

    fn apply_token_indexers(&self, instance: &mut Instance) {
        for text in instance.text_fields_mut() {
            text.set_token_indexer(TokenIndexer::default());
        }
    }
}

fn vocab() -> Arc<Vocabulary> {
    let mut vocab = Vocabulary::new();
    for i in 0..500 {
        vocab.add_token_to_namespace(&format!("tok{}", i), "tokens");
    }
    Arc::new(vocab)
}

/// Measure batches per second for each loading topology.
fn bench_loader(c: &mut Criterion) {
    let mut group = c.benchmark_group("Loader Throughput");
    group.sample_size(10);
    let vocab = vocab();

    for &size in &SIZES {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("in_process", size), &size, |b, &size| {
            b.iter(|| {
                let config = DataLoaderConfig::builder()
                    .batch_size(BATCH_SIZE)
                    .shuffle(true)
                    .max_instances_in_memory(1024)
                    .seed(0)
                    .build();
                let mut loader = DataLoader::new(SyntheticReader { size }, "synthetic", config)
                    .expect("valid config");
                loader.index_with(Arc::clone(&vocab));
                let cnt = loader.iter().expect("indexed").count();
                black_box(cnt);
            })
        });

        for workers in [2, 4] {
            group.bench_with_input(
                BenchmarkId::new(format!("batch_workers_{}", workers), size),
                &size,
                |b, &size| {
                    b.iter(|| {
                        let config = DataLoaderConfig::builder()
                            .batch_size(BATCH_SIZE)
                            .shuffle(true)
                            .num_workers(workers)
                            .max_instances_in_memory(1024)
                            .seed(0)
                            .build();
                        let mut loader =
                            DataLoader::new(SyntheticReader { size }, "synthetic", config)
                                .expect("valid config");
                        loader.index_with(Arc::clone(&vocab));
                        let cnt = loader.iter().expect("indexed").count();
                        black_box(cnt);
                    })
                },
            );
        }
    }
    group.finish();
}

/// Measure sorting one window into length buckets.
fn bench_bucketing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Bucketing");

    for &size in &SIZES {
        let instances: Vec<Instance> = (0..size).map(instance).collect();
        let sampler = BucketBatchSampler::new(BATCH_SIZE, 0).expect("valid batch size");

        group.bench_with_input(BenchmarkId::new("bucket", size), &instances, |b, instances| {
            b.iter(|| {
                let batches = sampler.get_batch_indices(instances);
                black_box(batches.len());
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_loader, bench_bucketing);
criterion_main!(benches);
