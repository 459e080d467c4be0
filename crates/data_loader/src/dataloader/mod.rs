//! src/dataloader/mod.rs
//!
//! This module implements the `DataLoader`.
//!
//! The `DataLoader` coordinates a `DatasetReader`, a `BatchSampler` and a
//! `Collator` to turn a data file into batches. Reading can be spread over
//! worker threads, each producing one shard of the data into a bounded queue
//! that the consuming thread fans in.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌───────────────┐
//!                  │ DatasetReader │ read(path, shard)
//!                  └───────┬───────┘
//!                          │ instances
//!                          ↓
//!        ┌──────────────────────────────────┐
//!        │ [Worker Threads] (num_workers>0) │ one shard each
//!        └────────────────┬─────────────────┘
//!                         │ WorkerMessage: Value* [Error] Done
//!                         ↓
//!                  ┌──────────────┐
//!                  │   AckQueue   │ bounded by unacknowledged messages
//!                  └──────┬───────┘
//!                         │ fan-in + ack
//!                         ↓
//!                  ┌──────────────┐
//!                  │  DataLoader  │ ←───── Config (batch_size, workers, etc.)
//!                  └──────┬───────┘
//!                         │ windows of instances
//!                         ↓
//!              ┌──────────────────────┐
//!              │ BatchSampler/Collator│ group, pad, pin, move
//!              └──────────┬───────────┘
//!                         ↓
//!                   ┌───────────┐
//!                   │ MiniBatch │ (ready for model)
//!                   └───────────┘
//! ```
//!
//! Batch workers run the sampler and collator themselves and send finished
//! batches through the queue instead of instances.
//!
//! # Module Structure
//!
//! ```text
//! src/dataloader/
//! ├── mod.rs             # Public API exports + module-level architecture docs
//! ├── config.rs          # DataLoaderConfig, builder, and validation
//! ├── params.rs          # JSON parameters for DataLoaderConfig
//! ├── loader.rs          # DataLoader struct and topology selection
//! ├── queue.rs           # AckQueue: acknowledgment-bounded queue
//! ├── iterator/
//! │   ├── mod.rs         # DataLoaderIter, Instances and batch generators
//! │   └── fan_in.rs      # Consumer side of the worker queue
//! ├── workers/
//! │   ├── mod.rs         # WorkerMessage, WorkerInit
//! │   ├── pool.rs        # WorkerPool: spawn, cancel, bounded join
//! │   ├── instance.rs    # Raw-instance worker body
//! │   └── batch.rs       # Batch worker body
//! └── common/
//!     ├── mod.rs         # Module declarations for shared utilities
//!     └── thread.rs      # Thread-local shard descriptor, worker seeds
//! ```
//!
//! # Example Usage
//!
//! ## Everything in memory, single-threaded:
//! ```ignore
//! let config = DataLoaderConfig::builder()
//!     .batch_size(32)
//!     .shuffle(true)
//!     .seed(42)
//!     .build();
//!
//! let mut loader = DataLoader::new(reader, "train.txt", config)?;
//! loader.index_with(vocab);
//!
//! for batch in loader.iter()? {
//!     let batch: MiniBatch = batch?;
//!     // Use batch.get("tokens")?, etc.
//! }
//! ```
//!
//! ## Lazy loading with workers
//! ```ignore
//! let config = DataLoaderConfig::builder()
//!     .batch_size(32)
//!     .num_workers(4)
//!     .max_instances_in_memory(4000)
//!     .batches_per_epoch(1000)
//!     .build();
//! ```
//!
//! # Performance Guidelines
//!
//! ## Memory Usage
//! - `max_instances_in_memory = None`: the whole dataset, cached after the
//!   first read
//! - `max_instances_in_memory = M`: `M` instances being batched, plus up to
//!   `M * 4` instances (or `4 * M / batch_size` batches) queued
//!
//! ## Notes:
//! - `shuffle` and bucketing only reorder within one window of `M / num_workers`
//!   instances when `max_instances_in_memory` is set
//! - Worker failures end the iteration; the loader can be iterated again

// Module declarations
mod common;
mod config;
mod iterator;
mod loader;
mod params;
mod queue;
mod workers;

// Public re-exports
pub use config::{DataLoaderConfig, DataLoaderConfigBuilder, StartMethod};
pub use iterator::{DataLoaderIter, Instances};
pub use loader::DataLoader;
pub use params::{BatchSamplerParams, DataLoaderParams};

pub use common::thread::{current_worker_info, worker_seed, WORKER_INFO};
