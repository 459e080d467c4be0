pub mod batching;
pub mod collator;
pub mod dataloader;
pub mod error;
pub mod instance;
pub mod minibatch;
pub mod reader;
pub mod readers;
pub mod sampler;
pub mod transform;
pub mod vocab;

pub use collator::{Collator, PaddingCollator, PaddingRule};
pub use dataloader::{DataLoader, DataLoaderConfig, StartMethod};
pub use error::{loader_error, LoaderError};
pub use instance::{Field, Instance, LabelField, TextField, TokenIndexer};
pub use minibatch::{Device, MiniBatch};
pub use reader::{DatasetReader, InstanceIter, WorkerInfo};
pub use sampler::{BatchSampler, BucketBatchSampler, MaxTokensBatchSampler};
pub use vocab::Vocabulary;
