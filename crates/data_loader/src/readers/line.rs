use crate::instance::{Instance, TokenIndexer};
use crate::reader::{shard_iter, DatasetReader, InstanceIter, WorkerInfo};
use crate::transform::Transform;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Reads text files line by line. Skips blank lines.
///
/// Each remaining line goes through `transform` to become an instance.
/// Sharding happens on lines, before the transform runs.
///
/// # Example
/// ```ignore
/// let reader = LineReader::new(WhitespaceTokenizer::default())
///     .with_token_indexer(TokenIndexer::default());
/// let loader = DataLoader::new(reader, "train.txt", config)?;
/// ```
pub struct LineReader<T> {
    transform: Arc<T>,
    token_indexer: Option<TokenIndexer>,
}

impl<T> Clone for LineReader<T> {
    fn clone(&self) -> Self {
        Self {
            transform: Arc::clone(&self.transform),
            token_indexer: self.token_indexer.clone(),
        }
    }
}

impl<T> LineReader<T>
where
    T: Transform<String, Instance> + 'static,
{
    pub fn new(transform: T) -> Self {
        Self {
            transform: Arc::new(transform),
            token_indexer: None,
        }
    }

    pub fn with_token_indexer(mut self, indexer: TokenIndexer) -> Self {
        self.token_indexer = Some(indexer);
        self
    }
}

impl<T> DatasetReader for LineReader<T>
where
    T: Transform<String, Instance> + 'static,
{
    fn read(&self, data_path: &Path, shard: Option<WorkerInfo>) -> Result<InstanceIter> {
        let file = File::open(data_path)
            .with_context(|| format!("Failed to open text file: {}", data_path.display()))?;

        let lines = BufReader::new(file)
            .lines()
            .enumerate()
            .filter(|(_, line)| !matches!(line, Ok(text) if text.trim().is_empty()));

        let transform = Arc::clone(&self.transform);
        let iter = shard_iter(lines, shard).map(move |(line_num, line)| {
            let text = line.with_context(|| format!("Error reading line {}", line_num + 1))?;
            transform
                .apply(text)
                .with_context(|| format!("Failed to convert line {}", line_num + 1))
        });
        Ok(Box::new(iter))
    }

    fn apply_token_indexers(&self, instance: &mut Instance) {
        if let Some(indexer) = &self.token_indexer {
            for text in instance.text_fields_mut() {
                text.set_token_indexer(indexer.clone());
            }
        }
    }
}
