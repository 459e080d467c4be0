use crate::instance::{Instance, TokenIndexer};
use crate::reader::{shard_iter, DatasetReader, InstanceIter, WorkerInfo};
use crate::transform::Transform;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// A line-by-line JSONL reader.
///
/// Each non-blank line is parsed as a `serde_json::Value` and converted into an
/// instance by `transform`. Errors carry the line number
/// (e.g. "Invalid JSON at line 3").
///
/// # Example
/// ```ignore
/// let reader = JsonlReader::new(JsonTextLabel::default());
/// for instance in reader.read(Path::new("data.jsonl"), None)? {
///     let instance = instance?;
/// }
/// ```
pub struct JsonlReader<T> {
    transform: Arc<T>,
    token_indexer: Option<TokenIndexer>,
}

impl<T> Clone for JsonlReader<T> {
    fn clone(&self) -> Self {
        Self {
            transform: Arc::clone(&self.transform),
            token_indexer: self.token_indexer.clone(),
        }
    }
}

impl<T> JsonlReader<T>
where
    T: Transform<Value, Instance> + 'static,
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

impl<T> DatasetReader for JsonlReader<T>
where
    T: Transform<Value, Instance> + 'static,
{
    fn read(&self, data_path: &Path, shard: Option<WorkerInfo>) -> Result<InstanceIter> {
        let file = File::open(data_path)
            .with_context(|| format!("Failed to open {}", data_path.display()))?;

        let lines = BufReader::new(file)
            .lines()
            .enumerate()
            .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty()));

        let transform = Arc::clone(&self.transform);
        let iter = shard_iter(lines, shard).map(move |(line_num, line)| {
            let line = line?;
            let value = serde_json::from_str::<Value>(&line)
                .with_context(|| format!("Invalid JSON at line {}", line_num + 1))?;
            transform
                .apply(value)
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
