use crate::instance::Instance;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Boxed, sendable stream of instances produced by a reader.
pub type InstanceIter = Box<dyn Iterator<Item = Result<Instance>> + Send>;

/// Identifies one worker's shard of the record source.
///
/// Assigned once when the worker is spawned and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub num_workers: usize,
    pub id: usize,
}

impl WorkerInfo {
    pub fn new(num_workers: usize, id: usize) -> Self {
        Self { num_workers, id }
    }
}

/// A source of instances for the `DataLoader`.
///
/// `read` must honor `shard` when given: worker `id` of `num_workers` yields
/// only its own disjoint slice of the records, so that the union over all
/// workers is the full source. [`shard_iter`] gives the usual round-robin split.
///
/// Implementations must not attach token indexers inside `read`; the loader
/// calls [`DatasetReader::apply_token_indexers`] in the consuming thread.
pub trait DatasetReader: Send + Sync + 'static {
    fn read(&self, data_path: &Path, shard: Option<WorkerInfo>) -> Result<InstanceIter>;

    fn apply_token_indexers(&self, _instance: &mut Instance) {}
}

/// Keeps every `num_workers`-th item starting at `id`.
pub fn shard_iter<I>(iter: I, shard: Option<WorkerInfo>) -> Box<dyn Iterator<Item = I::Item> + Send>
where
    I: Iterator + Send + 'static,
{
    match shard {
        Some(WorkerInfo { num_workers, id }) if num_workers > 1 => {
            Box::new(iter.skip(id).step_by(num_workers))
        }
        _ => Box::new(iter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_are_disjoint_and_cover_everything() {
        let mut seen: Vec<usize> = (0..3)
            .flat_map(|id| shard_iter(0..10usize, Some(WorkerInfo::new(3, id))))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());

        let first: Vec<_> = shard_iter(0..10usize, Some(WorkerInfo::new(3, 0))).collect();
        assert_eq!(first, vec![0, 3, 6, 9]);
    }

    #[test]
    fn no_shard_yields_everything() {
        assert_eq!(shard_iter(0..4usize, None).count(), 4);
        assert_eq!(shard_iter(0..4usize, Some(WorkerInfo::new(1, 0))).count(), 4);
    }
}
