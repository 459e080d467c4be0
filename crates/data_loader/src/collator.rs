use crate::instance::{Field, Instance};
use crate::minibatch::MiniBatch;
use anyhow::{bail, Result};
use ndarray::{Array1, Array2};
use std::collections::{HashMap, HashSet};

/// A `Collator` defines how to pad and combine multiple [`Instance`]s into a [`MiniBatch`].
///
/// Collators are shared by every worker thread of a loader.
pub trait Collator: Send + Sync + 'static {
    fn collate(&self, instances: &[Instance]) -> Result<MiniBatch>;
}

/// Defines how a text field is padded across a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingRule {
    /// Pad to the longest sequence of the batch.
    MaxLength,
    /// Pad (or truncate) on the right to exactly this length.
    FixedRight(usize),
    /// Pad (or truncate) on the left to exactly this length.
    FixedLeft(usize),
}

/// The default collator.
///
/// - text fields become `[batch, len]` tensors of token ids, padded with
///   `pad_value` according to the field's [`PaddingRule`] (`MaxLength` unless
///   configured with `.pad(...)`);
/// - label fields become `[batch]` tensors of label ids;
/// - metadata fields are passed through as value columns.
///
/// Every instance must carry the same field names with the same kinds, and
/// text and label fields must already be indexed.
///
/// # Example
/// ```ignore
/// let collator = PaddingCollator::default()
///     .pad("tokens", PaddingRule::FixedRight(128))
///     .with_pad_value(0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PaddingCollator {
    rules: HashMap<String, PaddingRule>,
    pad_value: i64,
}

impl PaddingCollator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the padding rule for a text field.
    pub fn pad(mut self, field: impl Into<String>, rule: PaddingRule) -> Self {
        self.rules.insert(field.into(), rule);
        self
    }

    pub fn with_pad_value(mut self, pad_value: i64) -> Self {
        self.pad_value = pad_value;
        self
    }

    fn validate_fields(instances: &[Instance]) -> Result<()> {
        let first_keys: HashSet<&str> = instances[0].fields().collect();
        for (i, instance) in instances.iter().enumerate().skip(1) {
            let keys: HashSet<&str> = instance.fields().collect();
            let mut missing: Vec<_> = first_keys.difference(&keys).collect();
            let mut extra: Vec<_> = keys.difference(&first_keys).collect();
            if !missing.is_empty() || !extra.is_empty() {
                missing.sort();
                extra.sort();
                bail!(
                    "Instance #{} has mismatched fields:\n -Missing: {:?}\n -Extra: {:?}",
                    i,
                    missing,
                    extra
                );
            }
        }
        Ok(())
    }

    fn pad_text(&self, name: &str, rows: &[&[usize]]) -> Result<Array2<i64>> {
        let rule = self.rules.get(name).copied().unwrap_or(PaddingRule::MaxLength);
        let target = match rule {
            PaddingRule::MaxLength => rows.iter().map(|r| r.len()).max().unwrap_or(0),
            PaddingRule::FixedRight(n) | PaddingRule::FixedLeft(n) => n,
        };

        let mut tensor = Array2::from_elem((rows.len(), target), self.pad_value);
        for (i, ids) in rows.iter().enumerate() {
            let len = ids.len().min(target);
            let (src, offset) = match rule {
                PaddingRule::FixedLeft(_) => (&ids[ids.len() - len..], target - len),
                _ => (&ids[..len], 0),
            };
            for (j, &id) in src.iter().enumerate() {
                tensor[[i, offset + j]] = id as i64;
            }
        }
        Ok(tensor)
    }
}

impl Collator for PaddingCollator {
    fn collate(&self, instances: &[Instance]) -> Result<MiniBatch> {
        if instances.is_empty() {
            bail!("Cannot collate empty instance list");
        }
        Self::validate_fields(instances)?;

        let mut tensors = HashMap::new();
        let mut metadata = HashMap::new();

        for (name, first) in instances[0].iter() {
            let column: Vec<&Field> = instances
                .iter()
                .map(|instance| instance.get(name))
                .collect::<Result<_>>()?;

            match first {
                Field::Text(_) => {
                    let mut rows = Vec::with_capacity(column.len());
                    for (i, field) in column.iter().enumerate() {
                        match field {
                            Field::Text(text) => match text.ids() {
                                Some(ids) => rows.push(ids),
                                None => bail!("Text field '{}' of instance #{} is not indexed", name, i),
                            },
                            _ => bail!("Field '{}' of instance #{} is not a text field", name, i),
                        }
                    }
                    tensors.insert(name.to_string(), self.pad_text(name, &rows)?.into_dyn());
                }
                Field::Label(_) => {
                    let mut ids = Vec::with_capacity(column.len());
                    for (i, field) in column.iter().enumerate() {
                        match field {
                            Field::Label(label) => match label.id() {
                                Some(id) => ids.push(id as i64),
                                None => bail!(
                                    "Label '{}' of instance #{} is not indexed or not in namespace '{}'",
                                    label.label(),
                                    i,
                                    label.namespace()
                                ),
                            },
                            _ => bail!("Field '{}' of instance #{} is not a label field", name, i),
                        }
                    }
                    tensors.insert(name.to_string(), Array1::from(ids).into_dyn());
                }
                Field::Metadata(_) => {
                    let mut values = Vec::with_capacity(column.len());
                    for (i, field) in column.iter().enumerate() {
                        match field {
                            Field::Metadata(value) => values.push(value.clone()),
                            _ => bail!("Field '{}' of instance #{} is not metadata", name, i),
                        }
                    }
                    metadata.insert(name.to_string(), values);
                }
            }
        }

        Ok(MiniBatch::new(tensors, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{LabelField, TextField};
    use crate::vocab::Vocabulary;
    use ndarray::arr2;

    fn vocab() -> Vocabulary {
        let mut vocab = Vocabulary::new();
        // a=2, b=3, c=4
        vocab.add_tokens_to_namespace(["a", "b", "c"], "tokens");
        vocab.add_tokens_to_namespace(["neg", "pos"], "labels");
        vocab
    }

    fn indexed(text: &str, label: &str) -> Instance {
        let mut instance = Instance::new()
            .with_field("tokens", TextField::from_text(text))
            .with_field("label", LabelField::new(label));
        instance.index_fields(&vocab());
        instance
    }

    #[test]
    fn test_pads_to_max_length() -> Result<()> {
        let batch = PaddingCollator::default()
            .collate(&[indexed("a b c", "pos"), indexed("b", "neg")])?;

        assert_eq!(
            batch.get("tokens")?,
            &arr2(&[[2i64, 3, 4], [3, 0, 0]]).into_dyn()
        );
        assert_eq!(batch.get("label")?.as_slice(), Some(&[1i64, 0][..]));
        Ok(())
    }

    #[test]
    fn test_fixed_padding_rules_truncate_and_pad() -> Result<()> {
        let instances = [indexed("a b c", "pos"), indexed("b", "neg")];

        let right = PaddingCollator::new()
            .pad("tokens", PaddingRule::FixedRight(2))
            .with_pad_value(-1)
            .collate(&instances)?;
        assert_eq!(right.get("tokens")?, &arr2(&[[2i64, 3], [3, -1]]).into_dyn());

        let left = PaddingCollator::new()
            .pad("tokens", PaddingRule::FixedLeft(2))
            .collate(&instances)?;
        assert_eq!(left.get("tokens")?, &arr2(&[[3i64, 4], [0, 3]]).into_dyn());
        Ok(())
    }

    #[test]
    fn test_rejects_unindexed_and_mismatched_instances() {
        let collator = PaddingCollator::default();
        assert!(collator.collate(&[]).is_err());

        let raw = Instance::new().with_field("tokens", TextField::from_text("a"));
        let err = collator.collate(&[raw]).unwrap_err();
        assert!(err.to_string().contains("not indexed"));

        let other = {
            let mut i = Instance::new().with_field("words", TextField::from_text("a"));
            i.index_fields(&vocab());
            i
        };
        let err = collator.collate(&[indexed("a", "pos"), other]).unwrap_err();
        assert!(err.to_string().contains("mismatched fields"));
    }

    #[test]
    fn test_unknown_label_is_an_error() {
        let err = PaddingCollator::default()
            .collate(&[indexed("a", "neutral")])
            .unwrap_err();
        assert!(err.to_string().contains("neutral"));
    }
}
