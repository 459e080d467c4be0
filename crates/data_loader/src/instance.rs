use crate::vocab::{Vocabulary, DEFAULT_NAMESPACE, LABEL_NAMESPACE};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Maps tokens of a `TextField` to ids of one vocabulary namespace.
///
/// Readers attach indexers in `DatasetReader::apply_token_indexers`, in the
/// thread that consumes the instance, never while producing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenIndexer {
    pub namespace: String,
    pub lowercase_tokens: bool,
}

impl Default for TokenIndexer {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            lowercase_tokens: false,
        }
    }
}

impl TokenIndexer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            lowercase_tokens: false,
        }
    }

    pub fn lowercase(mut self, lowercase_tokens: bool) -> Self {
        self.lowercase_tokens = lowercase_tokens;
        self
    }
}

/// A sequence of tokens, indexed lazily against a `Vocabulary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextField {
    tokens: Vec<String>,
    token_indexer: Option<TokenIndexer>,
    ids: Option<Vec<usize>>,
}

impl TextField {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            token_indexer: None,
            ids: None,
        }
    }

    /// Splits `text` on whitespace.
    pub fn from_text(text: &str) -> Self {
        Self::new(text.split_whitespace().map(str::to_string).collect())
    }

    pub fn with_token_indexer(mut self, indexer: TokenIndexer) -> Self {
        self.token_indexer = Some(indexer);
        self
    }

    pub fn set_token_indexer(&mut self, indexer: TokenIndexer) {
        self.token_indexer = Some(indexer);
    }

    pub fn token_indexer(&self) -> Option<&TokenIndexer> {
        self.token_indexer.as_ref()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn namespace(&self) -> &str {
        self.token_indexer
            .as_ref()
            .map(|indexer| indexer.namespace.as_str())
            .unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Applies the indexer's normalization to `token`.
    pub fn normalize(&self, token: &str) -> String {
        match &self.token_indexer {
            Some(indexer) if indexer.lowercase_tokens => token.to_lowercase(),
            _ => token.to_string(),
        }
    }

    /// Computes token ids. Tokens missing from the vocabulary map to the OOV id.
    pub fn index(&mut self, vocab: &Vocabulary) {
        let namespace = self.namespace().to_string();
        let ids = self
            .tokens
            .iter()
            .map(|token| {
                vocab
                    .get_token_index(&self.normalize(token), &namespace)
                    .unwrap_or(1)
            })
            .collect();
        self.ids = Some(ids);
    }

    pub fn ids(&self) -> Option<&[usize]> {
        self.ids.as_deref()
    }
}

/// A categorical label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelField {
    label: String,
    namespace: String,
    id: Option<usize>,
}

impl LabelField {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            namespace: LABEL_NAMESPACE.to_string(),
            id: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `None` until indexed, and stays `None` if the label is not in the vocabulary.
    pub fn id(&self) -> Option<usize> {
        self.id
    }

    pub fn index(&mut self, vocab: &Vocabulary) {
        self.id = vocab.get_token_index(&self.label, &self.namespace);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field {
    Text(TextField),
    Label(LabelField),
    /// Passed through collation untouched.
    Metadata(Value),
}

impl From<TextField> for Field {
    fn from(field: TextField) -> Self {
        Field::Text(field)
    }
}

impl From<LabelField> for Field {
    fn from(field: LabelField) -> Self {
        Field::Label(field)
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::Metadata(value)
    }
}

/// The `Instance` struct represents a single raw record flowing through the loader.
///
/// It maps field names (e.g. `"tokens"`, `"label"`) to [`Field`]s. Fields are
/// kept in name order so that collation is deterministic.
///
/// # Example
/// ```ignore
/// let instance = Instance::new()
///     .with_field("tokens", TextField::from_text("a tiny example"))
///     .with_field("label", LabelField::new("positive"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    fields: BTreeMap<String, Field>,
    indexed: bool,
}

impl Instance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or overwrites a field and returns the modified instance.
    pub fn with_field(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.add_field(name, field);
        self
    }

    pub fn add_field(&mut self, name: impl Into<String>, field: impl Into<Field>) {
        self.fields.insert(name.into(), field.into());
        self.indexed = false;
    }

    pub fn get(&self, name: &str) -> Result<&Field> {
        self.fields
            .get(name)
            .ok_or_else(|| anyhow!("Field '{}' not found in instance", name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    /// Returns the metadata value stored under `name`, if that field is metadata.
    pub fn metadata(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(Field::Metadata(value)) => Some(value),
            _ => None,
        }
    }

    /// Field names in collation order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn text_fields_mut(&mut self) -> impl Iterator<Item = &mut TextField> {
        self.fields.values_mut().filter_map(|field| match field {
            Field::Text(text) => Some(text),
            _ => None,
        })
    }

    /// Name of the first text field that already carries a token indexer.
    pub fn text_field_with_indexer(&self) -> Option<&str> {
        self.fields.iter().find_map(|(name, field)| match field {
            Field::Text(text) if text.token_indexer().is_some() => Some(name.as_str()),
            _ => None,
        })
    }

    /// Length of the longest text field (0 if there is none).
    pub fn max_text_len(&self) -> usize {
        self.fields
            .values()
            .filter_map(|field| match field {
                Field::Text(text) => Some(text.len()),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Length of the named field: token count for text, 1 otherwise.
    pub fn field_len(&self, name: &str) -> Option<usize> {
        self.fields.get(name).map(|field| match field {
            Field::Text(text) => text.len(),
            _ => 1,
        })
    }

    /// Indexes every text and label field. Idempotent for a given vocabulary.
    pub fn index_fields(&mut self, vocab: &Vocabulary) {
        for field in self.fields.values_mut() {
            match field {
                Field::Text(text) => text.index(vocab),
                Field::Label(label) => label.index(vocab),
                Field::Metadata(_) => {}
            }
        }
        self.indexed = true;
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }
}
