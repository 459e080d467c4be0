//! The indexing context attached to a `DataLoader` before iteration.
//!
//! A `Vocabulary` maps tokens to integer ids per namespace. Namespaces ending in
//! `labels` or `tags` are non-padded: ids start at 0 and there is no OOV entry.
//! Every other namespace reserves id 0 for padding and id 1 for unknown tokens.

use crate::instance::{Field, Instance};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_NAMESPACE: &str = "tokens";
pub const LABEL_NAMESPACE: &str = "labels";
pub const PADDING_TOKEN: &str = "@@PADDING@@";
pub const OOV_TOKEN: &str = "@@UNKNOWN@@";

const NON_PADDED_SUFFIXES: [&str; 2] = ["labels", "tags"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Namespace {
    token_to_index: HashMap<String, usize>,
    index_to_token: Vec<String>,
    padded: bool,
}

impl Namespace {
    fn new(name: &str) -> Self {
        let padded = !NON_PADDED_SUFFIXES.iter().any(|s| name.ends_with(s));
        let mut namespace = Self {
            padded,
            ..Self::default()
        };
        if padded {
            namespace.add(PADDING_TOKEN);
            namespace.add(OOV_TOKEN);
        }
        namespace
    }

    fn add(&mut self, token: &str) -> usize {
        if let Some(&index) = self.token_to_index.get(token) {
            return index;
        }
        let index = self.index_to_token.len();
        self.token_to_index.insert(token.to_string(), index);
        self.index_to_token.push(token.to_string());
        index
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    namespaces: HashMap<String, Namespace>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a vocabulary from every text token and label in `instances`.
    ///
    /// Text tokens go to the namespace of the field's token indexer (or
    /// `"tokens"`), labels to the label field's namespace.
    pub fn from_instances<I>(instances: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Instance>>,
    {
        let mut vocab = Self::new();
        for instance in instances {
            let instance = instance?;
            for (_, field) in instance.iter() {
                match field {
                    Field::Text(text) => {
                        let namespace = text.namespace().to_string();
                        for token in text.tokens() {
                            vocab.add_token_to_namespace(&text.normalize(token), &namespace);
                        }
                    }
                    Field::Label(label) => {
                        vocab.add_token_to_namespace(label.label(), label.namespace());
                    }
                    Field::Metadata(_) => {}
                }
            }
        }
        Ok(vocab)
    }

    /// Adds `token` to `namespace` (created on first use) and returns its id.
    pub fn add_token_to_namespace(&mut self, token: &str, namespace: &str) -> usize {
        self.namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Namespace::new(namespace))
            .add(token)
    }

    pub fn add_tokens_to_namespace<'t>(
        &mut self,
        tokens: impl IntoIterator<Item = &'t str>,
        namespace: &str,
    ) {
        for token in tokens {
            self.add_token_to_namespace(token, namespace);
        }
    }

    /// Id of `token` in `namespace`.
    ///
    /// Unknown tokens map to the OOV id in padded namespaces and to `None` in
    /// non-padded ones.
    pub fn get_token_index(&self, token: &str, namespace: &str) -> Option<usize> {
        let namespace = self.namespaces.get(namespace)?;
        match namespace.token_to_index.get(token) {
            Some(&index) => Some(index),
            None if namespace.padded => Some(1),
            None => None,
        }
    }

    pub fn get_token_from_index(&self, index: usize, namespace: &str) -> Option<&str> {
        self.namespaces
            .get(namespace)?
            .index_to_token
            .get(index)
            .map(String::as_str)
    }

    pub fn get_vocab_size(&self, namespace: &str) -> usize {
        self.namespaces
            .get(namespace)
            .map(|ns| ns.index_to_token.len())
            .unwrap_or(0)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }
}
