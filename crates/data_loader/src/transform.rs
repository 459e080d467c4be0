use crate::instance::{Instance, LabelField, TextField};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::marker::PhantomData;

/// A stateless conversion from a raw record `I` into `O`.
///
/// Readers use a `Transform<_, Instance>` to turn lines or JSON values into
/// instances. Steps compose with `.then(...)`.
pub trait Transform<I, O>: Send + Sync {
    fn apply(&self, input: I) -> Result<O>;

    #[inline]
    fn then<T, M>(self, next: T) -> Chain<Self, T, O>
    where
        Self: Sized,
        T: Transform<O, M>,
        O: Send,
        M: Send,
    {
        Chain::new(self, next)
    }
}

/// Two transforms applied in sequence (`A` then `B`).
#[derive(Debug, Clone)]
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _marker: PhantomData<fn() -> M>,
}

impl<A, B, M> Chain<A, B, M> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _marker: PhantomData,
        }
    }
}

impl<I, M, O, A, B> Transform<I, O> for Chain<A, B, M>
where
    A: Transform<I, M>,
    B: Transform<M, O>,
    M: Send,
{
    fn apply(&self, input: I) -> Result<O> {
        self.first
            .apply(input)
            .and_then(|mid| self.second.apply(mid))
            .with_context(|| {
                format!(
                    "Transform chain failed: {} → {}",
                    std::any::type_name::<A>(),
                    std::any::type_name::<B>()
                )
            })
    }
}

/// Lowercases a line before tokenization.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lowercase;

impl Transform<String, String> for Lowercase {
    fn apply(&self, input: String) -> Result<String> {
        Ok(input.to_lowercase())
    }
}

/// Splits a line on whitespace into a single text field.
#[derive(Debug, Clone)]
pub struct WhitespaceTokenizer {
    field: String,
}

impl Default for WhitespaceTokenizer {
    fn default() -> Self {
        Self::new("tokens")
    }
}

impl WhitespaceTokenizer {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Transform<String, Instance> for WhitespaceTokenizer {
    fn apply(&self, input: String) -> Result<Instance> {
        Ok(Instance::new().with_field(self.field.clone(), TextField::from_text(&input)))
    }
}

/// Builds an instance from a JSON object with a text key and an optional
/// label key. Every other key is kept as a metadata field.
///
/// `{"text": "a fine film", "label": "pos", "id": 7}` becomes
/// `tokens: Text`, `label: Label`, `id: Metadata`.
#[derive(Debug, Clone)]
pub struct JsonTextLabel {
    text_key: String,
    label_key: String,
}

impl Default for JsonTextLabel {
    fn default() -> Self {
        Self {
            text_key: "text".to_string(),
            label_key: "label".to_string(),
        }
    }
}

impl JsonTextLabel {
    pub fn new(text_key: impl Into<String>, label_key: impl Into<String>) -> Self {
        Self {
            text_key: text_key.into(),
            label_key: label_key.into(),
        }
    }
}

impl Transform<Value, Instance> for JsonTextLabel {
    fn apply(&self, input: Value) -> Result<Instance> {
        let Value::Object(map) = input else {
            return Err(anyhow!("Expected a JSON object, got {}", input));
        };

        let mut instance = Instance::new();
        for (key, value) in map {
            if key == self.text_key {
                let text = value
                    .as_str()
                    .ok_or_else(|| anyhow!("Key '{}' must be a string", key))?;
                instance.add_field("tokens", TextField::from_text(text));
            } else if key == self.label_key {
                let label = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => return Err(anyhow!("Unsupported label value: {}", other)),
                };
                instance.add_field("label", LabelField::new(label));
            } else {
                instance.add_field(key, value);
            }
        }

        if instance.get("tokens").is_err() {
            return Err(anyhow!("Missing text key '{}'", self.text_key));
        }
        Ok(instance)
    }
}
