use crate::collator::Collator;
use crate::instance::Instance;
use anyhow::{anyhow, bail, Result};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Where a batch's tensors should live.
///
/// Parses from `"cpu"`, `"cuda"`, `"cuda:N"` or a bare device number
/// (negative numbers mean CPU).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "cpu" {
            return Ok(Device::Cpu);
        }
        if s == "cuda" {
            return Ok(Device::Cuda(0));
        }
        if let Some(index) = s.strip_prefix("cuda:") {
            let index = index
                .parse::<usize>()
                .map_err(|_| anyhow!("Invalid CUDA device index in '{}'", s))?;
            return Ok(Device::Cuda(index));
        }
        match s.parse::<i64>() {
            Ok(n) if n < 0 => Ok(Device::Cpu),
            Ok(n) => Ok(Device::Cuda(n as usize)),
            Err(_) => bail!("Unrecognized device '{}'", s),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

/// The `MiniBatch` struct represents a batch of instances grouped for model input.
///
/// It is produced by a [`Collator`] and never split or merged afterwards.
/// Indexed fields become `i64` tensors of shape `[batch_size, ...]`;
/// metadata fields are kept as one column of JSON values per field.
#[derive(Debug, Clone, PartialEq)]
pub struct MiniBatch {
    pub tensors: HashMap<String, ArrayD<i64>>,
    pub metadata: HashMap<String, Vec<Value>>,
    device: Device,
    pinned: bool,
}

impl MiniBatch {
    pub fn new(tensors: HashMap<String, ArrayD<i64>>, metadata: HashMap<String, Vec<Value>>) -> Self {
        Self {
            tensors,
            metadata,
            device: Device::Cpu,
            pinned: false,
        }
    }

    /// Constructs a `MiniBatch` by applying `collator` to `instances`.
    pub fn collate(instances: &[Instance], collator: &impl Collator) -> Result<Self> {
        collator.collate(instances)
    }

    /// Returns the number of instances in the batch.
    pub fn batch_size(&self) -> Result<usize> {
        self.tensors
            .values()
            .next()
            .map(|t| t.shape()[0])
            .or_else(|| self.metadata.values().next().map(Vec::len))
            .ok_or(anyhow!("Empty mini-batch"))
    }

    /// Returns a reference to the tensor for a given feature key.
    pub fn get(&self, feature: &str) -> Result<&ArrayD<i64>> {
        self.tensors
            .get(feature)
            .ok_or_else(|| anyhow!("Feature '{}' not found in mini-batch", feature))
    }

    pub fn metadata(&self, field: &str) -> Result<&[Value]> {
        self.metadata
            .get(field)
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow!("Metadata field '{}' not found in mini-batch", field))
    }

    /// Returns an iterator over all tensor feature keys in the batch.
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Marks the batch as living in page-locked host memory.
    pub fn pin_memory(mut self) -> Self {
        self.pinned = true;
        self
    }

    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}
