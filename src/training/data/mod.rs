//! Mini-batch abstractions consumed by the agent
//!
//! A loader yields [`Batch`]es of `(input, targets, task labels)`. The input
//! is either one feature tensor or the three-tensor encoding of a tokenized
//! sequence (token ids, attention mask, segment ids).

pub mod loaders;

pub use loaders::{TensorLoader, TensorLoaderConfig};

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};

/// Input half of a batch as produced by a loader
#[derive(Debug, Clone)]
pub enum RawInput {
    /// Feature tensor `[batch, ...]`
    Tensor(Tensor),
    /// Sequence encoding: token ids, attention mask, segment ids
    Sequence(Vec<Tensor>),
}

impl RawInput {
    /// Number of samples
    pub fn batch_size(&self) -> Result<usize> {
        match self {
            RawInput::Tensor(t) => Ok(t.dim(0)?),
            RawInput::Sequence(parts) => match parts.first() {
                Some(ids) => Ok(ids.dim(0)?),
                None => Err(Error::invalid_input("empty sequence encoding")),
            },
        }
    }

    /// Copy every tensor to `device`
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(match self {
            RawInput::Tensor(t) => RawInput::Tensor(t.to_device(device)?),
            RawInput::Sequence(parts) => RawInput::Sequence(
                parts
                    .iter()
                    .map(|t| t.to_device(device))
                    .collect::<candle_core::Result<Vec<_>>>()?,
            ),
        })
    }

    /// Rows `start..start + len`
    pub fn narrow(&self, start: usize, len: usize) -> Result<Self> {
        Ok(match self {
            RawInput::Tensor(t) => RawInput::Tensor(t.narrow(0, start, len)?),
            RawInput::Sequence(parts) => RawInput::Sequence(
                parts
                    .iter()
                    .map(|t| t.narrow(0, start, len))
                    .collect::<candle_core::Result<Vec<_>>>()?,
            ),
        })
    }
}

/// One mini-batch
#[derive(Debug, Clone)]
pub struct Batch {
    /// Model input
    pub input: RawInput,
    /// Targets `[batch]`: class ids or real values
    pub targets: Tensor,
    /// Task label of every sample
    pub tasks: Vec<String>,
}

impl Batch {
    /// Create a batch, checking that the three parts agree on the sample count
    pub fn new(input: RawInput, targets: Tensor, tasks: Vec<String>) -> Result<Self> {
        let n = input.batch_size()?;
        if targets.dim(0)? != n || tasks.len() != n {
            return Err(Error::invalid_input(format!(
                "batch of {} inputs has {} targets and {} task labels",
                n,
                targets.dim(0)?,
                tasks.len()
            )));
        }
        Ok(Self {
            input,
            targets,
            tasks,
        })
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the batch holds no samples
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Copy tensors to `device`
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            input: self.input.to_device(device)?,
            targets: self.targets.to_device(device)?,
            tasks: self.tasks.clone(),
        })
    }

    /// Contiguous sub-batch of rows `start..start + len`
    pub fn narrow(&self, start: usize, len: usize) -> Result<Self> {
        Ok(Self {
            input: self.input.narrow(start, len)?,
            targets: self.targets.narrow(0, start, len)?,
            tasks: self.tasks[start..start + len].to_vec(),
        })
    }
}

/// Source of mini-batches for one pass over a dataset
pub trait BatchSource {
    /// Number of batches in one pass
    fn num_batches(&self) -> usize;

    /// Batches of the next pass
    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;
}
