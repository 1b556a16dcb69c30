//! Task-headed classifiers
//!
//! A [`Classifier`] maps a [`ModelInput`] to [`TaskOutputs`]: one output tensor
//! per configured task head, every head evaluated on every sample of the
//! batch. [`MultiHeadModel`] composes a shared [`Backbone`] with one linear
//! head per task; the head set is fixed when the model is built.

pub mod bert;
pub mod mlp;

pub use bert::BertBackbone;
pub use mlp::MlpBackbone;

use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};
use tracing::{debug, info};

use crate::config::{ModelSpec, TaskHead};
use crate::error::{Error, Result};

/// Head name used by single-head models
pub const SINGLE_HEAD: &str = "All";

/// Structured input for encoder-style sequence models
#[derive(Debug, Clone)]
pub struct SequenceInput {
    /// Token ids `[batch, seq_len]`
    pub input_ids: Tensor,
    /// Attention mask `[batch, seq_len]`
    pub attention_mask: Tensor,
    /// Segment ids `[batch, seq_len]`
    pub token_type_ids: Tensor,
    /// Targets of the batch, carried for models that consume them
    pub labels: Option<Tensor>,
}

/// Input accepted by a [`Classifier`]
#[derive(Debug, Clone)]
pub enum ModelInput {
    /// Single feature tensor `[batch, ...]`
    Dense(Tensor),
    /// Tokenized sequence encoding
    Sequence(SequenceInput),
}

/// Ordered map from task name to head output
#[derive(Debug, Clone, Default)]
pub struct TaskOutputs {
    heads: Vec<(String, Tensor)>,
}

impl TaskOutputs {
    /// Create an empty output map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the output of a head, keeping first-insertion order
    pub fn insert(&mut self, task: impl Into<String>, output: Tensor) {
        let task = task.into();
        match self.heads.iter_mut().find(|(name, _)| *name == task) {
            Some(slot) => slot.1 = output,
            None => self.heads.push((task, output)),
        }
    }

    /// Output of a head
    pub fn get(&self, task: &str) -> Option<&Tensor> {
        self.heads.iter().find(|(name, _)| name == task).map(|(_, t)| t)
    }

    /// Iterate heads in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.heads.iter().map(|(name, t)| (name.as_str(), t))
    }

    /// Head names in insertion order
    pub fn tasks(&self) -> Vec<&str> {
        self.heads.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Number of heads
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    /// Whether there are no heads
    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Detach every head from the autograd graph
    pub fn detach(&self) -> Self {
        Self {
            heads: self
                .heads
                .iter()
                .map(|(name, t)| (name.clone(), t.detach()))
                .collect(),
        }
    }

    /// Concatenate per-shard outputs along the batch dimension
    pub fn concat(parts: &[TaskOutputs]) -> Result<Self> {
        let first = match parts {
            [] => return Ok(Self::new()),
            [only] => return Ok(only.clone()),
            [first, ..] => first,
        };

        let mut merged = Self::new();
        for task in first.tasks() {
            let pieces = parts
                .iter()
                .map(|p| {
                    p.get(task).ok_or_else(|| {
                        Error::model(format!("shard output is missing head '{task}'"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            merged.insert(task, Tensor::cat(&pieces, 0)?);
        }
        Ok(merged)
    }
}

impl FromIterator<(String, Tensor)> for TaskOutputs {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        let mut outputs = Self::new();
        for (task, t) in iter {
            outputs.insert(task, t);
        }
        outputs
    }
}

/// A model whose forward pass yields one output per task head
pub trait Classifier: Send {
    /// Evaluate every head on the whole batch
    fn forward(&self, input: &ModelInput, train: bool) -> Result<TaskOutputs>;

    /// Trainable parameters
    fn var_map(&self) -> &VarMap;

    /// Head names in configuration order
    fn tasks(&self) -> Vec<String>;
}

/// Shared feature extractor feeding the task heads
pub trait Backbone: Send {
    /// Map the input to features `[batch, feature_dim]`
    fn features(&self, input: &ModelInput, train: bool) -> Result<Tensor>;

    /// Width of the feature vector
    fn feature_dim(&self) -> usize;
}

/// Backbone with one linear head per task
pub struct MultiHeadModel {
    backbone: Box<dyn Backbone>,
    heads: Vec<(String, Linear)>,
    var_map: VarMap,
}

impl MultiHeadModel {
    /// Attach heads for `out_dim` to an already built backbone
    ///
    /// `vb` must be backed by `var_map`; heads live under `last.<task>`.
    pub fn new(
        backbone: Box<dyn Backbone>,
        out_dim: &[TaskHead],
        vb: VarBuilder,
        var_map: VarMap,
    ) -> Result<Self> {
        let n_feat = backbone.feature_dim();
        let mut heads = Vec::with_capacity(out_dim.len());
        for head in out_dim {
            let layer = linear(n_feat, head.dim, vb.pp("last").pp(&head.task))?;
            debug!("Head '{}': {} -> {}", head.task, n_feat, head.dim);
            heads.push((head.task.clone(), layer));
        }
        Ok(Self {
            backbone,
            heads,
            var_map,
        })
    }
}

impl Classifier for MultiHeadModel {
    fn forward(&self, input: &ModelInput, train: bool) -> Result<TaskOutputs> {
        let features = self.backbone.features(input, train)?;
        let mut outputs = TaskOutputs::new();
        for (task, head) in &self.heads {
            outputs.insert(task.clone(), head.forward(&features)?);
        }
        Ok(outputs)
    }

    fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    fn tasks(&self) -> Vec<String> {
        self.heads.iter().map(|(task, _)| task.clone()).collect()
    }
}

/// Build a model from its registry entry
pub fn build_model(
    spec: &ModelSpec,
    out_dim: &[TaskHead],
    device: &Device,
) -> Result<Box<dyn Classifier>> {
    let var_map = VarMap::new();
    let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);

    let backbone: Box<dyn Backbone> = match spec {
        ModelSpec::Mlp { in_dim, hidden } => {
            Box::new(MlpBackbone::new(*in_dim, hidden, vb.pp("backbone"))?)
        }
        ModelSpec::Bert(bert) => Box::new(BertBackbone::new(bert, vb.pp("backbone"))?),
    };

    let model = MultiHeadModel::new(backbone, out_dim, vb, var_map)?;
    info!(
        "Built {} model with heads {:?}",
        spec.name(),
        model.tasks()
    );
    Ok(Box::new(model))
}

/// Total number of scalar parameters
pub fn count_parameters(var_map: &VarMap) -> usize {
    var_map
        .all_vars()
        .iter()
        .map(|v| v.as_tensor().elem_count())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn heads(spec: &[(&str, usize)]) -> Vec<TaskHead> {
        spec.iter().map(|(t, d)| TaskHead::new(*t, *d)).collect()
    }

    #[test]
    fn test_multi_head_outputs_cover_every_task() -> Result<()> {
        let device = Device::Cpu;
        let spec = ModelSpec::Mlp { in_dim: 6, hidden: vec![8] };
        let model = build_model(&spec, &heads(&[("a", 3), ("b", 2)]), &device)?;

        let x = Tensor::randn(0f32, 1.0, (5, 6), &device)?;
        let out = model.forward(&ModelInput::Dense(x), false)?;

        assert_eq!(out.tasks(), vec!["a", "b"]);
        assert_eq!(out.get("a").unwrap().dims(), &[5, 3]);
        assert_eq!(out.get("b").unwrap().dims(), &[5, 2]);
        Ok(())
    }

    #[test]
    fn test_parameter_count() -> Result<()> {
        let device = Device::Cpu;
        let spec = ModelSpec::Mlp { in_dim: 4, hidden: vec![3] };
        let model = build_model(&spec, &heads(&[(SINGLE_HEAD, 2)]), &device)?;

        // 4*3 + 3 for the hidden layer, 3*2 + 2 for the head
        assert_eq!(count_parameters(model.var_map()), 23);
        Ok(())
    }

    #[test]
    fn test_concat_keeps_order() -> Result<()> {
        let device = Device::Cpu;
        let a: TaskOutputs = vec![
            ("x".to_string(), Tensor::zeros((2, 1), DType::F32, &device)?),
            ("y".to_string(), Tensor::zeros((2, 3), DType::F32, &device)?),
        ]
        .into_iter()
        .collect();
        let b = a.clone();

        let merged = TaskOutputs::concat(&[a, b])?;
        assert_eq!(merged.tasks(), vec!["x", "y"]);
        assert_eq!(merged.get("y").unwrap().dims(), &[4, 3]);
        Ok(())
    }
}
