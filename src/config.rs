//! Configuration structures for the training agent

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::SINGLE_HEAD;
use crate::training::tasks::OutputMode;

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Base learning rate
    pub lr: f64,
    /// Momentum, used by SGD and RMSprop only
    pub momentum: f64,
    /// Weight decay coefficient
    pub weight_decay: f64,
    /// Learning-rate milestones in epochs; the last entry is the epoch count
    pub schedule: Vec<usize>,
    /// Optimizer algorithm
    pub optimizer: OptimizerKind,
    /// Backbone registry entry
    pub model: ModelSpec,
    /// Output heads in iteration order
    pub out_dim: Vec<TaskHead>,
    /// Checkpoint to load strictly at construction
    pub model_weights: Option<PathBuf>,
    /// Progress line frequency in batches; `<= 0` silences the agent
    pub print_freq: i64,
    /// Device ids; `-1` selects the CPU, more than one id enables data parallelism
    pub gpuid: Vec<i64>,
    /// Rebuild optimizer and scheduler at the start of every `learn_batch`
    pub reset_optimizer: bool,
    /// Output modes for task names outside the GLUE table
    pub task_output_modes: HashMap<String, OutputMode>,
}

/// One output head
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskHead {
    /// Task name, matched against per-sample task labels
    pub task: String,
    /// Head width
    pub dim: usize,
}

impl TaskHead {
    /// Create a head description
    pub fn new(task: impl Into<String>, dim: usize) -> Self {
        Self {
            task: task.into(),
            dim,
        }
    }
}

/// Model registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModelSpec {
    /// Multi-layer perceptron over dense features
    Mlp {
        /// Flattened input width
        in_dim: usize,
        /// Hidden layer widths
        hidden: Vec<usize>,
    },
    /// BERT encoder over tokenized sequences
    Bert(BertSpec),
}

impl ModelSpec {
    /// Registry name
    pub fn name(&self) -> &'static str {
        match self {
            ModelSpec::Mlp { .. } => "mlp",
            ModelSpec::Bert(_) => "bert",
        }
    }
}

/// BERT encoder dimensions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BertSpec {
    /// Vocabulary size
    pub vocab_size: usize,
    /// Hidden size
    pub hidden_size: usize,
    /// Number of encoder layers
    pub num_hidden_layers: usize,
    /// Number of attention heads
    pub num_attention_heads: usize,
    /// Feed-forward width
    pub intermediate_size: usize,
    /// Maximum sequence length
    pub max_position_embeddings: usize,
    /// Number of segment types
    pub type_vocab_size: usize,
    /// Hidden dropout probability
    pub hidden_dropout_prob: f64,
    /// Layer norm epsilon
    pub layer_norm_eps: f64,
}

impl Default for BertSpec {
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            hidden_dropout_prob: 0.1,
            layer_norm_eps: 1e-12,
        }
    }
}

/// Optimizer algorithms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OptimizerKind {
    /// Stochastic gradient descent with optional momentum
    #[serde(rename = "SGD", alias = "sgd")]
    Sgd,
    /// RMSprop with optional momentum
    #[serde(rename = "RMSprop", alias = "rmsprop")]
    RmsProp,
    /// Adam with L2 weight decay
    #[serde(rename = "Adam", alias = "adam")]
    Adam,
    /// Adam with the AMSGrad maximum of second moments
    #[serde(rename = "amsgrad", alias = "AMSGrad")]
    AmsGrad,
    /// Adam with decoupled weight decay
    #[serde(rename = "AdamW", alias = "adamw")]
    AdamW,
    /// Adagrad
    #[serde(rename = "Adagrad", alias = "adagrad")]
    Adagrad,
    /// Resilient backpropagation
    #[serde(rename = "Rprop", alias = "rprop")]
    Rprop,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            momentum: 0.0,
            weight_decay: 0.0,
            schedule: vec![2],
            optimizer: OptimizerKind::Adam,
            model: ModelSpec::Mlp {
                in_dim: 784,
                hidden: vec![400, 400],
            },
            out_dim: vec![TaskHead::new(SINGLE_HEAD, 10)],
            model_weights: None,
            print_freq: 100,
            gpuid: vec![-1],
            reset_optimizer: false,
            task_output_modes: HashMap::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a JSON or YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        config.validate()?;
        debug!("Loaded agent configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration as JSON or YAML depending on the extension
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.lr > 0.0) {
            return Err(Error::config("Learning rate must be positive"));
        }
        if self.momentum < 0.0 {
            return Err(Error::config("Momentum must be non-negative"));
        }
        if self.weight_decay < 0.0 {
            return Err(Error::config("Weight decay must be non-negative"));
        }

        match self.schedule.last() {
            None => return Err(Error::config("Schedule must contain at least one epoch milestone")),
            Some(0) => return Err(Error::config("The last schedule milestone must be positive")),
            Some(_) => {}
        }
        if self.schedule.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::config("Schedule milestones must be non-decreasing"));
        }

        if self.out_dim.is_empty() {
            return Err(Error::config("At least one output head is required"));
        }
        let mut seen = HashSet::new();
        for head in &self.out_dim {
            if head.dim == 0 {
                return Err(Error::config(format!("Head '{}' has zero width", head.task)));
            }
            if !seen.insert(head.task.as_str()) {
                return Err(Error::config(format!("Duplicate head '{}'", head.task)));
            }
        }
        if self.out_dim.len() == 1 && self.out_dim[0].task != SINGLE_HEAD {
            return Err(Error::config(format!(
                "A single-head configuration must name its head '{}', found '{}'",
                SINGLE_HEAD, self.out_dim[0].task
            )));
        }

        if self.gpuid.is_empty() {
            return Err(Error::config("gpuid must list at least one device id (-1 for CPU)"));
        }

        if let ModelSpec::Mlp { in_dim: 0, .. } = self.model {
            return Err(Error::config("MLP input width must be positive"));
        }

        Ok(())
    }

    /// Whether more than one head is configured
    pub fn is_multihead(&self) -> bool {
        self.out_dim.len() > 1
    }

    /// Number of training epochs
    pub fn epochs(&self) -> usize {
        self.schedule.last().copied().unwrap_or(0)
    }

    /// Primary compute device
    pub fn device(&self) -> Result<Device> {
        match self.gpuid.first() {
            Some(&id) if id >= 0 => Ok(Device::new_cuda(id as usize)?),
            _ => Ok(Device::Cpu),
        }
    }

    /// Number of data-parallel replicas implied by `gpuid`
    pub fn data_parallel_replicas(&self) -> usize {
        match self.gpuid.first() {
            Some(&id) if id >= 0 && self.gpuid.len() > 1 => self.gpuid.len(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    fn two_task_config() -> AgentConfig {
        AgentConfig {
            out_dim: vec![TaskHead::new("sst-2", 2), TaskHead::new("cola", 2)],
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.is_multihead());
        assert_eq!(config.epochs(), 2);
    }

    #[test]
    fn test_config_file_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let config = two_task_config();

        let json = dir.path().join("agent.json");
        config.to_file(&json)?;
        assert_eq!(AgentConfig::from_file(&json)?, config);

        let yaml = dir.path().join("agent.yaml");
        config.to_file(&yaml)?;
        assert_eq!(AgentConfig::from_file(&yaml)?, config);
        Ok(())
    }

    #[test]
    fn test_optimizer_names_accept_original_spelling() -> Result<()> {
        let kind: OptimizerKind = serde_json::from_str("\"amsgrad\"")?;
        assert_eq!(kind, OptimizerKind::AmsGrad);
        let kind: OptimizerKind = serde_json::from_str("\"RMSprop\"")?;
        assert_eq!(kind, OptimizerKind::RmsProp);
        Ok(())
    }

    #[test]
    fn test_partial_yaml_uses_defaults() -> Result<()> {
        let config: AgentConfig = serde_yaml::from_str(
            "lr: 0.1\nschedule: [1, 3]\nout_dim:\n  - {task: a, dim: 2}\n  - {task: b, dim: 3}\n",
        )?;
        assert_eq!(config.epochs(), 3);
        assert!(config.is_multihead());
        assert_eq!(config.optimizer, OptimizerKind::Adam);
        Ok(())
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AgentConfig::default();
        config.lr = 0.0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.schedule = vec![];
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.schedule = vec![3, 1];
        assert!(config.validate().is_err());

        let mut config = two_task_config();
        config.out_dim[1].task = "sst-2".to_string();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.out_dim = vec![TaskHead::new("cola", 2)];
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.gpuid.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_selection() -> Result<()> {
        let config = AgentConfig::default();
        assert!(config.device()?.is_cpu());
        assert_eq!(config.data_parallel_replicas(), 1);

        let config = AgentConfig {
            gpuid: vec![0, 1],
            ..AgentConfig::default()
        };
        assert_eq!(config.data_parallel_replicas(), 2);
        Ok(())
    }
}
