//! Task kinds: output mode, loss and metric per task name

use std::collections::HashMap;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::training::loss::BaseLoss;
use crate::training::metrics::{accuracy, matthews, pearson_and_spearman};

/// Whether a task predicts classes or a real value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Integer class targets, cross-entropy loss
    Classification,
    /// Real-valued targets, mean squared error loss
    Regression,
}

/// GLUE task names and their output modes
pub const GLUE_OUTPUT_MODES: &[(&str, OutputMode)] = &[
    ("cola", OutputMode::Classification),
    ("mnli", OutputMode::Classification),
    ("mnli-mm", OutputMode::Classification),
    ("mrpc", OutputMode::Classification),
    ("sst-2", OutputMode::Classification),
    ("sts-b", OutputMode::Regression),
    ("qqp", OutputMode::Classification),
    ("qnli", OutputMode::Classification),
    ("rte", OutputMode::Classification),
    ("wnli", OutputMode::Classification),
];

/// Metric reported for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMetric {
    /// Percentage of correct arg-max predictions
    Accuracy,
    /// Matthews correlation coefficient
    Matthews,
    /// Mean of Pearson and Spearman correlation
    Correlation,
}

impl TaskMetric {
    /// Evaluate the metric on matching predictions and targets
    pub fn compute(&self, output: &Tensor, target: &Tensor) -> Result<f64> {
        match self {
            TaskMetric::Accuracy => accuracy(output, target),
            TaskMetric::Matthews => matthews(output, target),
            TaskMetric::Correlation => pearson_and_spearman(output, target),
        }
    }

    /// Short label used in progress lines
    pub fn label(&self) -> &'static str {
        match self {
            TaskMetric::Accuracy => "Acc",
            TaskMetric::Matthews => "mcc",
            TaskMetric::Correlation => "corr",
        }
    }
}

/// Resolved behaviour of a named task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskKind {
    /// Output mode
    pub mode: OutputMode,
    /// Reported metric
    pub metric: TaskMetric,
}

impl TaskKind {
    /// Resolve a task name
    ///
    /// Configured overrides win over the GLUE table. Names known to neither are
    /// treated as classification tasks scored by accuracy, which covers the
    /// generic single-head `All` case.
    pub fn resolve(name: &str, overrides: &HashMap<String, OutputMode>) -> Self {
        let lower = name.to_ascii_lowercase();
        let mode = overrides
            .get(name)
            .copied()
            .or_else(|| glue_output_mode(&lower))
            .unwrap_or(OutputMode::Classification);

        // CoLA reports Matthews correlation whatever its output mode
        let metric = if lower == "cola" {
            TaskMetric::Matthews
        } else {
            match mode {
                OutputMode::Regression => TaskMetric::Correlation,
                OutputMode::Classification => TaskMetric::Accuracy,
            }
        };
        Self { mode, metric }
    }

    /// Loss for this task's output mode
    pub fn base_loss(&self) -> BaseLoss {
        match self.mode {
            OutputMode::Classification => BaseLoss::CrossEntropy,
            OutputMode::Regression => BaseLoss::MeanSquaredError,
        }
    }
}

/// Output mode of a GLUE task
pub fn glue_output_mode(name: &str) -> Option<OutputMode> {
    GLUE_OUTPUT_MODES
        .iter()
        .find(|(task, _)| *task == name)
        .map(|(_, mode)| *mode)
}
