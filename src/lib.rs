//! clagent - continual-learning training agent
//!
//! This crate wraps a multi-head classifier in an [`Agent`] that trains it
//! over task-mixed batches. Every sample carries a task name that routes it to
//! its head, per-task losses are weighted by sample count, and in single-head
//! class-incremental settings the visible output columns grow with
//! [`Agent::add_valid_output_dim`].
//!
//! The crate is built on `candle`. Models are an MLP or a BERT encoder with
//! one linear head per task; weights persist as safetensors.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod model;
pub mod training;

// Re-exports
pub use agent::{prepare_input, Agent};
pub use config::{AgentConfig, BertSpec, ModelSpec, OptimizerKind, TaskHead};
pub use error::{Error, Result};
pub use model::{build_model, Classifier, ModelInput, SequenceInput, TaskOutputs, SINGLE_HEAD};
pub use training::{
    Batch, BatchSource, OutputMode, RawInput, TaskKind, TaskMetric, TensorLoader,
    TensorLoaderConfig, ValidOutDim,
};
