//! Metric accumulation for training and validation passes
//!
//! This module provides the running-average [`AverageMeter`], a small
//! wall-clock [`Timer`], and the per-batch metric functions used to score
//! task heads (accuracy, Matthews correlation, and averaged Pearson/Spearman
//! correlation).

pub mod functions;
pub mod meter;

pub use functions::{accuracy, matthews, pearson, pearson_and_spearman, spearman};
pub use meter::{AverageMeter, Timer};
