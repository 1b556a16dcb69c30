//! Per-batch metric functions
//!
//! All functions take the raw head output and the matching targets for the
//! same rows. Classification metrics use the arg-max over the last dimension;
//! correlation metrics flatten the outputs.

use candle_core::{DType, Tensor, D};

use crate::error::{Error, Result};

fn predicted_classes(output: &Tensor) -> Result<Vec<u32>> {
    Ok(output.argmax(D::Minus1)?.flatten_all()?.to_vec1::<u32>()?)
}

fn class_targets(target: &Tensor) -> Result<Vec<u32>> {
    Ok(target.flatten_all()?.to_dtype(DType::U32)?.to_vec1::<u32>()?)
}

fn float_values(t: &Tensor) -> Result<Vec<f64>> {
    Ok(t.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?)
}

/// Percentage of rows whose arg-max matches the target class
pub fn accuracy(output: &Tensor, target: &Tensor) -> Result<f64> {
    let predicted = predicted_classes(output)?;
    let expected = class_targets(target)?;
    if predicted.len() != expected.len() {
        return Err(Error::invalid_input(format!(
            "accuracy: {} predictions for {} targets",
            predicted.len(),
            expected.len()
        )));
    }
    if expected.is_empty() {
        return Ok(0.0);
    }

    let correct = predicted
        .iter()
        .zip(expected.iter())
        .filter(|(p, t)| p == t)
        .count();
    Ok(correct as f64 * 100.0 / expected.len() as f64)
}

/// Matthews correlation coefficient of the arg-max predictions
///
/// Uses the multi-class generalisation; for two classes it reduces to the
/// usual `(tp*tn - fp*fn) / sqrt(...)`. Degenerate batches (a single
/// predicted or true class) score 0.0.
pub fn matthews(output: &Tensor, target: &Tensor) -> Result<f64> {
    let predicted = predicted_classes(output)?;
    let expected = class_targets(target)?;
    if predicted.len() != expected.len() {
        return Err(Error::invalid_input(format!(
            "matthews: {} predictions for {} targets",
            predicted.len(),
            expected.len()
        )));
    }

    let num_classes = predicted
        .iter()
        .chain(expected.iter())
        .copied()
        .max()
        .map_or(0, |m| m as usize + 1);
    let mut pred_counts = vec![0f64; num_classes];
    let mut true_counts = vec![0f64; num_classes];
    let mut correct = 0f64;
    for (&p, &t) in predicted.iter().zip(expected.iter()) {
        pred_counts[p as usize] += 1.0;
        true_counts[t as usize] += 1.0;
        if p == t {
            correct += 1.0;
        }
    }

    let samples = expected.len() as f64;
    let cross: f64 = pred_counts
        .iter()
        .zip(true_counts.iter())
        .map(|(p, t)| p * t)
        .sum();
    let pred_sq: f64 = pred_counts.iter().map(|p| p * p).sum();
    let true_sq: f64 = true_counts.iter().map(|t| t * t).sum();

    let numerator = correct * samples - cross;
    let denominator = ((samples * samples - pred_sq) * (samples * samples - true_sq)).sqrt();
    if denominator == 0.0 {
        Ok(0.0)
    } else {
        Ok(numerator / denominator)
    }
}

/// Pearson correlation of two equally long series, 0.0 when either is constant
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        0.0
    } else {
        cov / (var_x.sqrt() * var_y.sqrt())
    }
}

/// Ranks with ties sharing their average rank
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Spearman rank correlation
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    pearson(&average_ranks(x), &average_ranks(y))
}

/// Mean of the Pearson and Spearman correlations of flattened outputs
pub fn pearson_and_spearman(output: &Tensor, target: &Tensor) -> Result<f64> {
    let predicted = float_values(output)?;
    let expected = float_values(target)?;
    if predicted.len() != expected.len() {
        return Err(Error::invalid_input(format!(
            "correlation: {} predictions for {} targets",
            predicted.len(),
            expected.len()
        )));
    }
    Ok((pearson(&predicted, &expected) + spearman(&predicted, &expected)) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use approx::assert_relative_eq;
    use candle_core::Device;

    #[test]
    fn test_accuracy_is_percentage() -> Result<()> {
        let device = Device::Cpu;
        let output = Tensor::new(&[[0.9f32, 0.1], [0.2, 0.8], [0.7, 0.3], [0.4, 0.6]], &device)?;
        let target = Tensor::new(&[0u32, 1, 1, 1], &device)?;

        assert_relative_eq!(accuracy(&output, &target)?, 75.0);
        Ok(())
    }

    #[test]
    fn test_matthews_binary() -> Result<()> {
        let device = Device::Cpu;
        // predictions: 1, 1, 0, 0, 1 ; targets: 1, 0, 0, 0, 1
        let output = Tensor::new(
            &[[0.0f32, 1.0], [0.0, 1.0], [1.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            &device,
        )?;
        let target = Tensor::new(&[1u32, 0, 0, 0, 1], &device)?;

        // tp=2 tn=2 fp=1 fn=0 -> (4 - 0) / sqrt(3 * 2 * 3 * 2)
        assert_relative_eq!(matthews(&output, &target)?, 4.0 / 6.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_matthews_degenerate_is_zero() -> Result<()> {
        let device = Device::Cpu;
        let output = Tensor::new(&[[1.0f32, 0.0], [1.0, 0.0]], &device)?;
        let target = Tensor::new(&[0u32, 1], &device)?;
        assert_eq!(matthews(&output, &target)?, 0.0);
        Ok(())
    }

    #[test]
    fn test_pearson_and_spearman_perfect() -> Result<()> {
        let device = Device::Cpu;
        let output = Tensor::new(&[[1.0f32], [2.0], [3.0], [4.0]], &device)?;
        let target = Tensor::new(&[2.0f32, 4.0, 6.0, 8.0], &device)?;
        assert_relative_eq!(pearson_and_spearman(&output, &target)?, 1.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_spearman_handles_ties() {
        let ranks = average_ranks(&[3.0, 1.0, 3.0, 2.0]);
        assert_eq!(ranks, vec![3.5, 1.0, 3.5, 2.0]);
        assert_relative_eq!(spearman(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]), -1.0);
    }

    #[test]
    fn test_pearson_constant_series() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
    }
}
