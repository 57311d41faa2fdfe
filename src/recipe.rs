//! Preprocessing recipe applied around the regression fit: near-zero-variance
//! column removal, a Yeo-Johnson power transform, then centering and scaling.
//! All parameters are learned from the training design matrix only and are
//! replayed verbatim on any matrix handed to [`FittedRecipe::apply`].

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// A column is a near-zero-variance candidate when its most common value
/// occurs this many times more often than the runner-up.
const FREQ_RATIO_CUTOFF: f64 = 95.0 / 19.0;
/// A candidate is removed when its distinct values make up less than this
/// percentage of the rows.
const UNIQUE_PCT_CUTOFF: f64 = 10.0;
/// Search interval for the Yeo-Johnson exponent.
const LAMBDA_RANGE: (f64, f64) = (-5.0, 5.0);

#[derive(Error, Debug)]
pub enum RecipeError {
    #[error("Cannot fit a preprocessing recipe on an empty design matrix")]
    EmptyMatrix,
    #[error("Design matrix has {found} columns but {expected} names were supplied")]
    NameCountMismatch { expected: usize, found: usize },
    #[error("Recipe was fitted on {expected} design columns but the input has {found}")]
    ColumnCountMismatch { expected: usize, found: usize },
}

/// Learned preprocessing parameters. Serialized into the model artifact so
/// prediction applies exactly the transform seen during training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedRecipe {
    /// Column count of the design matrix the recipe was fitted on.
    pub input_columns: usize,
    /// Indices of the surviving columns, in design-matrix order.
    pub kept_indices: Vec<usize>,
    pub kept_columns: Vec<String>,
    /// Names of the columns the near-zero-variance filter removed.
    pub removed_columns: Vec<String>,
    /// Yeo-Johnson exponent per kept column.
    pub lambdas: Vec<f64>,
    /// Post-transform centering and scaling parameters per kept column.
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl FittedRecipe {
    /// Learns the recipe from a training design matrix. `names` labels the
    /// matrix columns and must match its width.
    pub fn fit(design: &Array2<f64>, names: &[String]) -> Result<FittedRecipe, RecipeError> {
        if design.nrows() == 0 || design.ncols() == 0 {
            return Err(RecipeError::EmptyMatrix);
        }
        if names.len() != design.ncols() {
            return Err(RecipeError::NameCountMismatch {
                expected: names.len(),
                found: design.ncols(),
            });
        }

        let mut kept_indices = Vec::new();
        let mut removed_columns = Vec::new();
        for (j, column) in design.axis_iter(Axis(1)).enumerate() {
            let values: Vec<f64> = column.iter().copied().collect();
            if is_near_zero_variance(&values) {
                removed_columns.push(names[j].clone());
            } else {
                kept_indices.push(j);
            }
        }

        let mut lambdas = Vec::with_capacity(kept_indices.len());
        let mut means = Vec::with_capacity(kept_indices.len());
        let mut stds = Vec::with_capacity(kept_indices.len());
        for &j in &kept_indices {
            let values: Vec<f64> = design.column(j).iter().copied().collect();
            let lambda = estimate_lambda(&values);
            let transformed: Vec<f64> = values.iter().map(|&v| yeo_johnson(v, lambda)).collect();
            let mean = transformed.iter().sum::<f64>() / transformed.len() as f64;
            let std = sample_std(&transformed, mean);
            lambdas.push(lambda);
            means.push(mean);
            stds.push(std);
        }

        let kept_columns = kept_indices.iter().map(|&j| names[j].clone()).collect();
        Ok(FittedRecipe {
            input_columns: design.ncols(),
            kept_indices,
            kept_columns,
            removed_columns,
            lambdas,
            means,
            stds,
        })
    }

    /// Applies the learned transform to a design matrix with the same column
    /// layout as the one the recipe was fitted on.
    pub fn apply(&self, design: &Array2<f64>) -> Result<Array2<f64>, RecipeError> {
        if design.ncols() != self.input_columns {
            return Err(RecipeError::ColumnCountMismatch {
                expected: self.input_columns,
                found: design.ncols(),
            });
        }
        let mut out = Array2::zeros((design.nrows(), self.kept_indices.len()));
        for (slot, &j) in self.kept_indices.iter().enumerate() {
            let lambda = self.lambdas[slot];
            let mean = self.means[slot];
            let std = self.stds[slot];
            for (i, &v) in design.column(j).iter().enumerate() {
                out[[i, slot]] = (yeo_johnson(v, lambda) - mean) / std;
            }
        }
        Ok(out)
    }
}

/// The Yeo-Johnson power transform, defined for both positive and
/// non-positive inputs.
pub fn yeo_johnson(value: f64, lambda: f64) -> f64 {
    if value >= 0.0 {
        if lambda.abs() > 1e-10 {
            ((value + 1.0).powf(lambda) - 1.0) / lambda
        } else {
            (value + 1.0).ln()
        }
    } else {
        let two_minus = 2.0 - lambda;
        if two_minus.abs() > 1e-10 {
            -(((-value + 1.0).powf(two_minus) - 1.0) / two_minus)
        } else {
            -(-value + 1.0).ln()
        }
    }
}

/// Profile log-likelihood of the transformed sample under a normal model.
fn log_likelihood(values: &[f64], lambda: f64) -> f64 {
    let n = values.len() as f64;
    let transformed: Vec<f64> = values.iter().map(|&v| yeo_johnson(v, lambda)).collect();
    let mean = transformed.iter().sum::<f64>() / n;
    let variance = transformed.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>() / n;
    if !variance.is_finite() || variance <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let jacobian: f64 = values
        .iter()
        .map(|&v| v.signum() * (v.abs() + 1.0).ln())
        .sum();
    -0.5 * n * variance.ln() + (lambda - 1.0) * jacobian
}

/// Maximum-likelihood exponent via golden-section search over a fixed range.
fn estimate_lambda(values: &[f64]) -> f64 {
    let phi = (5f64.sqrt() - 1.0) / 2.0;
    let (mut lo, mut hi) = LAMBDA_RANGE;
    for _ in 0..80 {
        let left = hi - phi * (hi - lo);
        let right = lo + phi * (hi - lo);
        if log_likelihood(values, left) >= log_likelihood(values, right) {
            hi = right;
        } else {
            lo = left;
        }
    }
    0.5 * (lo + hi)
}

fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 1.0;
    }
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
        / (values.len() - 1) as f64;
    let std = variance.sqrt();
    // Zero spread collapses to a pure centering step.
    if std > 0.0 { std } else { 1.0 }
}

fn is_near_zero_variance(values: &[f64]) -> bool {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for &v in values {
        *counts.entry(v.to_bits()).or_insert(0) += 1;
    }
    if counts.len() <= 1 {
        return true;
    }
    let mut frequencies: Vec<usize> = counts.values().copied().collect();
    frequencies.sort_unstable_by(|a, b| b.cmp(a));
    let freq_ratio = frequencies[0] as f64 / frequencies[1] as f64;
    let unique_pct = 100.0 * counts.len() as f64 / values.len() as f64;
    freq_ratio > FREQ_RATIO_CUTOFF && unique_pct < UNIQUE_PCT_CUTOFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn names(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn yeo_johnson_identity_at_lambda_one() {
        for v in [-3.0, -0.5, 0.0, 0.5, 4.0] {
            assert_abs_diff_eq!(yeo_johnson(v, 1.0), v, epsilon = 1e-12);
        }
    }

    #[test]
    fn yeo_johnson_log_branches() {
        assert_abs_diff_eq!(yeo_johnson(3.0, 0.0), 4f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(yeo_johnson(-3.0, 2.0), -(4f64.ln()), epsilon = 1e-12);
    }

    #[test]
    fn constant_column_is_removed() {
        let mut design = Array2::zeros((50, 2));
        for i in 0..50 {
            design[[i, 0]] = i as f64;
            design[[i, 1]] = 7.0;
        }
        let recipe = FittedRecipe::fit(&design, &names(&["varying", "constant"])).unwrap();
        assert_eq!(recipe.kept_columns, vec!["varying"]);
        assert_eq!(recipe.removed_columns, vec!["constant"]);
    }

    #[test]
    fn lopsided_low_cardinality_column_is_removed() {
        // 99 zeros and a single one: ratio 99, unique 2%.
        let mut design = Array2::zeros((100, 2));
        for i in 0..100 {
            design[[i, 0]] = (i as f64).sin() + i as f64;
        }
        design[[0, 1]] = 1.0;
        let recipe = FittedRecipe::fit(&design, &names(&["dense", "sparse"])).unwrap();
        assert_eq!(recipe.kept_columns, vec!["dense"]);
    }

    #[test]
    fn balanced_indicator_survives() {
        let mut design = Array2::zeros((60, 1));
        for i in 0..60 {
            design[[i, 0]] = (i % 2) as f64;
        }
        let recipe = FittedRecipe::fit(&design, &names(&["flag"])).unwrap();
        assert_eq!(recipe.kept_columns, vec!["flag"]);
    }

    #[test]
    fn applied_columns_are_centered_and_scaled() {
        let mut design = Array2::zeros((80, 1));
        for i in 0..80 {
            design[[i, 0]] = (i as f64 * 1.7) % 13.0 + 0.3 * i as f64;
        }
        let recipe = FittedRecipe::fit(&design, &names(&["x"])).unwrap();
        let out = recipe.apply(&design).unwrap();
        let mean = out.column(0).sum() / out.nrows() as f64;
        let var = out
            .column(0)
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / (out.nrows() - 1) as f64;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(var, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn skewed_column_gets_a_shrinking_lambda() {
        // Strong right skew wants lambda < 1.
        let values: Vec<f64> = (1..200).map(|i| (i as f64 / 10.0).exp()).collect();
        let lambda = estimate_lambda(&values);
        assert!(lambda < 1.0, "expected shrinkage, got lambda = {lambda}");
    }

    #[test]
    fn apply_rejects_mismatched_width() {
        let design = Array2::from_shape_fn((30, 2), |(i, j)| (i * (j + 1)) as f64);
        let recipe = FittedRecipe::fit(&design, &names(&["a", "b"])).unwrap();
        let narrow = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        match recipe.apply(&narrow) {
            Err(RecipeError::ColumnCountMismatch { expected, found }) => {
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("expected ColumnCountMismatch, got {other:?}"),
        }
    }
}
