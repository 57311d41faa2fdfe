//! Model fitting, prediction, and persistence.
//!
//! The public structs here define the human-readable format of the trained
//! model when serialized to a TOML file. The artifact is self-contained: it
//! carries the full feature plan (collinear drops, bin cut points, flag
//! means) and the fitted preprocessing recipe, so a later process can load
//! it and call [`TrainedModel::predict`] on a raw district table with the
//! training schema.

use crate::data::{self, DataError};
use crate::recipe::{FittedRecipe, RecipeError};
use ndarray::{Array1, Array2, s};
use ndarray_linalg::LeastSquaresSvd;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// One quantile-binned column: empirical cut points plus the ordered labels
/// of the half-open intervals between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinSpec {
    pub column: String,
    /// `labels.len() + 1` cut points, from the column minimum to its maximum.
    pub cuts: Vec<f64>,
    pub labels: Vec<String>,
}

impl BinSpec {
    pub fn bin_name(&self) -> String {
        format!("{}_bin", self.column)
    }

    /// Assigns `value` to the interval `(cuts[i], cuts[i+1]]`. The lower
    /// bound of the first interval is open, so the column minimum (and
    /// anything below it) has no bin. Values above the last cut point fall
    /// into the final bin.
    pub fn assign(&self, value: f64) -> Option<usize> {
        if value <= self.cuts[0] {
            return None;
        }
        for i in 0..self.labels.len() {
            if value <= self.cuts[i + 1] {
                return Some(i);
            }
        }
        Some(self.labels.len() - 1)
    }

    pub fn label_of(&self, value: f64) -> Option<&str> {
        self.assign(value).map(|i| self.labels[i].as_str())
    }
}

/// One mean-threshold indicator: true where the source column is at or above
/// the reference mean. The mean is learned from the training partition only,
/// never from held-out rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagSpec {
    pub source: String,
    pub name: String,
    pub mean: f64,
}

/// Everything needed to rebuild the design matrix from a raw district table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePlan {
    /// Columns removed during training as exact linear combinations.
    pub dropped_collinear: Vec<String>,
    /// Raw numeric columns used directly as features.
    pub numeric: Vec<String>,
    pub bins: Vec<BinSpec>,
    pub flags: Vec<FlagSpec>,
}

impl FeaturePlan {
    /// Canonical design-matrix column order: numeric columns, then dummy
    /// columns per bin (first level dropped), then flag columns. This order
    /// is the implicit contract between fitting and prediction.
    pub fn design_columns(&self) -> Vec<String> {
        let mut names = self.numeric.clone();
        for bin in &self.bins {
            for label in bin.labels.iter().skip(1) {
                names.push(format!("{}[{}]", bin.bin_name(), label));
            }
        }
        for flag in &self.flags {
            names.push(flag.name.clone());
        }
        names
    }
}

/// The complete blueprint of a trained model: response name, seed, and the
/// feature plan learned during training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub response: String,
    pub seed: u64,
    pub plan: FeaturePlan,
}

/// The top-level, self-contained, trained model artifact. This is the
/// structure that gets saved to and loaded from a file.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedModel {
    pub intercept: f64,
    /// Coefficients aligned with `recipe.kept_columns`.
    pub coefficients: Vec<f64>,
    pub config: ModelConfig,
    pub recipe: FittedRecipe,
}

/// Custom error type for model fitting, loading, saving, and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Response column '{0}' is missing from the training table")]
    MissingResponse(String),
    #[error("Only {0} feature column(s) survived preprocessing; at least two are required")]
    TooFewColumns(usize),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Recipe(#[from] RecipeError),
    #[error("The least-squares solve failed; the design matrix may be degenerate: {0}")]
    SolveFailed(#[from] ndarray_linalg::error::LinalgError),
}

/// The main entry point for model fitting. Builds the design matrix from the
/// feature plan, fits the preprocessing recipe on it, and solves ordinary
/// least squares with an intercept.
pub fn train_model(train: &DataFrame, config: ModelConfig) -> Result<TrainedModel, ModelError> {
    if train.column(&config.response).is_err() {
        return Err(ModelError::MissingResponse(config.response.clone()));
    }
    let y = Array1::from_vec(data::numeric_column(train, &config.response)?);

    let design = build_design(train, &config.plan)?;
    let names = config.plan.design_columns();
    let recipe = FittedRecipe::fit(&design, &names)?;
    if recipe.kept_columns.len() < 2 {
        return Err(ModelError::TooFewColumns(recipe.kept_columns.len()));
    }
    let x = recipe.apply(&design)?;

    // Intercept as a trailing all-ones column, split back off the solution.
    let mut augmented = Array2::ones((x.nrows(), x.ncols() + 1));
    augmented.slice_mut(s![.., ..x.ncols()]).assign(&x);
    let solution = augmented.least_squares(&y)?;
    let params = solution.solution;
    let intercept = params[params.len() - 1];
    let coefficients = params.slice(s![..params.len() - 1]).to_vec();

    log::info!(
        "Fitted OLS model on {} rows and {} preprocessed columns.",
        x.nrows(),
        x.ncols()
    );

    Ok(TrainedModel {
        config,
        recipe,
        intercept,
        coefficients,
    })
}

/// Materializes the numeric design matrix for a raw district table: numeric
/// passthrough columns, bin dummies, and mean-threshold flags, in the
/// canonical order of [`FeaturePlan::design_columns`].
pub fn build_design(df: &DataFrame, plan: &FeaturePlan) -> Result<Array2<f64>, ModelError> {
    let rows = df.height();
    let mut columns: Vec<Vec<f64>> = Vec::new();

    for name in &plan.numeric {
        columns.push(data::numeric_column(df, name)?);
    }
    for bin in &plan.bins {
        let source = data::numeric_column(df, &bin.column)?;
        for level in 1..bin.labels.len() {
            columns.push(
                source
                    .iter()
                    .map(|&v| if bin.assign(v) == Some(level) { 1.0 } else { 0.0 })
                    .collect(),
            );
        }
    }
    for flag in &plan.flags {
        let source = data::numeric_column(df, &flag.source)?;
        columns.push(
            source
                .iter()
                .map(|&v| if v >= flag.mean { 1.0 } else { 0.0 })
                .collect(),
        );
    }

    let mut design = Array2::zeros((rows, columns.len()));
    for (j, column) in columns.iter().enumerate() {
        for (i, &v) in column.iter().enumerate() {
            design[[i, j]] = v;
        }
    }
    Ok(design)
}

impl TrainedModel {
    /// Applies the stored feature plan and preprocessing recipe to a raw
    /// district table and returns one prediction per row. The input must
    /// carry the training schema's column names.
    pub fn predict(&self, df: &DataFrame) -> Result<Array1<f64>, ModelError> {
        let design = build_design(df, &self.config.plan)?;
        let x = self.recipe.apply(&design)?;
        let coefficients = Array1::from_vec(self.coefficients.clone());
        Ok(x.dot(&coefficients) + self.intercept)
    }

    /// Saves the trained model to a file in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a trained model from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use polars::df;

    fn numeric_only_plan(columns: &[&str]) -> FeaturePlan {
        FeaturePlan {
            dropped_collinear: Vec::new(),
            numeric: columns.iter().map(|c| c.to_string()).collect(),
            bins: Vec::new(),
            flags: Vec::new(),
        }
    }

    fn linear_frame() -> DataFrame {
        // The response is exactly linear in the *preprocessed* features, so
        // the least-squares fit reproduces it to numerical precision. The
        // recipe is deterministic, so fitting it here and inside
        // `train_model` yields identical parameters.
        let a: Vec<f64> = (0..40).map(|i| i as f64 * 0.7 + (i % 5) as f64).collect();
        let b: Vec<f64> = (0..40).map(|i| (i % 7) as f64 * 1.3 + i as f64 * 0.1).collect();
        let frame = df!("a" => a, "b" => b).unwrap();

        let plan = numeric_only_plan(&["a", "b"]);
        let design = build_design(&frame, &plan).unwrap();
        let recipe = FittedRecipe::fit(&design, &plan.design_columns()).unwrap();
        let x = recipe.apply(&design).unwrap();
        let y: Vec<f64> = (0..x.nrows())
            .map(|i| 3.0 * x[[i, 0]] - 2.0 * x[[i, 1]] + 5.0)
            .collect();
        let mut frame = frame;
        frame.with_column(polars::prelude::Column::new("y".into(), y)).unwrap();
        frame
    }

    #[test]
    fn recovers_exact_linear_relationship() {
        let frame = linear_frame();
        let config = ModelConfig {
            response: "y".to_string(),
            seed: 0,
            plan: numeric_only_plan(&["a", "b"]),
        };
        let model = train_model(&frame, config).unwrap();
        let predicted = model.predict(&frame).unwrap();
        let truth = data::numeric_column(&frame, "y").unwrap();
        for (p, t) in predicted.iter().zip(&truth) {
            assert_abs_diff_eq!(*p, *t, epsilon = 1e-6);
        }
    }

    #[test]
    fn missing_response_is_an_error() {
        let frame = linear_frame();
        let config = ModelConfig {
            response: "absent".to_string(),
            seed: 0,
            plan: numeric_only_plan(&["a", "b"]),
        };
        match train_model(&frame, config) {
            Err(ModelError::MissingResponse(name)) => assert_eq!(name, "absent"),
            other => panic!("expected MissingResponse, got {other:?}"),
        }
    }

    #[test]
    fn too_few_surviving_columns_is_an_error() {
        // "c" is constant, so the near-zero-variance filter removes it and
        // only one feature survives.
        let frame = df!(
            "a" => (0..30).map(|i| i as f64).collect::<Vec<_>>(),
            "c" => vec![1.0f64; 30],
            "y" => (0..30).map(|i| i as f64 * 2.0).collect::<Vec<_>>()
        )
        .unwrap();
        let config = ModelConfig {
            response: "y".to_string(),
            seed: 0,
            plan: numeric_only_plan(&["a", "c"]),
        };
        match train_model(&frame, config) {
            Err(ModelError::TooFewColumns(n)) => assert_eq!(n, 1),
            other => panic!("expected TooFewColumns, got {other:?}"),
        }
    }

    #[test]
    fn bin_assignment_is_monotonic_and_skips_the_minimum() {
        let bin = BinSpec {
            column: "v".to_string(),
            cuts: vec![0.0, 1.0, 2.0, 3.0],
            labels: vec!["lo".into(), "mid".into(), "hi".into()],
        };
        assert_eq!(bin.assign(0.0), None);
        assert_eq!(bin.assign(-1.0), None);
        assert_eq!(bin.assign(0.5), Some(0));
        assert_eq!(bin.assign(1.0), Some(0));
        assert_eq!(bin.assign(1.5), Some(1));
        assert_eq!(bin.assign(3.0), Some(2));
        assert_eq!(bin.assign(99.0), Some(2));
        assert_eq!(bin.label_of(2.5), Some("hi"));

        let mut last = -1isize;
        for step in 1..=30 {
            let value = step as f64 * 0.1;
            let idx = bin.assign(value).unwrap() as isize;
            assert!(idx >= last, "bin index decreased at {value}");
            last = idx;
        }
    }

    #[test]
    fn design_columns_follow_the_canonical_order() {
        let plan = FeaturePlan {
            dropped_collinear: Vec::new(),
            numeric: vec!["a".into()],
            bins: vec![BinSpec {
                column: "inc".to_string(),
                cuts: vec![0.0, 1.0, 2.0],
                labels: vec!["low".into(), "high".into()],
            }],
            flags: vec![FlagSpec {
                source: "edu".to_string(),
                name: "edu_high".to_string(),
                mean: 1.0,
            }],
        };
        assert_eq!(
            plan.design_columns(),
            vec!["a", "inc_bin[high]", "edu_high"]
        );
    }

    #[test]
    fn save_load_round_trip_preserves_predictions() {
        let frame = linear_frame();
        let config = ModelConfig {
            response: "y".to_string(),
            seed: 0,
            plan: numeric_only_plan(&["a", "b"]),
        };
        let model = train_model(&frame, config).unwrap();
        let before = model.predict(&frame).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.toml");
        model.save(&path).unwrap();
        let reloaded = TrainedModel::load(&path).unwrap();
        let after = reloaded.predict(&frame).unwrap();

        assert_eq!(before.to_vec(), after.to_vec());
    }
}
