//! Tabular feature engineering ahead of the train/holdout split: exact
//! linear-combination screening, quantile binning, row cleanup, and the
//! mean-threshold flag statistics.

use crate::data::{self, DataError};
use crate::model::{BinSpec, FlagSpec};
use ndarray::{Array1, Array2};
use ndarray_linalg::{LeastSquaresSvd, Norm};
use polars::prelude::*;
use thiserror::Error;

/// Relative residual below which a column counts as an exact linear
/// combination of the columns kept so far.
const LINEAR_COMBO_TOLERANCE: f64 = 1e-8;

#[derive(Error, Debug)]
pub enum PrepError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("A least-squares solve failed while screening for linear combinations: {0}")]
    LinalgFailed(#[from] ndarray_linalg::error::LinalgError),
    #[error("Quantile binning needs at least two labels, got {0}")]
    TooFewLabels(usize),
    #[error("Column '{column}' does not have enough spread for {bins} quantile bins")]
    DegenerateBins { column: String, bins: usize },
    #[error("Cannot compute statistics over an empty table")]
    EmptyTable,
}

/// Removes every column that is an exact linear combination of the columns
/// to its left, leaving a linearly independent set. Columns named in
/// `exclude` (the response) are never candidates. Tables with fewer than two
/// candidate columns pass through untouched.
pub fn drop_linear_combos(
    df: &DataFrame,
    exclude: &[&str],
) -> Result<(DataFrame, Vec<String>), PrepError> {
    let candidates: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .filter(|name| !exclude.contains(&name.as_str()))
        .collect();
    if candidates.len() < 2 {
        return Ok((df.clone(), Vec::new()));
    }

    let mut kept: Vec<Array1<f64>> = Vec::new();
    let mut dropped: Vec<String> = Vec::new();
    for name in &candidates {
        let values = Array1::from_vec(data::numeric_column(df, name)?);
        if kept.is_empty() || !is_linear_combo(&kept, &values)? {
            kept.push(values);
        } else {
            dropped.push(name.clone());
        }
    }

    let mut out = df.clone();
    for name in &dropped {
        out = out.drop(name)?;
    }
    Ok((out, dropped))
}

fn is_linear_combo(basis: &[Array1<f64>], candidate: &Array1<f64>) -> Result<bool, PrepError> {
    let rows = candidate.len();
    let mut design = Array2::zeros((rows, basis.len()));
    for (j, column) in basis.iter().enumerate() {
        design.column_mut(j).assign(column);
    }
    let solution = design.least_squares(candidate)?;
    let residual = (&design.dot(&solution.solution) - candidate).norm_l2();
    let scale = candidate.norm_l2().max(1.0);
    Ok(residual / scale < LINEAR_COMBO_TOLERANCE)
}

/// Learns empirical quantile cut points for `column` and appends a string
/// bin column named `{column}_bin` with one label per half-open interval.
/// The column minimum falls below every interval and gets a null assignment;
/// [`drop_unbinned_rows`] discards those rows downstream.
pub fn bin_column(
    df: &DataFrame,
    column: &str,
    labels: &[&str],
) -> Result<(DataFrame, BinSpec), PrepError> {
    let bins = labels.len();
    if bins < 2 {
        return Err(PrepError::TooFewLabels(bins));
    }
    let values = data::numeric_column(df, column)?;
    if values.is_empty() {
        return Err(PrepError::EmptyTable);
    }
    let cuts = quantile_cuts(&values, bins);
    if cuts.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(PrepError::DegenerateBins {
            column: column.to_string(),
            bins,
        });
    }

    let spec = BinSpec {
        column: column.to_string(),
        cuts,
        labels: labels.iter().map(|label| label.to_string()).collect(),
    };
    let assigned: Vec<Option<String>> = values
        .iter()
        .map(|&v| spec.label_of(v).map(str::to_string))
        .collect();

    let mut out = df.clone();
    out.with_column(Column::new(spec.bin_name().into(), assigned))?;
    Ok((out, spec))
}

/// Empirical quantiles at `i / bins` for `i` in `0..=bins`, with linear
/// interpolation between order statistics.
fn quantile_cuts(values: &[f64], bins: usize) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| {
        a.partial_cmp(b)
            .expect("non-finite values are rejected at load time")
    });
    (0..=bins)
        .map(|i| {
            let position = i as f64 / bins as f64 * (sorted.len() - 1) as f64;
            let lo = position.floor() as usize;
            let hi = position.ceil() as usize;
            let fraction = position - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * fraction
        })
        .collect()
}

/// Drops every row with a null in any of the given bin columns. The dataset
/// shrinks by at least one row per binned column (the column minimum), more
/// when ties sit on the lowest cut.
pub fn drop_unbinned_rows(df: &DataFrame, bin_columns: &[&str]) -> Result<DataFrame, PrepError> {
    let mut keep = vec![true; df.height()];
    for name in bin_columns {
        let column = df.column(name)?;
        for (i, value) in column.str()?.into_iter().enumerate() {
            if value.is_none() {
                keep[i] = false;
            }
        }
    }
    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    Ok(df.filter(&mask)?)
}

/// Computes the mean-threshold flag statistics from the training partition.
/// Each source column becomes a `{source}_high` indicator at prediction
/// time, true where the value is at or above the training mean.
pub fn flag_means(train: &DataFrame, sources: &[&str]) -> Result<Vec<FlagSpec>, PrepError> {
    if train.height() == 0 {
        return Err(PrepError::EmptyTable);
    }
    sources
        .iter()
        .map(|source| {
            let values = data::numeric_column(train, source)?;
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            Ok(FlagSpec {
                source: source.to_string(),
                name: format!("{source}_high"),
                mean,
            })
        })
        .collect()
}
