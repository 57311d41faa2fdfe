//! Regression error metrics: pure, deterministic functions of parallel
//! true/predicted sequences.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metric inputs have mismatched lengths: {truth} true values vs {predicted} predictions")]
    LengthMismatch { truth: usize, predicted: usize },
    #[error("Cannot compute metrics over empty inputs")]
    Empty,
    #[error("MAPE is undefined when a true value is zero")]
    ZeroTruth,
}

/// Six summary statistics for one partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionReport {
    /// Mean absolute error.
    pub mae: f64,
    /// MAE divided by the mean of the true values.
    pub rel_mae: f64,
    /// Mean absolute percentage error, in percent.
    pub mape: f64,
    /// Root mean squared error.
    pub rmse: f64,
    /// Coefficient of determination.
    pub r2: f64,
    /// Pearson correlation between truth and prediction.
    pub pearson: f64,
}

pub fn evaluate(truth: &[f64], predicted: &[f64]) -> Result<RegressionReport, MetricsError> {
    if truth.len() != predicted.len() {
        return Err(MetricsError::LengthMismatch {
            truth: truth.len(),
            predicted: predicted.len(),
        });
    }
    if truth.is_empty() {
        return Err(MetricsError::Empty);
    }
    if truth.contains(&0.0) {
        return Err(MetricsError::ZeroTruth);
    }
    let n = truth.len() as f64;

    let mae = truth
        .iter()
        .zip(predicted)
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / n;
    let truth_mean = truth.iter().sum::<f64>() / n;
    let rel_mae = mae / truth_mean;
    let mape = 100.0
        * truth
            .iter()
            .zip(predicted)
            .map(|(t, p)| ((t - p) / t).abs())
            .sum::<f64>()
        / n;
    let mse = truth
        .iter()
        .zip(predicted)
        .map(|(t, p)| (t - p) * (t - p))
        .sum::<f64>()
        / n;
    let rmse = mse.sqrt();

    let ss_res: f64 = truth
        .iter()
        .zip(predicted)
        .map(|(t, p)| (t - p) * (t - p))
        .sum();
    let ss_tot: f64 = truth.iter().map(|t| (t - truth_mean) * (t - truth_mean)).sum();
    let r2 = 1.0 - ss_res / (ss_tot + 1e-10);

    let predicted_mean = predicted.iter().sum::<f64>() / n;
    let covariance: f64 = truth
        .iter()
        .zip(predicted)
        .map(|(t, p)| (t - truth_mean) * (p - predicted_mean))
        .sum();
    let predicted_spread: f64 = predicted
        .iter()
        .map(|p| (p - predicted_mean) * (p - predicted_mean))
        .sum();
    let pearson = covariance / ((ss_tot * predicted_spread).sqrt() + 1e-10);

    Ok(RegressionReport {
        mae,
        rel_mae,
        mape,
        rmse,
        r2,
        pearson,
    })
}

impl fmt::Display for RegressionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  MAE:         {:.4}", self.mae)?;
        writeln!(f, "  MAE / mean:  {:.6}", self.rel_mae)?;
        writeln!(f, "  MAPE:        {:.4}%", self.mape)?;
        writeln!(f, "  RMSE:        {:.4}", self.rmse)?;
        writeln!(f, "  R^2:         {:.6}", self.r2)?;
        write!(f, "  Pearson r:   {:.6}", self.pearson)
    }
}
