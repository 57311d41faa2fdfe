//! Synthetic response generation. The revenue column is drawn i.i.d. from a
//! normal distribution with fixed parameters; it has no causal link to the
//! demographic attributes.

use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

pub const REVENUE_COLUMN: &str = "revenue";
pub const REVENUE_MEAN: f64 = 50_000.0;
pub const REVENUE_SD: f64 = 12_000.0;

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("Invalid response distribution parameters: {0}")]
    Distribution(#[from] rand_distr::NormalError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
}

/// Appends the `revenue` column, one draw per row. Deterministic for a fixed
/// seed and row count.
pub fn attach_revenue(
    df: &mut DataFrame,
    mean: f64,
    sd: f64,
    seed: u64,
) -> Result<(), SynthError> {
    let normal = Normal::new(mean, sd)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f64> = (0..df.height()).map(|_| normal.sample(&mut rng)).collect();
    df.with_column(Column::new(REVENUE_COLUMN.into(), values))?;
    Ok(())
}
