//! Command-line orchestrator. Runs the fixed training pipeline end to end:
//! load districts, synthesize the response, engineer features, split, fit,
//! report metrics, and persist the model. The `infer` subcommand replays a
//! saved artifact against a new district table.

use clap::{Parser, Subcommand};
use distrev::data::{self, load_districts};
use distrev::metrics;
use distrev::model::{self, FeaturePlan, ModelConfig, TrainedModel};
use distrev::prep;
use distrev::split;
use distrev::synth;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

const DEFAULT_SEED: u64 = 42;
const TRAIN_FRACTION: f64 = 0.9;
const INCOME_LABELS: [&str; 5] = ["lowest", "low", "middle", "high", "highest"];
const POPULATION_LABELS: [&str; 3] = ["small", "medium", "large"];
const FLAG_SOURCES: [&str; 3] = ["hs_diploma", "bachelors", "graduate"];

#[derive(Parser)]
#[command(
    name = "distrev",
    about = "Train and apply a toy district-revenue regression model",
    long_about = "Trains an ordinary least squares model predicting a synthetic revenue \
                  value from congressional district centroids and demographics, with \
                  centering, scaling, near-zero-variance filtering, and a Yeo-Johnson \
                  transform applied around the fit."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model from a district shapefile (outputs: revenue_model.toml)
    Train {
        /// Path to the district shapefile (.shp, with the .dbf table alongside)
        #[arg(default_value = "data/districts.shp")]
        shapefile: PathBuf,

        /// Where to write the fitted model artifact
        #[arg(long, default_value = "revenue_model.toml")]
        model_out: PathBuf,

        /// Seed for response synthesis and the train/holdout split
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },

    /// Apply a trained model to a district shapefile (outputs: predictions.tsv)
    Infer {
        /// Path to the district shapefile (.shp, with the .dbf table alongside)
        #[arg(default_value = "data/districts.shp")]
        shapefile: PathBuf,

        /// Path to the trained model artifact (.toml)
        #[arg(long)]
        model: PathBuf,

        /// Where to write the per-district predictions
        #[arg(long, default_value = "predictions.tsv")]
        predictions_out: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Train {
            shapefile,
            model_out,
            seed,
        } => train_command(&shapefile, &model_out, seed),
        Commands::Infer {
            shapefile,
            model,
            predictions_out,
        } => infer_command(&shapefile, &model, &predictions_out),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn train_command(
    shapefile_path: &Path,
    model_out: &Path,
    seed: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    // --- Phase 1: Load and synthesize ---
    println!("Loading districts from: {}", shapefile_path.display());
    let mut df = load_districts(shapefile_path)?;
    println!(
        "Loaded {} districts with {} attribute columns.",
        df.height(),
        df.width() - 2
    );
    synth::attach_revenue(&mut df, synth::REVENUE_MEAN, synth::REVENUE_SD, seed)?;

    // --- Phase 2: Feature engineering ---
    let (df, dropped_collinear) = prep::drop_linear_combos(&df, &[synth::REVENUE_COLUMN])?;
    println!(
        "Removed {} linearly dependent column(s): {:?}",
        dropped_collinear.len(),
        dropped_collinear
    );

    let (df, income_bins) = prep::bin_column(&df, "median_income", &INCOME_LABELS)?;
    let (df, population_bins) = prep::bin_column(&df, "population", &POPULATION_LABELS)?;
    let rows_before = df.height();
    let df = prep::drop_unbinned_rows(
        &df,
        &[&income_bins.bin_name(), &population_bins.bin_name()],
    )?;
    println!(
        "Dropped {} row(s) with undefined bin assignments.",
        rows_before - df.height()
    );

    // --- Phase 3: Partition, then learn flag statistics from training rows ---
    let response = data::numeric_column(&df, synth::REVENUE_COLUMN)?;
    let parts = split::stratified_split(&response, TRAIN_FRACTION, split::DEFAULT_STRATA, seed);
    let train_df = take_rows(&df, &parts.train)?;
    let holdout_df = take_rows(&df, &parts.holdout)?;
    println!(
        "Split {} rows into {} training / {} holdout.",
        df.height(),
        train_df.height(),
        holdout_df.height()
    );

    let flags = prep::flag_means(&train_df, &FLAG_SOURCES)?;
    let plan = FeaturePlan {
        numeric: numeric_feature_columns(&df, &income_bins.column, &population_bins.column),
        dropped_collinear,
        bins: vec![income_bins, population_bins],
        flags,
    };

    // --- Phase 4: Fit and report ---
    let config = ModelConfig {
        response: synth::REVENUE_COLUMN.to_string(),
        seed,
        plan,
    };
    let trained = model::train_model(&train_df, config)?;

    println!("Fitted coefficients:");
    println!("  (intercept): {:.6}", trained.intercept);
    for (name, coefficient) in trained.recipe.kept_columns.iter().zip(&trained.coefficients) {
        println!("  {name}: {coefficient:.6}");
    }

    let train_truth = data::numeric_column(&train_df, synth::REVENUE_COLUMN)?;
    let train_report = metrics::evaluate(&train_truth, &trained.predict(&train_df)?.to_vec())?;
    println!("Training metrics:\n{train_report}");

    let holdout_truth = data::numeric_column(&holdout_df, synth::REVENUE_COLUMN)?;
    let holdout_report =
        metrics::evaluate(&holdout_truth, &trained.predict(&holdout_df)?.to_vec())?;
    println!("Holdout metrics:\n{holdout_report}");

    // --- Phase 5: Persist ---
    trained.save(model_out)?;
    println!("Saved model to {}", model_out.display());
    Ok(())
}

fn infer_command(
    shapefile_path: &Path,
    model_path: &Path,
    predictions_out: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", model_path.display());
    let trained = TrainedModel::load(model_path)?;

    println!("Loading districts from: {}", shapefile_path.display());
    let df = load_districts(shapefile_path)?;
    let predictions = trained.predict(&df)?;

    let file = File::create(predictions_out)?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "district\tpredicted_revenue")?;
    for (i, prediction) in predictions.iter().enumerate() {
        writeln!(writer, "{}\t{:.4}", i + 1, prediction)?;
    }
    println!(
        "Wrote {} prediction(s) to {}",
        predictions.len(),
        predictions_out.display()
    );
    Ok(())
}

/// Numeric passthrough features: every remaining column except the response,
/// the bin sources and their string bin columns, and the flag sources.
fn numeric_feature_columns(
    df: &DataFrame,
    income_source: &str,
    population_source: &str,
) -> Vec<String> {
    let mut excluded: HashSet<String> = HashSet::new();
    excluded.insert(synth::REVENUE_COLUMN.to_string());
    for source in [income_source, population_source] {
        excluded.insert(source.to_string());
        excluded.insert(format!("{source}_bin"));
    }
    for source in FLAG_SOURCES {
        excluded.insert(source.to_string());
    }

    df.get_column_names()
        .iter()
        .map(|name| name.to_string())
        .filter(|name| !excluded.contains(name))
        .collect()
}

fn take_rows(df: &DataFrame, indices: &[usize]) -> PolarsResult<DataFrame> {
    let idx: Vec<IdxSize> = indices.iter().map(|&i| i as IdxSize).collect();
    df.take(&IdxCa::from_vec("idx".into(), idx))
}
