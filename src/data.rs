//! # Shapefile Loading and Validation
//!
//! This module is the exclusive entry point for district data. It reads an
//! ESRI shapefile bundle (.shp geometry plus .dbf attribute table), reduces
//! every district polygon to its geometric centroid, and validates the
//! demographic attributes against a strict, predefined schema before handing
//! a clean `polars` DataFrame to the rest of the pipeline.
//!
//! - Strict schema: attribute field names are not configurable. The module
//!   enforces the fixed census extract layout (`POP`, `MED_INC`, ...), which
//!   simplifies the interface and eliminates a class of configuration errors.
//! - User-centric errors: failures are assumed to be user-input errors. The
//!   `DataError` enum is designed to give clear, actionable feedback about
//!   which record and which field is at fault.

use polars::prelude::*;
use shapefile::dbase::FieldValue;
use shapefile::{Polygon, PolygonRing, Shape};
use std::path::Path;
use thiserror::Error;

/// Maps each required DBF attribute field to the DataFrame column it becomes.
pub const ATTRIBUTE_FIELDS: [(&str, &str); 10] = [
    ("POP", "population"),
    ("AGE_U18", "age_under_18"),
    ("AGE_18_34", "age_18_34"),
    ("AGE_35_64", "age_35_64"),
    ("AGE_O65", "age_over_65"),
    ("HS_DIPL", "hs_diploma"),
    ("BACHELORS", "bachelors"),
    ("GRADUATE", "graduate"),
    ("MED_INC", "median_income"),
    ("PCAP_INC", "per_capita_income"),
];

/// Columns holding the centroid coordinates of each district polygon.
pub const CENTROID_COLUMNS: [&str; 2] = ["cent_x", "cent_y"];

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to read shapefile bundle: {0}")]
    Shapefile(#[from] shapefile::Error),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Record {record}: expected polygon geometry, found {found}")]
    UnexpectedGeometry { record: usize, found: &'static str },
    #[error("Record {record}: polygon has no vertices, cannot derive a centroid")]
    EmptyGeometry { record: usize },
    #[error(
        "The required attribute field '{0}' was not found in the .dbf table. Please check spelling and case."
    )]
    FieldNotFound(String),
    #[error("Record {record}: attribute field '{field}' is not numeric (found {found})")]
    FieldWrongType {
        record: usize,
        field: String,
        found: String,
    },
    #[error("Record {record}: attribute field '{field}' has no value. This tool requires complete data.")]
    MissingValue { record: usize, field: String },
    #[error(
        "Non-finite values (NaN or Infinity) were found in column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValue(String),
    #[error("The required column '{0}' was not found in the table.")]
    ColumnNotFound(String),
    #[error("Column '{column}' could not be converted to f64. It contains non-numeric data. (Found type: {found})")]
    ColumnWrongType { column: String, found: String },
    #[error("Missing or null values were found in column '{0}'.")]
    MissingValuesFound(String),
}

/// Loads a district shapefile bundle into a flat table: one row per polygon,
/// centroid coordinates first, then the demographic attribute columns.
pub fn load_districts(path: &Path) -> Result<DataFrame, DataError> {
    let mut reader = shapefile::Reader::from_path(path)?;

    let mut cent_x: Vec<f64> = Vec::new();
    let mut cent_y: Vec<f64> = Vec::new();
    let mut attributes: Vec<Vec<f64>> = vec![Vec::new(); ATTRIBUTE_FIELDS.len()];

    for (record_idx, pair) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = pair?;
        let polygon = match shape {
            Shape::Polygon(polygon) => polygon,
            other => {
                return Err(DataError::UnexpectedGeometry {
                    record: record_idx,
                    found: shape_name(&other),
                });
            }
        };

        let (x, y) =
            polygon_centroid(&polygon).ok_or(DataError::EmptyGeometry { record: record_idx })?;
        cent_x.push(x);
        cent_y.push(y);

        for (slot, (field, _)) in ATTRIBUTE_FIELDS.iter().enumerate() {
            attributes[slot].push(numeric_field(&record, record_idx, field)?);
        }
    }

    let mut columns: Vec<Column> = Vec::with_capacity(2 + ATTRIBUTE_FIELDS.len());
    columns.push(Column::new(CENTROID_COLUMNS[0].into(), cent_x));
    columns.push(Column::new(CENTROID_COLUMNS[1].into(), cent_y));
    for ((_, name), values) in ATTRIBUTE_FIELDS.iter().zip(attributes) {
        validate_is_finite(&values, name)?;
        columns.push(Column::new((*name).into(), values));
    }

    Ok(DataFrame::new(columns)?)
}

/// Extracts a column as a dense `Vec<f64>`, rejecting nulls, non-numeric
/// dtypes, and non-finite values.
pub fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    let column = df
        .column(name)
        .map_err(|_| DataError::ColumnNotFound(name.to_string()))?;
    if column.null_count() > 0 {
        return Err(DataError::MissingValuesFound(name.to_string()));
    }

    let casted = match column.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column: name.to_string(),
                found: format!("{:?}", column.dtype()),
            });
        }
    };
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column: name.to_string(),
            found: format!("{:?}", column.dtype()),
        });
    }

    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    validate_is_finite(&values, name)?;
    Ok(values)
}

fn validate_is_finite(values: &[f64], column: &str) -> Result<(), DataError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValue(column.to_string()));
    }
    Ok(())
}

/// Area-weighted centroid over all rings of a polygon (shoelace formula).
/// Outer and inner rings carry opposite winding, so accumulating the signed
/// cross products subtracts holes without any orientation bookkeeping.
/// Degenerate polygons with no measurable area fall back to the vertex mean.
fn polygon_centroid(polygon: &Polygon) -> Option<(f64, f64)> {
    let mut area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut vertices = 0usize;

    for ring in polygon.rings() {
        let points = match ring {
            PolygonRing::Outer(points) => points,
            PolygonRing::Inner(points) => points,
        };
        for pair in points.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let cross = a.x * b.y - b.x * a.y;
            area += cross;
            cx += (a.x + b.x) * cross;
            cy += (a.y + b.y) * cross;
        }
        for point in points {
            sum_x += point.x;
            sum_y += point.y;
            vertices += 1;
        }
    }

    if vertices == 0 {
        return None;
    }
    if area.abs() < 1e-12 {
        return Some((sum_x / vertices as f64, sum_y / vertices as f64));
    }
    Some((cx / (3.0 * area), cy / (3.0 * area)))
}

fn numeric_field(
    record: &shapefile::dbase::Record,
    record_idx: usize,
    field: &str,
) -> Result<f64, DataError> {
    match record.get(field) {
        None => Err(DataError::FieldNotFound(field.to_string())),
        Some(FieldValue::Numeric(Some(value))) => Ok(*value),
        Some(FieldValue::Float(Some(value))) => Ok(f64::from(*value)),
        Some(FieldValue::Integer(value)) => Ok(f64::from(*value)),
        Some(FieldValue::Numeric(None)) | Some(FieldValue::Float(None)) => {
            Err(DataError::MissingValue {
                record: record_idx,
                field: field.to_string(),
            })
        }
        Some(other) => Err(DataError::FieldWrongType {
            record: record_idx,
            field: field.to_string(),
            found: format!("{other:?}"),
        }),
    }
}

fn shape_name(shape: &Shape) -> &'static str {
    match shape {
        Shape::NullShape => "null shape",
        Shape::Point(_) | Shape::PointM(_) | Shape::PointZ(_) => "point",
        Shape::Polyline(_) | Shape::PolylineM(_) | Shape::PolylineZ(_) => "polyline",
        Shape::Multipoint(_) | Shape::MultipointM(_) | Shape::MultipointZ(_) => "multipoint",
        Shape::PolygonM(_) | Shape::PolygonZ(_) => "measured polygon",
        Shape::Multipatch(_) => "multipatch",
        Shape::Polygon(_) => "polygon",
    }
}
