// src/coerce.rs

//! Numeric type fixing ahead of a warehouse load.
//!
//! Raw exports carry integer status codes as float-looking text (`"1.0"`),
//! which the warehouse refuses to join against INT64 columns. Each configured
//! column is parsed to a number, unparseable cells become null, and the column
//! is retyped to the requested nullable kind.

use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef, AsArray, Float64Array, Int64Array},
    compute::kernels::cast::{cast, cast_with_options, CastOptions},
    datatypes::{DataType, Float64Type, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Target type of a coerced column. Both kinds are nullable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericKind {
    #[serde(alias = "Int64", alias = "int")]
    Integer,
    #[serde(alias = "Float64", alias = "double")]
    Float,
}

impl NumericKind {
    pub fn data_type(self) -> DataType {
        match self {
            NumericKind::Integer => DataType::Int64,
            NumericKind::Float => DataType::Float64,
        }
    }
}

/// Why a whole column could not be converted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionError {
    #[error("value {value} at row {row} is not a whole number")]
    NotIntegral { row: usize, value: f64 },

    #[error("value {value} at row {row} cannot be held exactly in a 64-bit integer")]
    OutOfRange { row: usize, value: f64 },

    #[error("unsupported column type {0}")]
    UnsupportedType(DataType),

    #[error("cast failed: {0}")]
    Cast(String),
}

/// What happened to one configured column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnOutcome {
    /// Retyped; `nulls_introduced` counts non-null cells that failed to parse.
    Converted { nulls_introduced: usize },
    /// The column is not in this dataset.
    SkippedMissing,
    /// Left untouched.
    Failed(CoercionError),
}

/// Per-column outcomes, in the order the columns were configured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoercionReport {
    pub outcomes: Vec<(String, ColumnOutcome)>,
}

impl CoercionReport {
    pub fn outcome(&self, column: &str) -> Option<&ColumnOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, outcome)| outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &CoercionError)> {
        self.outcomes.iter().filter_map(|(name, outcome)| match outcome {
            ColumnOutcome::Failed(err) => Some((name.as_str(), err)),
            _ => None,
        })
    }

    pub fn converted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ColumnOutcome::Converted { .. }))
            .count()
    }
}

/// Convert every column in `targets` that exists in `batch`.
///
/// A column that cannot be converted as a whole is reported and left as it
/// was; the remaining columns are still processed. Columns are independent,
/// so the order of `targets` does not affect the resulting batch.
pub fn coerce_columns(
    batch: &RecordBatch,
    targets: &IndexMap<String, NumericKind>,
) -> Result<(RecordBatch, CoercionReport)> {
    let schema = batch.schema();
    let mut fields = schema.fields().to_vec();
    let mut columns = batch.columns().to_vec();
    let mut report = CoercionReport::default();

    for (name, kind) in targets {
        let Ok(idx) = schema.index_of(name) else {
            debug!(column = %name, "column absent, nothing to convert");
            report
                .outcomes
                .push((name.clone(), ColumnOutcome::SkippedMissing));
            continue;
        };

        match coerce_array(&columns[idx], *kind) {
            Ok((array, nulls_introduced)) => {
                info!(column = %name, kind = ?kind, nulls_introduced, "converted column");
                fields[idx] = Arc::new(
                    fields[idx]
                        .as_ref()
                        .clone()
                        .with_data_type(kind.data_type())
                        .with_nullable(true),
                );
                columns[idx] = array;
                report
                    .outcomes
                    .push((name.clone(), ColumnOutcome::Converted { nulls_introduced }));
            }
            Err(err) => {
                warn!(column = %name, kind = ?kind, error = %err, "could not convert column, leaving it unchanged");
                report
                    .outcomes
                    .push((name.clone(), ColumnOutcome::Failed(err)));
            }
        }
    }

    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    let out = RecordBatch::try_new_with_options(schema, columns, &options)
        .context("rebuilding batch with converted columns")?;

    Ok((out, report))
}

/// Returns the converted array plus the number of cells turned into nulls.
fn coerce_array(array: &ArrayRef, kind: NumericKind) -> Result<(ArrayRef, usize), CoercionError> {
    let source = array.data_type();

    if kind == NumericKind::Integer && source.is_integer() {
        let strict = CastOptions {
            safe: false,
            ..Default::default()
        };
        let out = cast_with_options(array, &DataType::Int64, &strict)
            .map_err(|e| CoercionError::Cast(e.to_string()))?;
        return Ok((out, 0));
    }

    if kind == NumericKind::Integer && is_text(source) {
        let (ints, nulls_introduced) = text_integers(array)?;
        return Ok((Arc::new(Int64Array::from(ints)), nulls_introduced));
    }

    let (values, nulls_introduced) = numeric_values(array)?;
    let out: ArrayRef = match kind {
        NumericKind::Float => Arc::new(Float64Array::from(values)),
        NumericKind::Integer => {
            let ints = values
                .into_iter()
                .enumerate()
                .map(|(row, v)| v.map(|value| whole_number(row, value)).transpose())
                .collect::<Result<Vec<_>, _>>()?;
            Arc::new(Int64Array::from(ints))
        }
    };
    Ok((out, nulls_introduced))
}

fn is_text(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View
    )
}

/// Parse text cells as exact integers, falling back to decimal forms such as
/// `"1.0"` or `"1e3"` only when the cell is not a plain integer literal.
fn text_integers(array: &ArrayRef) -> Result<(Vec<Option<i64>>, usize), CoercionError> {
    let text = cast(array, &DataType::Utf8).map_err(|e| CoercionError::Cast(e.to_string()))?;
    let mut nulls_introduced = 0;
    let mut values = Vec::with_capacity(text.len());

    for (row, cell) in text.as_string::<i32>().iter().enumerate() {
        let Some(cell) = cell else {
            values.push(None);
            continue;
        };
        let value = match cell.trim().parse::<i64>() {
            Ok(exact) => Some(exact),
            Err(_) => parse_number(cell)
                .map(|v| whole_number(row, v))
                .transpose()?,
        };
        if value.is_none() {
            nulls_introduced += 1;
        }
        values.push(value);
    }

    Ok((values, nulls_introduced))
}

/// Read any string, boolean or numeric column as finite f64s.
fn numeric_values(array: &ArrayRef) -> Result<(Vec<Option<f64>>, usize), CoercionError> {
    let mut nulls_introduced = 0;

    let values = match array.data_type() {
        dt if is_text(dt) => {
            let text = cast(array, &DataType::Utf8).map_err(|e| CoercionError::Cast(e.to_string()))?;
            text.as_string::<i32>()
                .iter()
                .map(|cell| {
                    let cell = cell?;
                    let parsed = parse_number(cell);
                    if parsed.is_none() {
                        nulls_introduced += 1;
                    }
                    parsed
                })
                .collect()
        }
        DataType::Null => vec![None; array.len()],
        dt if dt.is_numeric() || *dt == DataType::Boolean => {
            let floats =
                cast(array, &DataType::Float64).map_err(|e| CoercionError::Cast(e.to_string()))?;
            floats
                .as_primitive::<Float64Type>()
                .iter()
                .map(|cell| {
                    let value = cell?;
                    if value.is_finite() {
                        Some(value)
                    } else {
                        nulls_introduced += 1;
                        None
                    }
                })
                .collect()
        }
        other => return Err(CoercionError::UnsupportedType(other.clone())),
    };

    Ok((values, nulls_introduced))
}

fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

const MAX_EXACT_F64: f64 = 9_007_199_254_740_992.0;

fn whole_number(row: usize, value: f64) -> Result<i64, CoercionError> {
    if value.fract() != 0.0 {
        return Err(CoercionError::NotIntegral { row, value });
    }
    // past 2^53 an f64 may already be a rounded neighbour of the source value
    if value.abs() >= MAX_EXACT_F64 {
        return Err(CoercionError::OutOfRange { row, value });
    }
    Ok(value as i64)
}
