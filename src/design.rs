//! Design-matrix assembly from a polars `DataFrame`.
//!
//! Numeric terms are cast to `f64`; categorical terms are expanded into
//! first-level-dropped indicator columns (levels in lexical order, the first
//! absorbed by the intercept or thresholds).

use crate::MnarError;
use nalgebra::DMatrix;
use polars::prelude::*;
use std::collections::BTreeSet;

/// A dense design matrix with one name per column.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub matrix: DMatrix<f64>,
    pub names: Vec<String>,
}

/// Reads a column as non-null `i64` values, casting if necessary.
pub(crate) fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<i64>, MnarError> {
    let series = df
        .column(name)
        .map_err(|_| MnarError::ColumnNotFound(name.to_string()))?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    series
        .i64()?
        .into_iter()
        .map(|v| {
            v.ok_or_else(|| MnarError::Validation(format!("column '{}' contains nulls", name)))
        })
        .collect()
}

/// Reads a column as `Option<i64>` values (nulls preserved), casting if necessary.
pub(crate) fn opt_i64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>, MnarError> {
    let series = df
        .column(name)
        .map_err(|_| MnarError::ColumnNotFound(name.to_string()))?
        .as_materialized_series()
        .cast(&DataType::Int64)?;
    Ok(series.i64()?.into_iter().collect())
}

/// Reads a column as non-null `f64` values, casting if necessary.
pub(crate) fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<f64>, MnarError> {
    let series = df
        .column(name)
        .map_err(|_| MnarError::ColumnNotFound(name.to_string()))?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    series
        .f64()?
        .into_iter()
        .map(|v| {
            v.ok_or_else(|| MnarError::Validation(format!("column '{}' contains nulls", name)))
        })
        .collect()
}

/// Reads a column as non-null strings, casting if necessary.
pub(crate) fn str_values(df: &DataFrame, name: &str) -> Result<Vec<String>, MnarError> {
    let series = df
        .column(name)
        .map_err(|_| MnarError::ColumnNotFound(name.to_string()))?
        .as_materialized_series()
        .cast(&DataType::String)?;
    series
        .str()?
        .into_iter()
        .map(|v| {
            v.map(str::to_string)
                .ok_or_else(|| MnarError::Validation(format!("column '{}' contains nulls", name)))
        })
        .collect()
}

/// Assembles a design matrix over all rows of `df`.
///
/// With `intercept`, a leading column of ones is included. Every numeric term
/// becomes one column; every categorical term contributes one indicator per
/// level except the lexically first.
pub fn build_design(
    df: &DataFrame,
    numeric: &[String],
    categorical: &[String],
    intercept: bool,
) -> Result<DesignMatrix, MnarError> {
    let n = df.height();
    let mut columns: Vec<(String, Vec<f64>)> = Vec::new();

    if intercept {
        columns.push(("intercept".to_string(), vec![1.0; n]));
    }
    for name in numeric {
        columns.push((name.clone(), f64_values(df, name)?));
    }
    for name in categorical {
        let values = str_values(df, name)?;
        let levels: BTreeSet<&String> = values.iter().collect();
        for level in levels.into_iter().skip(1) {
            let indicator: Vec<f64> = values
                .iter()
                .map(|v| if v == level { 1.0 } else { 0.0 })
                .collect();
            columns.push((format!("{}_{}", name, level), indicator));
        }
    }

    if columns.is_empty() {
        return Err(MnarError::Validation(
            "design: no columns to assemble".to_string(),
        ));
    }

    let k = columns.len();
    let mut data = Vec::with_capacity(n * k);
    for (_, values) in &columns {
        data.extend_from_slice(values);
    }
    Ok(DesignMatrix {
        // from_vec fills column-by-column, matching the layout above
        matrix: DMatrix::from_vec(n, k, data),
        names: columns.into_iter().map(|(name, _)| name).collect(),
    })
}
