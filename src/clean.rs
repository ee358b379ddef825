//! Query result cleaning
//!
//! Turns a raw query result into a [`CleanedDataset`]: every row has its
//! coordinate columns filled in, no numeric column holds an infinity or NaN,
//! and no column holds a missing value. Timestamp-like columns are rewritten as
//! text so they serialize directly into the map widget configuration.
//!
//! Data-quality problems are handled here by dropping rows and are never
//! reported as errors. Cleaning everything away yields a valid empty dataset.

use polars::prelude::*;
use tracing::debug;

use crate::{DataFrame, GeodashError, Result};

/// A query result that passed through the cleaner.
///
/// Invariant: no row has a missing value in any column and no floating point
/// column contains a non-finite value.
#[derive(Debug, Clone)]
pub struct CleanedDataset {
    frame: DataFrame,
    required: Vec<String>,
    temporal: Vec<String>,
}

impl CleanedDataset {
    /// The cleaned rows.
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Columns that were required to be present (the coordinates).
    pub fn required_columns(&self) -> &[String] {
        &self.required
    }

    /// Columns that held dates or timestamps before being normalized to text.
    pub fn temporal_columns(&self) -> &[String] {
        &self.temporal
    }

    pub fn is_temporal(&self, column: &str) -> bool {
        self.temporal.iter().any(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.frame.column(column).is_ok()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Keep the rows where `keep` is true.
    ///
    /// A subset of a clean dataset is still clean, so this never re-runs the cleaner.
    pub fn retain(&self, keep: &[bool]) -> Result<CleanedDataset> {
        if keep.len() != self.frame.height() {
            return Err(GeodashError::InternalError(format!(
                "Row mask has {} entries but dataset has {} rows",
                keep.len(),
                self.frame.height()
            )));
        }
        let mask: BooleanChunked = keep.iter().copied().map(Some).collect();
        Ok(CleanedDataset {
            frame: self.frame.filter(&mask)?,
            required: self.required.clone(),
            temporal: self.temporal.clone(),
        })
    }
}

/// Clean a query result.
///
/// 1. Drop rows with a missing value in any of the `required` columns
/// 2. Replace positive/negative infinity (and NaN) with missing in every float column
/// 3. Drop any row still containing a missing value in any column
/// 4. Rewrite date, datetime and time columns as text
///
/// Fails only when a required column is absent from the result, which is a
/// configuration mistake rather than a data-quality issue.
pub fn clean(result: DataFrame, required: &[&str]) -> Result<CleanedDataset> {
    for name in required {
        if result.column(name).is_err() {
            let columns: Vec<String> = result
                .get_column_names()
                .iter()
                .map(|s| s.to_string())
                .collect();
            return Err(GeodashError::ConfigError(format!(
                "Coordinate column '{}' not found in query result (columns: {})",
                name,
                columns.join(", ")
            )));
        }
    }

    let rows_in = result.height();

    let frame = drop_missing(result, required)?;
    let after_coordinates = frame.height();

    let frame = replace_non_finite(frame)?;
    let all_columns: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let all_refs: Vec<&str> = all_columns.iter().map(String::as_str).collect();
    let frame = drop_missing(frame, &all_refs)?;

    debug!(
        "Cleaned {} rows: {} missing coordinates, {} incomplete or non-finite, {} kept",
        rows_in,
        rows_in - after_coordinates,
        after_coordinates - frame.height(),
        frame.height()
    );

    let (frame, temporal) = temporal_to_text(frame)?;

    Ok(CleanedDataset {
        frame,
        required: required.iter().map(|s| s.to_string()).collect(),
        temporal,
    })
}

/// Drop rows with a null in any of `columns`.
fn drop_missing(df: DataFrame, columns: &[&str]) -> Result<DataFrame> {
    if df.height() == 0 || columns.is_empty() {
        return Ok(df);
    }

    let mut keep = vec![true; df.height()];
    for name in columns {
        let valid = df.column(name)?.as_materialized_series().is_not_null();
        for (slot, is_valid) in keep.iter_mut().zip((&valid).into_iter()) {
            *slot &= is_valid.unwrap_or(false);
        }
    }

    if keep.iter().all(|k| *k) {
        return Ok(df);
    }

    let mask: BooleanChunked = keep.into_iter().map(Some).collect();
    Ok(df.filter(&mask)?)
}

/// Turn infinities and NaN into nulls in every float column.
fn replace_non_finite(mut df: DataFrame) -> Result<DataFrame> {
    let float_columns: Vec<(PlSmallStr, DataType)> = df
        .get_columns()
        .iter()
        .filter(|c| matches!(c.dtype(), DataType::Float32 | DataType::Float64))
        .map(|c| (c.name().clone(), c.dtype().clone()))
        .collect();

    for (name, dtype) in float_columns {
        let series = df.column(name.as_str())?.as_materialized_series();
        let replaced = if dtype == DataType::Float32 {
            finite_f32(series)?
        } else {
            finite_f64(series)?
        };
        df.with_column(replaced.with_name(name))?;
    }

    Ok(df)
}

fn finite_f64(series: &Series) -> Result<Series> {
    let values = series.f64()?;
    let out: Float64Chunked = values
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();
    Ok(out.into_series())
}

fn finite_f32(series: &Series) -> Result<Series> {
    let values = series.f32()?;
    let out: Float32Chunked = values
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();
    Ok(out.into_series())
}

/// Rewrite date/datetime/time columns as text, returning the rewritten column names.
fn temporal_to_text(mut df: DataFrame) -> Result<(DataFrame, Vec<String>)> {
    let temporal: Vec<(PlSmallStr, DataType)> = df
        .get_columns()
        .iter()
        .filter(|c| {
            matches!(
                c.dtype(),
                DataType::Date | DataType::Datetime(_, _) | DataType::Time
            )
        })
        .map(|c| (c.name().clone(), c.dtype().clone()))
        .collect();

    let mut names = Vec::with_capacity(temporal.len());
    for (name, dtype) in temporal {
        let series = df.column(name.as_str())?.as_materialized_series();
        let text = match dtype {
            DataType::Date => dates_to_text(series)?,
            DataType::Datetime(unit, _) => datetimes_to_text(series, unit)?,
            _ => times_to_text(series)?,
        };
        names.push(name.to_string());
        df.with_column(text.into_series().with_name(name))?;
    }

    Ok((df, names))
}

fn dates_to_text(series: &Series) -> Result<StringChunked> {
    let days = series.cast(&DataType::Int32)?;
    let text = days
        .i32()?
        .into_iter()
        .map(|d| d.and_then(format_date))
        .collect();
    Ok(text)
}

fn datetimes_to_text(series: &Series, unit: TimeUnit) -> Result<StringChunked> {
    let raw = series.cast(&DataType::Int64)?;
    let text = raw
        .i64()?
        .into_iter()
        .map(|v| v.and_then(|v| format_datetime(v, unit)))
        .collect();
    Ok(text)
}

fn times_to_text(series: &Series) -> Result<StringChunked> {
    let raw = series.cast(&DataType::Int64)?;
    let text = raw
        .i64()?
        .into_iter()
        .map(|v| v.and_then(format_time))
        .collect();
    Ok(text)
}

pub(crate) fn format_date(days: i32) -> Option<String> {
    chrono::DateTime::from_timestamp(days as i64 * 86_400, 0)
        .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
}

pub(crate) fn format_datetime(value: i64, unit: TimeUnit) -> Option<String> {
    let micros = match unit {
        TimeUnit::Nanoseconds => value / 1_000,
        TimeUnit::Microseconds => value,
        TimeUnit::Milliseconds => value.checked_mul(1_000)?,
    };
    chrono::DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn format_time(nanos: i64) -> Option<String> {
    let secs = u32::try_from(nanos / 1_000_000_000).ok()?;
    let sub = u32::try_from(nanos % 1_000_000_000).ok()?;
    chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, sub)
        .map(|t| t.format("%H:%M:%S").to_string())
}
