//! Row-oriented results to typed polars columns
//!
//! Drivers that hand back rows of loosely typed cells (the remote query
//! service, DuckDB) collect them as [`Cell`]s and build the DataFrame here, so
//! every reader produces the same column types for the same kind of data.

use polars::prelude::*;

use crate::{DataFrame, GeodashError, Result};

/// Declared type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Integer,
    Float,
    Text,
    /// Days since the Unix epoch
    Date,
    /// Microseconds since the Unix epoch, no time zone
    Timestamp,
}

/// One scalar value of a query result.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(i32),
    Timestamp(i64),
}

impl Cell {
    /// Kind a cell would produce on its own. `None` for nulls.
    pub fn kind(&self) -> Option<ColumnKind> {
        match self {
            Cell::Null => None,
            Cell::Bool(_) => Some(ColumnKind::Boolean),
            Cell::Int(_) => Some(ColumnKind::Integer),
            Cell::Float(_) => Some(ColumnKind::Float),
            Cell::Text(_) => Some(ColumnKind::Text),
            Cell::Date(_) => Some(ColumnKind::Date),
            Cell::Timestamp(_) => Some(ColumnKind::Timestamp),
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(i) | Cell::Timestamp(i) => Some(*i),
            Cell::Date(d) => Some(*d as i64),
            Cell::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(f) => Some(*f),
            Cell::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    fn as_date(&self) -> Option<i32> {
        match self {
            Cell::Date(d) => Some(*d),
            _ => None,
        }
    }

    fn to_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Bool(b) => Some(b.to_string()),
            Cell::Int(i) => Some(i.to_string()),
            Cell::Float(f) => Some(f.to_string()),
            Cell::Text(s) => Some(s.clone()),
            Cell::Date(d) => crate::clean::format_date(*d),
            Cell::Timestamp(us) => crate::clean::format_datetime(*us, TimeUnit::Microseconds),
        }
    }
}

/// Pick a column kind from its values: the first non-null cell decides, an
/// integer column that also holds floats widens to float, and any other mix
/// falls back to text.
pub fn infer_kind<'a>(cells: impl Iterator<Item = &'a Cell>) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for cell_kind in cells.filter_map(Cell::kind) {
        kind = Some(match (kind, cell_kind) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Integer), ColumnKind::Float)
            | (Some(ColumnKind::Float), ColumnKind::Integer) => ColumnKind::Float,
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Text)
}

/// Build a DataFrame from column declarations and rows of cells.
///
/// Every row must have one cell per column. A cell that does not fit its
/// column's kind becomes null, except in text columns where it is rendered
/// as text.
pub fn build_dataframe(columns: &[(String, ColumnKind)], rows: &[Vec<Cell>]) -> Result<DataFrame> {
    if let Some((index, row)) = rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != columns.len())
    {
        return Err(GeodashError::QueryError(format!(
            "Result row {} has {} values but {} columns were declared",
            index,
            row.len(),
            columns.len()
        )));
    }

    let mut series_list = Vec::with_capacity(columns.len());
    for (i, (name, kind)) in columns.iter().enumerate() {
        let cells = rows.iter().map(|row| &row[i]);
        let name = PlSmallStr::from(name.as_str());
        let series = match kind {
            ColumnKind::Boolean => {
                let values: Vec<Option<bool>> = cells.map(Cell::as_bool).collect();
                Series::new(name, values)
            }
            ColumnKind::Integer => {
                let values: Vec<Option<i64>> = cells.map(Cell::as_i64).collect();
                Series::new(name, values)
            }
            ColumnKind::Float => {
                let values: Vec<Option<f64>> = cells.map(Cell::as_f64).collect();
                Series::new(name, values)
            }
            ColumnKind::Text => {
                let values: Vec<Option<String>> = cells.map(Cell::to_text).collect();
                Series::new(name, values)
            }
            ColumnKind::Date => {
                let values: Vec<Option<i32>> = cells.map(Cell::as_date).collect();
                Series::new(name, values).cast(&DataType::Date)?
            }
            ColumnKind::Timestamp => {
                let values: Vec<Option<i64>> = cells
                    .map(|c| match c {
                        Cell::Timestamp(us) => Some(*us),
                        _ => None,
                    })
                    .collect();
                Series::new(name, values)
                    .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?
            }
        };
        series_list.push(series.into_column());
    }

    Ok(DataFrame::new(series_list)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_typed_columns() {
        let columns = vec![
            ("hub_id".to_string(), ColumnKind::Text),
            ("gmv".to_string(), ColumnKind::Float),
            ("orders".to_string(), ColumnKind::Integer),
            ("active".to_string(), ColumnKind::Boolean),
            ("dt".to_string(), ColumnKind::Date),
            ("ts".to_string(), ColumnKind::Timestamp),
        ];
        let rows = vec![
            vec![
                Cell::Text("h1".into()),
                Cell::Float(10.5),
                Cell::Int(3),
                Cell::Bool(true),
                Cell::Date(19723),
                Cell::Timestamp(1_704_067_200_000_000),
            ],
            vec![
                Cell::Text("h2".into()),
                Cell::Null,
                Cell::Int(4),
                Cell::Null,
                Cell::Null,
                Cell::Null,
            ],
        ];

        let df = build_dataframe(&columns, &rows).unwrap();
        assert_eq!(df.shape(), (2, 6));
        assert_eq!(df.column("hub_id").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("gmv").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("orders").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("active").unwrap().dtype(), &DataType::Boolean);
        assert_eq!(df.column("dt").unwrap().dtype(), &DataType::Date);
        assert_eq!(
            df.column("ts").unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Microseconds, None)
        );
        assert_eq!(df.column("gmv").unwrap().null_count(), 1);
    }

    #[test]
    fn test_integers_widen_into_float_columns() {
        let columns = vec![("v".to_string(), ColumnKind::Float)];
        let rows = vec![vec![Cell::Int(2)], vec![Cell::Float(f64::INFINITY)]];
        let df = build_dataframe(&columns, &rows).unwrap();
        let values: Vec<Option<f64>> = df
            .column("v")
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(values, vec![Some(2.0), Some(f64::INFINITY)]);
    }

    #[test]
    fn test_empty_result_keeps_columns() {
        let columns = vec![
            ("lat".to_string(), ColumnKind::Float),
            ("lng".to_string(), ColumnKind::Float),
        ];
        let df = build_dataframe(&columns, &[]).unwrap();
        assert_eq!(df.shape(), (0, 2));
    }

    #[test]
    fn test_ragged_row_is_rejected() {
        let columns = vec![("a".to_string(), ColumnKind::Integer)];
        let rows = vec![vec![Cell::Int(1), Cell::Int(2)]];
        let err = build_dataframe(&columns, &rows).unwrap_err();
        assert!(matches!(err, GeodashError::QueryError(_)));
    }

    #[test]
    fn test_infer_kind() {
        let cells = [Cell::Null, Cell::Int(1), Cell::Float(2.0)];
        assert_eq!(infer_kind(cells.iter()), ColumnKind::Float);

        let cells = [Cell::Int(1), Cell::Text("x".into())];
        assert_eq!(infer_kind(cells.iter()), ColumnKind::Text);

        let cells = [Cell::Null, Cell::Null];
        assert_eq!(infer_kind(cells.iter()), ColumnKind::Text);

        let cells = [Cell::Date(1), Cell::Null, Cell::Date(2)];
        assert_eq!(infer_kind(cells.iter()), ColumnKind::Date);
    }
}
