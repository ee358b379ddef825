//! DuckDB data source implementation
//!
//! Local development engine: point dataset queries at CSV or Parquet extracts
//! with `read_csv_auto(..)` / `read_parquet(..)` instead of the remote service.

use duckdb::types::{TimeUnit as DuckTimeUnit, ValueRef};
use duckdb::Connection;
use tracing::debug;

use super::connection::{parse_connection_string, ConnectionInfo};
use super::frame::{build_dataframe, infer_kind, Cell};
use super::{ensure_read_only, Reader};
use crate::{DataFrame, GeodashError, Result};

/// DuckDB reader over an in-memory or file-backed database.
pub struct DuckDBReader {
    conn: Connection,
}

impl DuckDBReader {
    /// Open `duckdb://memory` or `duckdb://<path>`.
    pub fn from_connection_string(uri: &str) -> Result<Self> {
        let conn = match parse_connection_string(uri)? {
            ConnectionInfo::DuckDBMemory => Connection::open_in_memory(),
            ConnectionInfo::DuckDBFile(path) => Connection::open(&path),
            _ => {
                return Err(GeodashError::ConfigError(format!(
                    "Connection string '{}' is not supported by DuckDBReader",
                    uri
                )))
            }
        }
        .map_err(|e| GeodashError::ConnectionError(format!("Failed to open DuckDB '{}': {}", uri, e)))?;

        Ok(Self { conn })
    }

    /// Access the underlying connection, e.g. to load fixtures.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Reader for DuckDBReader {
    fn execute_sql(&self, sql: &str) -> Result<DataFrame> {
        ensure_read_only(sql)?;
        debug!("Executing {} byte query against DuckDB", sql.len());

        let query_error = |e: duckdb::Error| GeodashError::QueryError(format!("DuckDB query failed: {}", e));

        let mut stmt = self.conn.prepare(sql).map_err(query_error)?;
        let mut rows = stmt.query([]).map_err(query_error)?;

        let names: Vec<String> = match rows.as_ref() {
            Some(stmt) => stmt.column_names(),
            None => Vec::new(),
        };

        let mut data: Vec<Vec<Cell>> = Vec::new();
        while let Some(row) = rows.next().map_err(query_error)? {
            let mut cells = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i).map_err(query_error)?;
                cells.push(value_to_cell(value, name)?);
            }
            data.push(cells);
        }

        let columns: Vec<_> = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let kind = infer_kind(data.iter().map(|row| &row[i]));
                (name, kind)
            })
            .collect();

        build_dataframe(&columns, &data)
    }
}

fn value_to_cell(value: ValueRef<'_>, column: &str) -> Result<Cell> {
    Ok(match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Boolean(b) => Cell::Bool(b),
        ValueRef::TinyInt(i) => Cell::Int(i as i64),
        ValueRef::SmallInt(i) => Cell::Int(i as i64),
        ValueRef::Int(i) => Cell::Int(i as i64),
        ValueRef::BigInt(i) => Cell::Int(i),
        ValueRef::UTinyInt(i) => Cell::Int(i as i64),
        ValueRef::USmallInt(i) => Cell::Int(i as i64),
        ValueRef::UInt(i) => Cell::Int(i as i64),
        ValueRef::UBigInt(i) => i64::try_from(i).map(Cell::Int).unwrap_or(Cell::Float(i as f64)),
        ValueRef::HugeInt(i) => i64::try_from(i).map(Cell::Int).unwrap_or(Cell::Float(i as f64)),
        ValueRef::Float(f) => Cell::Float(f as f64),
        ValueRef::Double(f) => Cell::Float(f),
        ValueRef::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Cell::Float)
            .unwrap_or(Cell::Null),
        ValueRef::Text(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Date32(days) => Cell::Date(days),
        ValueRef::Timestamp(unit, v) => Cell::Timestamp(to_micros(unit, v)),
        ValueRef::Time64(unit, v) => {
            let micros = to_micros(unit, v);
            match chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                (micros / 1_000_000) as u32,
                ((micros % 1_000_000) * 1_000) as u32,
            ) {
                Some(t) => Cell::Text(t.format("%H:%M:%S").to_string()),
                None => Cell::Null,
            }
        }
        other => {
            return Err(GeodashError::QueryError(format!(
                "Column '{}' has unsupported DuckDB type {:?}",
                column,
                other.data_type()
            )))
        }
    })
}

fn to_micros(unit: DuckTimeUnit, value: i64) -> i64 {
    match unit {
        DuckTimeUnit::Second => value * 1_000_000,
        DuckTimeUnit::Millisecond => value * 1_000,
        DuckTimeUnit::Microsecond => value,
        DuckTimeUnit::Nanosecond => value / 1_000,
    }
}
