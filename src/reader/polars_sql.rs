//! Polars SQL context data source implementation
//!
//! Provides a reader that uses Polars' built-in SQL context for querying
//! registered DataFrames, such as replayed extracts of the remote service.

use crate::reader::{ensure_read_only, Reader};
use crate::{DataFrame, GeodashError, Result};
use polars::prelude::*;
use polars::sql::SQLContext;
use std::cell::RefCell;
use std::collections::HashSet;
use tracing::debug;

/// Polars SQL context reader
///
/// Executes SQL queries against registered Polars DataFrames. This is a pure
/// in-memory reader with no external connection, so it never produces a
/// `ConnectionError`.
///
/// # Examples
///
/// ```rust,ignore
/// use geodash::reader::{Reader, PolarsReader};
/// use polars::prelude::*;
///
/// let reader = PolarsReader::new();
/// let df = df! {
///     "hub_latitude" => [-23.55, -22.90],
///     "hub_longitude" => [-46.63, -43.17],
/// }?;
/// reader.register("hubs", df, false)?;
///
/// let result = reader.execute_sql("SELECT * FROM hubs WHERE hub_latitude < -23")?;
/// ```
pub struct PolarsReader {
    ctx: RefCell<SQLContext>,
    registered_tables: RefCell<HashSet<String>>,
}

impl PolarsReader {
    pub fn new() -> Self {
        Self {
            ctx: RefCell::new(SQLContext::new()),
            registered_tables: RefCell::new(HashSet::new()),
        }
    }

    fn table_exists(&self, name: &str) -> bool {
        self.registered_tables.borrow().contains(name)
    }

    /// Registered table names, sorted
    pub fn list_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.registered_tables.borrow().iter().cloned().collect();
        tables.sort();
        tables
    }
}

impl Default for PolarsReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a table name
fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GeodashError::ConfigError("Table name cannot be empty".into()));
    }

    let forbidden = ['"', '\0', '\n', '\r'];
    for ch in forbidden {
        if name.contains(ch) {
            return Err(GeodashError::ConfigError(format!(
                "Table name '{}' contains invalid character '{}'",
                name,
                ch.escape_default()
            )));
        }
    }

    Ok(())
}

impl Reader for PolarsReader {
    fn execute_sql(&self, sql: &str) -> Result<DataFrame> {
        // Tables come from register(), never from DDL
        ensure_read_only(sql)?;

        debug!("Executing {} byte query against polars SQL context", sql.len());

        let lazy_frame = self.ctx.borrow_mut().execute(sql).map_err(|e| {
            GeodashError::QueryError(format!("Failed to execute SQL `{}`: {}", sql, e))
        })?;

        let df = lazy_frame.collect().map_err(|e| {
            GeodashError::QueryError(format!("Failed to collect query result: {}", e))
        })?;

        Ok(df)
    }

    fn register(&self, name: &str, df: DataFrame, replace: bool) -> Result<()> {
        validate_table_name(name)?;

        if self.table_exists(name) {
            if replace {
                self.ctx.borrow_mut().unregister(name);
                self.registered_tables.borrow_mut().remove(name);
            } else {
                return Err(GeodashError::ConfigError(format!(
                    "Table '{}' already exists",
                    name
                )));
            }
        }

        self.ctx.borrow_mut().register(name, df.lazy());
        self.registered_tables.borrow_mut().insert(name.to_string());

        Ok(())
    }

    fn supports_register(&self) -> bool {
        true
    }
}
