//! Connector: data source abstraction layer
//!
//! The reader module provides a pluggable interface for executing SQL queries
//! against query services and returning Polars DataFrames for the Cleaner.
//!
//! # Architecture
//!
//! All readers implement the `Reader` trait, which provides:
//! - SQL query execution → DataFrame conversion
//! - Optional DataFrame registration for queryable tables
//! - Connection and query error classification
//!
//! Readers never retry. A failed connection or query aborts the render pass
//! with [`GeodashError::ConnectionError`] or [`GeodashError::QueryError`].
//!
//! # Example
//!
//! ```rust,ignore
//! use geodash::reader::{connect, Reader};
//!
//! let reader = connect("athena://?workgroup=analytics")?;
//! let df = reader.execute_sql("SELECT hub_id, hub_latitude, hub_longitude FROM gold.hubs")?;
//! ```

use crate::{DataFrame, GeodashError, Result};

#[cfg(feature = "athena")]
pub mod athena;
#[cfg(feature = "duckdb")]
pub mod duckdb;

pub mod connection;
pub mod frame;
mod polars_sql;

#[cfg(feature = "athena")]
pub use athena::AthenaReader;
#[cfg(feature = "duckdb")]
pub use duckdb::DuckDBReader;
pub use polars_sql::PolarsReader;

use connection::ConnectionInfo;

/// Trait for data source readers
///
/// Readers execute SQL queries and return Polars DataFrames.
/// They provide a uniform interface for different query backends.
///
/// # DataFrame Registration
///
/// Local readers support registering DataFrames as queryable tables using
/// the [`register`](Reader::register) method, which is how saved extracts are
/// replayed without the remote service.
pub trait Reader {
    /// Execute a SQL query and return the result as a DataFrame
    ///
    /// # Errors
    ///
    /// Returns `GeodashError::ConnectionError` if the service cannot be reached
    /// or rejects the credentials, and `GeodashError::QueryError` if the SQL is
    /// invalid, the query fails or times out, or a table doesn't exist.
    fn execute_sql(&self, sql: &str) -> Result<DataFrame>;

    /// Register a DataFrame as a queryable table
    ///
    /// Returns an error by default. Override for readers that support registration.
    fn register(&self, name: &str, _df: DataFrame, _replace: bool) -> Result<()> {
        Err(GeodashError::ConfigError(format!(
            "This reader does not support DataFrame registration for table '{}'",
            name
        )))
    }

    /// Check if this reader supports DataFrame registration
    fn supports_register(&self) -> bool {
        false
    }
}

/// Statement keywords a dashboard query may start with.
const READ_ONLY_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES", "SHOW", "DESCRIBE", "("];

/// Reject anything but a single read-only statement.
///
/// Runs before a query leaves the process. The first keyword after leading
/// comments must be one of [`READ_ONLY_KEYWORDS`], and no second statement may
/// follow a `;` outside of quotes and comments.
pub(crate) fn ensure_read_only(sql: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(GeodashError::QueryError(format!(
            "Only single read-only queries are supported ({}): {}",
            reason, sql
        )))
    };

    let body = skip_comments(sql);
    let upper = body.to_uppercase();
    let allowed = READ_ONLY_KEYWORDS.iter().any(|kw| {
        upper.starts_with(kw)
            && (*kw == "("
                || !upper[kw.len()..]
                    .starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_'))
    });
    if !allowed {
        return reject("not a SELECT statement");
    }

    if let Some(end) = statement_end(body) {
        if !skip_comments(&body[end + 1..]).trim_start_matches(';').trim().is_empty() {
            return reject("multiple statements");
        }
    }

    Ok(())
}

/// `sql` without leading whitespace and comments.
fn skip_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map(|(_, r)| r).unwrap_or("");
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map(|(_, r)| r).unwrap_or("");
        } else {
            return sql;
        }
    }
}

/// Byte offset of the first `;` outside quotes and comments.
fn statement_end(sql: &str) -> Option<usize> {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b';' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Open a reader for a connection string.
///
/// `athena://` readers take their credentials from the process environment
/// (see [`crate::config::Credentials::from_env`]).
pub fn connect(uri: &str) -> Result<Box<dyn Reader + Send>> {
    match connection::parse_connection_string(uri)? {
        ConnectionInfo::PolarsMemory => Ok(Box::new(PolarsReader::new())),
        #[cfg(feature = "duckdb")]
        ConnectionInfo::DuckDBMemory | ConnectionInfo::DuckDBFile(_) => {
            Ok(Box::new(DuckDBReader::from_connection_string(uri)?))
        }
        #[cfg(not(feature = "duckdb"))]
        ConnectionInfo::DuckDBMemory | ConnectionInfo::DuckDBFile(_) => {
            Err(GeodashError::ConfigError(format!(
                "Connection '{}' requires the 'duckdb' feature",
                uri
            )))
        }
        #[cfg(feature = "athena")]
        ConnectionInfo::Athena(options) => {
            let credentials = crate::config::Credentials::from_env()?;
            Ok(Box::new(AthenaReader::new(credentials, options)?))
        }
        #[cfg(not(feature = "athena"))]
        ConnectionInfo::Athena(_) => Err(GeodashError::ConfigError(format!(
            "Connection '{}' requires the 'athena' feature",
            uri
        ))),
    }
}
