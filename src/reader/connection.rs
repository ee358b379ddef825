//! Connection string parsing
//!
//! Supported forms:
//! - `athena://` with optional `?endpoint=..&workgroup=..&poll_ms=..&timeout_s=..`
//! - `duckdb://memory` and `duckdb://<path>`
//! - `polars://memory` (or `polars://`)

use std::time::Duration;

use crate::{GeodashError, Result};

/// Default interval between execution status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default limit on how long a remote query may run.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Options of the remote query service reader.
#[derive(Debug, Clone, PartialEq)]
pub struct AthenaOptions {
    /// Overrides `https://athena.{region}.amazonaws.com/`
    pub endpoint: Option<String>,
    /// Overrides the workgroup from the credentials
    pub workgroup: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for AthenaOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            workgroup: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Parsed connection target.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionInfo {
    Athena(AthenaOptions),
    DuckDBMemory,
    DuckDBFile(String),
    PolarsMemory,
}

/// Parse a connection string into a [`ConnectionInfo`].
pub fn parse_connection_string(uri: &str) -> Result<ConnectionInfo> {
    if let Some(rest) = uri.strip_prefix("athena://") {
        return parse_athena_options(rest).map(ConnectionInfo::Athena);
    }

    if let Some(path) = uri.strip_prefix("duckdb://") {
        return match path {
            "memory" | "" => Ok(ConnectionInfo::DuckDBMemory),
            path => Ok(ConnectionInfo::DuckDBFile(path.to_string())),
        };
    }

    if let Some(rest) = uri.strip_prefix("polars://") {
        return match rest {
            "memory" | "" => Ok(ConnectionInfo::PolarsMemory),
            other => Err(GeodashError::ConfigError(format!(
                "Unsupported polars connection '{}', only polars://memory is available",
                other
            ))),
        };
    }

    Err(GeodashError::ConfigError(format!(
        "Unsupported connection string '{}'. Expected athena://, duckdb://memory, duckdb://<path> or polars://memory",
        uri
    )))
}

fn parse_athena_options(rest: &str) -> Result<AthenaOptions> {
    let query = match rest.strip_prefix('?') {
        Some(query) => query,
        None if rest.is_empty() => "",
        None => {
            return Err(GeodashError::ConfigError(format!(
                "Unexpected text '{}' in athena connection string; options go after '?'",
                rest
            )))
        }
    };

    let mut options = AthenaOptions::default();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            GeodashError::ConfigError(format!("Malformed athena option '{}', expected key=value", pair))
        })?;
        match key {
            "endpoint" => options.endpoint = Some(value.to_string()),
            "workgroup" => options.workgroup = Some(value.to_string()),
            "poll_ms" => options.poll_interval = Duration::from_millis(parse_number(key, value)?),
            "timeout_s" => options.timeout = Duration::from_secs(parse_number(key, value)?),
            other => {
                return Err(GeodashError::ConfigError(format!(
                    "Unknown athena option '{}' (expected endpoint, workgroup, poll_ms or timeout_s)",
                    other
                )))
            }
        }
    }
    Ok(options)
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| {
        GeodashError::ConfigError(format!(
            "Athena option '{}' must be a non-negative integer, got '{}'",
            key, value
        ))
    })
}
