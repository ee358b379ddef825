//! Remote query service reader (Amazon Athena)
//!
//! A query runs in three phases, each a signed JSON 1.1 POST:
//!
//! 1. `StartQueryExecution` submits the SQL with the staging location as the
//!    result output location and returns an execution id
//! 2. `GetQueryExecution` is polled at a fixed interval until the execution
//!    reaches `SUCCEEDED`, `FAILED` or `CANCELLED`, or the timeout elapses
//! 3. `GetQueryResults` pages through the result set following `NextToken`
//!
//! Nothing is retried. Polling only waits for the one submitted execution.

mod sigv4;
mod transport;

pub use transport::{HttpResponse, Transport, UreqTransport};

use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::connection::AthenaOptions;
use super::frame::{build_dataframe, Cell, ColumnKind};
use super::{ensure_read_only, Reader};
use crate::config::Credentials;
use crate::{DataFrame, GeodashError, Result};

const SERVICE: &str = "athena";
const TARGET_PREFIX: &str = "AmazonAthena";
const PAGE_SIZE: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Faults meaning the caller could not be authenticated.
const AUTH_FAULTS: &[&str] = &[
    "UnrecognizedClientException",
    "InvalidSignatureException",
    "SignatureDoesNotMatch",
    "IncompleteSignature",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "MissingAuthenticationToken",
    "AccessDeniedException",
];

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartQueryExecutionOutput {
    query_execution_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecutionStatus {
    state: QueryState,
    #[serde(default)]
    state_change_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecution {
    status: QueryExecutionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryExecutionOutput {
    query_execution: QueryExecution,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ColumnInfo {
    name: String,
    #[serde(rename = "Type")]
    type_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultSetMetadata {
    #[serde(default)]
    column_info: Vec<ColumnInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Datum {
    #[serde(default)]
    var_char_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultRow {
    #[serde(default)]
    data: Vec<Datum>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultSet {
    #[serde(default)]
    rows: Vec<ResultRow>,
    #[serde(default)]
    result_set_metadata: ResultSetMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryResultsOutput {
    result_set: ResultSet,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceFault {
    #[serde(rename = "__type", default)]
    fault_type: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

// ============================================================================
// Reader
// ============================================================================

/// Reader for the remote query service.
///
/// Generic over its [`Transport`] so the protocol can run against a scripted
/// transport in tests.
pub struct AthenaReader<T: Transport = UreqTransport> {
    credentials: Credentials,
    options: AthenaOptions,
    url: String,
    host: String,
    transport: T,
}

impl AthenaReader<UreqTransport> {
    pub fn new(credentials: Credentials, options: AthenaOptions) -> Result<Self> {
        Self::with_transport(credentials, options, UreqTransport::new(REQUEST_TIMEOUT))
    }
}

impl<T: Transport> AthenaReader<T> {
    pub fn with_transport(credentials: Credentials, options: AthenaOptions, transport: T) -> Result<Self> {
        let url = match &options.endpoint {
            Some(endpoint) if endpoint.ends_with('/') => endpoint.clone(),
            Some(endpoint) => format!("{}/", endpoint),
            None => format!("https://athena.{}.amazonaws.com/", credentials.region),
        };
        let host = endpoint_host(&url)?;

        Ok(Self {
            credentials,
            options,
            url,
            host,
            transport,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn workgroup(&self) -> Option<&str> {
        self.options
            .workgroup
            .as_deref()
            .or(self.credentials.workgroup.as_deref())
    }

    /// One signed call of a service action.
    fn call<R: DeserializeOwned>(&self, action: &str, payload: &Value) -> Result<R> {
        let body = payload.to_string();
        let target = format!("{}.{}", TARGET_PREFIX, action);
        let headers = sigv4::signed_headers(
            &self.credentials,
            SERVICE,
            &self.host,
            &target,
            &body,
            Utc::now(),
        )?;
        // The transport derives Host from the URL
        let headers: Vec<(String, String)> = headers.into_iter().filter(|(name, _)| name != "host").collect();

        let response = self.transport.post(&self.url, &headers, &body)?;
        if !response.is_success() {
            return Err(classify_fault(action, &response));
        }

        serde_json::from_str(&response.body).map_err(|e| {
            GeodashError::QueryError(format!("Unexpected {} response: {}", action, e))
        })
    }

    fn start(&self, sql: &str) -> Result<String> {
        let mut payload = json!({
            "QueryString": sql,
            "ResultConfiguration": { "OutputLocation": self.credentials.staging_dir },
        });
        if let Some(workgroup) = self.workgroup() {
            payload["WorkGroup"] = json!(workgroup);
        }

        let output: StartQueryExecutionOutput = self.call("StartQueryExecution", &payload)?;
        info!(
            "Submitted query {} ({} bytes) to {}",
            output.query_execution_id,
            sql.len(),
            self.host
        );
        Ok(output.query_execution_id)
    }

    fn wait(&self, execution_id: &str) -> Result<()> {
        let started = Instant::now();
        let payload = json!({ "QueryExecutionId": execution_id });
        let mut last_state = None;

        loop {
            let output: GetQueryExecutionOutput = self.call("GetQueryExecution", &payload)?;
            let status = output.query_execution.status;
            if last_state != Some(status.state) {
                debug!("Query {} is {:?}", execution_id, status.state);
                last_state = Some(status.state);
            }

            match status.state {
                QueryState::Succeeded => return Ok(()),
                QueryState::Failed => {
                    return Err(GeodashError::QueryError(format!(
                        "Query {} failed: {}",
                        execution_id,
                        status.state_change_reason.as_deref().unwrap_or("no reason given")
                    )))
                }
                QueryState::Cancelled => {
                    return Err(GeodashError::QueryError(format!(
                        "Query {} was cancelled{}",
                        execution_id,
                        status
                            .state_change_reason
                            .map(|r| format!(": {}", r))
                            .unwrap_or_default()
                    )))
                }
                QueryState::Queued | QueryState::Running => {}
            }

            if started.elapsed() >= self.options.timeout {
                self.stop(execution_id);
                return Err(GeodashError::QueryError(format!(
                    "Query {} timed out after {}s",
                    execution_id,
                    self.options.timeout.as_secs()
                )));
            }
            std::thread::sleep(self.options.poll_interval);
        }
    }

    /// Ask the service to stop an execution we gave up on.
    fn stop(&self, execution_id: &str) {
        let payload = json!({ "QueryExecutionId": execution_id });
        if let Err(e) = self.call::<Value>("StopQueryExecution", &payload) {
            warn!("Failed to stop query {}: {}", execution_id, e);
        }
    }

    fn fetch(&self, execution_id: &str) -> Result<DataFrame> {
        let mut columns: Vec<(String, ColumnKind)> = Vec::new();
        let mut rows: Vec<Vec<Cell>> = Vec::new();
        let mut next_token: Option<String> = None;
        let mut first_page = true;

        loop {
            let mut payload = json!({
                "QueryExecutionId": execution_id,
                "MaxResults": PAGE_SIZE,
            });
            if let Some(token) = &next_token {
                payload["NextToken"] = json!(token);
            }

            let page: GetQueryResultsOutput = self.call("GetQueryResults", &payload)?;

            let mut page_rows = page.result_set.rows.into_iter();
            if first_page {
                columns = page
                    .result_set
                    .result_set_metadata
                    .column_info
                    .iter()
                    .map(|c| (c.name.clone(), column_kind(&c.type_name)))
                    .collect();
                // Header row
                page_rows.next();
                first_page = false;
            }

            for row in page_rows {
                rows.push(convert_row(row, &columns)?);
            }

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        info!(
            "Fetched {} rows x {} columns for query {}",
            rows.len(),
            columns.len(),
            execution_id
        );
        build_dataframe(&columns, &rows)
    }
}

impl<T: Transport> Reader for AthenaReader<T> {
    fn execute_sql(&self, sql: &str) -> Result<DataFrame> {
        ensure_read_only(sql)?;
        let execution_id = self.start(sql)?;
        self.wait(&execution_id)?;
        self.fetch(&execution_id)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn endpoint_host(url: &str) -> Result<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            GeodashError::ConfigError(format!("Endpoint '{}' must start with http:// or https://", url))
        })?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(GeodashError::ConfigError(format!("Endpoint '{}' has no host", url)));
    }
    if rest.trim_end_matches('/') != host {
        return Err(GeodashError::ConfigError(format!(
            "Endpoint '{}' must not have a path",
            url
        )));
    }
    Ok(host.to_string())
}

fn classify_fault(action: &str, response: &HttpResponse) -> GeodashError {
    let fault: Option<ServiceFault> = serde_json::from_str(&response.body).ok();
    let (fault_type, message) = match fault {
        Some(f) => (
            f.fault_type
                .map(|t| t.rsplit('#').next().unwrap_or_default().to_string())
                .unwrap_or_else(|| "UnknownFault".to_string()),
            f.message.unwrap_or_default(),
        ),
        None => ("UnknownFault".to_string(), response.body.clone()),
    };

    let text = format!(
        "{} returned HTTP {} ({}): {}",
        action, response.status, fault_type, message
    );
    if AUTH_FAULTS.contains(&fault_type.as_str()) || response.status == 401 {
        GeodashError::ConnectionError(text)
    } else {
        GeodashError::QueryError(text)
    }
}

/// Map a declared result column type to a column kind.
fn column_kind(type_name: &str) -> ColumnKind {
    let base = type_name
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "boolean" => ColumnKind::Boolean,
        "tinyint" | "smallint" | "integer" | "int" | "bigint" => ColumnKind::Integer,
        "float" | "real" | "double" | "decimal" => ColumnKind::Float,
        "date" => ColumnKind::Date,
        "timestamp" | "timestamp with time zone" => ColumnKind::Timestamp,
        _ => ColumnKind::Text,
    }
}

fn convert_row(row: ResultRow, columns: &[(String, ColumnKind)]) -> Result<Vec<Cell>> {
    let mut data = row.data.into_iter();
    columns
        .iter()
        .map(|(name, kind)| {
            let value = data.next().and_then(|d| d.var_char_value);
            parse_cell(value, *kind, name)
        })
        .collect()
}

fn parse_cell(value: Option<String>, kind: ColumnKind, column: &str) -> Result<Cell> {
    let Some(value) = value else {
        return Ok(Cell::Null);
    };
    if kind != ColumnKind::Text && value.is_empty() {
        return Ok(Cell::Null);
    }

    let invalid = |what: &str| {
        GeodashError::QueryError(format!(
            "Cannot read '{}' in column '{}' as {}",
            value, column, what
        ))
    };

    let cell = match kind {
        ColumnKind::Text => Cell::Text(value.clone()),
        ColumnKind::Boolean => match value.as_str() {
            "true" => Cell::Bool(true),
            "false" => Cell::Bool(false),
            _ => return Err(invalid("boolean")),
        },
        ColumnKind::Integer => Cell::Int(value.parse().map_err(|_| invalid("integer"))?),
        ColumnKind::Float => Cell::Float(match value.as_str() {
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            "NaN" => f64::NAN,
            other => other.parse().map_err(|_| invalid("number"))?,
        }),
        ColumnKind::Date => {
            let date = NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| invalid("date"))?;
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
            Cell::Date((date - epoch).num_days() as i32)
        }
        ColumnKind::Timestamp => {
            let parsed = NaiveDateTime::parse_from_str(&value, "%Y-%m-%d %H:%M:%S%.f").or_else(|_| {
                // Zoned timestamps carry a trailing zone name
                let local: Vec<&str> = value.split_whitespace().take(2).collect();
                NaiveDateTime::parse_from_str(&local.join(" "), "%Y-%m-%d %H:%M:%S%.f")
            });
            Cell::Timestamp(parsed.map_err(|_| invalid("timestamp"))?.and_utc().timestamp_micros())
        }
    };
    Ok(cell)
}
