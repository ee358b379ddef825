//! HTTP transport for the query service

use std::time::Duration;

use crate::{GeodashError, Result};

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking POST of a signed request.
///
/// Implementations return `Err` only when no response was received; HTTP
/// error statuses come back as an `Ok` response for the caller to classify.
pub trait Transport: Send {
    fn post(&self, url: &str, headers: &[(String, String)], body: &str) -> Result<HttpResponse>;
}

/// [`Transport`] over a `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// `timeout` bounds each individual request, not the whole query.
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn post(&self, url: &str, headers: &[(String, String)], body: &str) -> Result<HttpResponse> {
        let mut request = self.agent.post(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let mut response = request
            .send(body)
            .map_err(|e| GeodashError::ConnectionError(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response.body_mut().read_to_string().map_err(|e| {
            GeodashError::ConnectionError(format!("Failed to read response from {}: {}", url, e))
        })?;

        Ok(HttpResponse { status, body })
    }
}
