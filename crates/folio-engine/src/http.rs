use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::error::{truncate_text, ServiceError};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_MAX_CHARS: usize = 512;

/// Every remote call in a run goes through a client built here, so none of
/// them can hang past `timeout`.
pub fn build_http_client(timeout: Duration) -> anyhow::Result<HttpClient> {
    HttpClient::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .build()
        .context("failed building HTTP client")
}

pub(crate) fn response_json(
    service: &'static str,
    endpoint: &str,
    response: HttpResponse,
) -> Result<Value, ServiceError> {
    let status = response.status();
    let body = response.text().map_err(|source| ServiceError::Transport {
        service,
        endpoint: endpoint.to_string(),
        source,
    })?;
    if !status.is_success() {
        return Err(ServiceError::Status {
            service,
            status: status.as_u16(),
            body: error_body(&body),
        });
    }
    serde_json::from_str(&body).map_err(|err| ServiceError::Payload {
        service,
        detail: format!("invalid JSON ({err})"),
    })
}

pub(crate) fn error_body(body: &str) -> String {
    truncate_text(body.trim(), ERROR_BODY_MAX_CHARS)
}
