use std::fmt;

use folio_contracts::AspectRatio;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ServiceError, REDACTED};
use crate::http::{error_body, response_json};

pub const DEFAULT_REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_REPLICATE_MODEL: &str = "ideogram-ai/ideogram-v2-turbo";
pub const NEGATIVE_PROMPT: &str = "ugly, disfigured, low quality, blurry, nsfw";
/// Remote id recorded when a synchronous response carries no prediction id.
pub const DIRECT_COMPLETION_ID: &str = "direct_completion";

const SERVICE_NAME: &str = "Replicate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The service finished within the request and returned the image location.
    Immediate {
        remote_id: String,
        output_url: String,
    },
    /// The service accepted the request; poll `remote_id` for the result.
    Queued { remote_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state: RemoteState,
    pub output_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub trait RemoteImageService: Send + Sync {
    fn name(&self) -> &str;
    fn submit(&self, prompt: &str, aspect: AspectRatio) -> Result<SubmitOutcome, ServiceError>;
    fn status(&self, remote_id: &str) -> Result<StatusReport, ServiceError>;
    /// Fetches a finished image from the location reported by `submit`/`status`.
    fn download(&self, url: &str) -> Result<DownloadedImage, ServiceError>;
}

#[derive(Clone)]
pub struct ReplicateConfig {
    pub api_base: String,
    pub api_token: String,
    pub model: String,
}

impl fmt::Debug for ReplicateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicateConfig")
            .field("api_base", &self.api_base)
            .field("api_token", &REDACTED)
            .field("model", &self.model)
            .finish()
    }
}

impl ReplicateConfig {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_REPLICATE_API_BASE.to_string(),
            api_token: api_token.into(),
            model: DEFAULT_REPLICATE_MODEL.to_string(),
        }
    }
}

pub struct ReplicateService {
    api_base: String,
    api_token: String,
    model: String,
    http: HttpClient,
}

impl ReplicateService {
    pub fn new(config: ReplicateConfig, http: HttpClient) -> Self {
        Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            api_token: config.api_token,
            model: config.model.trim().to_string(),
            http,
        }
    }

    fn predictions_endpoint(&self) -> String {
        format!("{}/models/{}/predictions", self.api_base, self.model)
    }

    fn prediction_endpoint(&self, remote_id: &str) -> String {
        format!("{}/predictions/{}", self.api_base, remote_id)
    }
}

impl RemoteImageService for ReplicateService {
    fn name(&self) -> &str {
        "replicate"
    }

    fn submit(&self, prompt: &str, aspect: AspectRatio) -> Result<SubmitOutcome, ServiceError> {
        let endpoint = self.predictions_endpoint();
        let payload = json!({
            "input": {
                "prompt": prompt,
                "aspect_ratio": aspect.as_ratio(),
                "negative_prompt": NEGATIVE_PROMPT,
            }
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&payload)
            .send()
            .map_err(|source| ServiceError::Transport {
                service: SERVICE_NAME,
                endpoint: endpoint.clone(),
                source,
            })?;
        let prediction = response_json(SERVICE_NAME, &endpoint, response)?;
        let status = prediction
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("");
        debug!(status, aspect = aspect.as_ratio(), "prediction submitted");
        parse_submit_response(&prediction)
    }

    fn status(&self, remote_id: &str) -> Result<StatusReport, ServiceError> {
        let endpoint = self.prediction_endpoint(remote_id);
        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(&self.api_token)
            .send()
            .map_err(|source| ServiceError::Transport {
                service: SERVICE_NAME,
                endpoint: endpoint.clone(),
                source,
            })?;
        let prediction = response_json(SERVICE_NAME, &endpoint, response)?;
        Ok(parse_status_response(&prediction))
    }

    fn download(&self, url: &str) -> Result<DownloadedImage, ServiceError> {
        let transport = |source| ServiceError::Transport {
            service: "image download",
            endpoint: url.to_string(),
            source,
        };
        let response = self.http.get(url).send().map_err(transport)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(ServiceError::Status {
                service: "image download",
                status,
                body: error_body(&body),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().map_err(transport)?.to_vec();
        Ok(DownloadedImage {
            bytes,
            content_type,
        })
    }
}

pub(crate) fn parse_submit_response(prediction: &Value) -> Result<SubmitOutcome, ServiceError> {
    let remote_id = prediction
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    if let Some(output_url) = first_output_url(prediction.get("output")) {
        return Ok(SubmitOutcome::Immediate {
            remote_id: remote_id.unwrap_or_else(|| DIRECT_COMPLETION_ID.to_string()),
            output_url,
        });
    }
    match remote_id {
        Some(remote_id) => Ok(SubmitOutcome::Queued { remote_id }),
        None => Err(ServiceError::Payload {
            service: SERVICE_NAME,
            detail: "prediction has neither output nor id".to_string(),
        }),
    }
}

pub(crate) fn parse_status_response(prediction: &Value) -> StatusReport {
    let status = prediction
        .get("status")
        .and_then(Value::as_str)
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match status.as_str() {
        "succeeded" => StatusReport {
            state: RemoteState::Succeeded,
            output_url: first_output_url(prediction.get("output")),
            error: None,
        },
        "failed" | "canceled" => StatusReport {
            state: RemoteState::Failed,
            output_url: None,
            error: match prediction.get("error") {
                None | Some(Value::Null) => (status == "canceled").then(|| "canceled".to_string()),
                Some(Value::String(text)) => Some(text.clone()),
                Some(other) => Some(other.to_string()),
            },
        },
        _ => StatusReport {
            state: RemoteState::Pending,
            output_url: None,
            error: None,
        },
    }
}

/// `output` is either a URL string or a list of URLs; only the first is used.
pub(crate) fn first_output_url(output: Option<&Value>) -> Option<String> {
    let url = match output? {
        Value::String(url) => url.as_str(),
        Value::Array(rows) => rows.first()?.as_str()?,
        _ => return None,
    };
    Some(url.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
