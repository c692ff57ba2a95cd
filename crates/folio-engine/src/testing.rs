//! In-memory stand-ins for the remote services, used by the stage tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use folio_contracts::AspectRatio;
use serde_json::Value;

use crate::error::{ServiceError, StoreError};
use crate::progress::ProgressSink;
use crate::service::{DownloadedImage, RemoteImageService, RemoteState, StatusReport, SubmitOutcome};
use crate::store::BlobStore;

pub(crate) fn rejected(status: u16) -> ServiceError {
    ServiceError::Status {
        service: "fake",
        status,
        body: "rejected".to_string(),
    }
}

pub(crate) fn pending() -> StatusReport {
    StatusReport {
        state: RemoteState::Pending,
        output_url: None,
        error: None,
    }
}

pub(crate) fn succeeded(url: &str) -> StatusReport {
    StatusReport {
        state: RemoteState::Succeeded,
        output_url: Some(url.to_string()),
        error: None,
    }
}

pub(crate) fn succeeded_without_output() -> StatusReport {
    StatusReport {
        state: RemoteState::Succeeded,
        output_url: None,
        error: None,
    }
}

pub(crate) fn failed(message: &str) -> StatusReport {
    StatusReport {
        state: RemoteState::Failed,
        output_url: None,
        error: Some(message.to_string()),
    }
}

#[derive(Default)]
pub(crate) struct FakeImageService {
    submit_script: Mutex<VecDeque<Result<SubmitOutcome, u16>>>,
    status_script: Mutex<HashMap<String, VecDeque<StatusReport>>>,
    status_errors: Mutex<HashMap<String, usize>>,
    failing_downloads: HashSet<String>,
    submitted: Mutex<Vec<(String, AspectRatio)>>,
    status_calls: AtomicUsize,
    status_delay: Duration,
    next_id: AtomicUsize,
}

impl FakeImageService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Scripts the next submit; unscripted submits are queued as `pred-<n>`.
    pub(crate) fn then_submit(self, outcome: Result<SubmitOutcome, u16>) -> Self {
        self.submit_script
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push_back(outcome);
        self
    }

    pub(crate) fn immediate(self, url: &str) -> Self {
        let remote_id = format!("sync-{url}");
        self.then_submit(Ok(SubmitOutcome::Immediate {
            remote_id,
            output_url: url.to_string(),
        }))
    }

    pub(crate) fn queued(self, remote_id: &str) -> Self {
        self.then_submit(Ok(SubmitOutcome::Queued {
            remote_id: remote_id.to_string(),
        }))
    }

    /// Status answers for `remote_id`, in order; the last one repeats.
    /// Unscripted ids stay pending forever.
    pub(crate) fn with_statuses(self, remote_id: &str, reports: Vec<StatusReport>) -> Self {
        self.status_script
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(remote_id.to_string(), reports.into_iter().collect());
        self
    }

    /// The first `count` status queries for `remote_id` fail at the transport level.
    pub(crate) fn with_status_errors(self, remote_id: &str, count: usize) -> Self {
        self.status_errors
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(remote_id.to_string(), count);
        self
    }

    /// Every status query takes at least `delay`.
    pub(crate) fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    pub(crate) fn failing_download(mut self, url: &str) -> Self {
        self.failing_downloads.insert(url.to_string());
        self
    }

    pub(crate) fn submitted(&self) -> Vec<(String, AspectRatio)> {
        self.submitted
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl RemoteImageService for FakeImageService {
    fn name(&self) -> &str {
        "fake"
    }

    fn submit(&self, prompt: &str, aspect: AspectRatio) -> Result<SubmitOutcome, ServiceError> {
        self.submitted
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push((prompt.to_string(), aspect));
        let scripted = self
            .submit_script
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .pop_front();
        match scripted {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(status)) => Err(rejected(status)),
            None => Ok(SubmitOutcome::Queued {
                remote_id: format!("pred-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            }),
        }
    }

    fn status(&self, remote_id: &str) -> Result<StatusReport, ServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if !self.status_delay.is_zero() {
            thread::sleep(self.status_delay);
        }
        {
            let mut errors = self
                .status_errors
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            if let Some(remaining) = errors.get_mut(remote_id).filter(|left| **left > 0) {
                *remaining -= 1;
                return Err(rejected(503));
            }
        }
        let mut script = self
            .status_script
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let Some(reports) = script.get_mut(remote_id) else {
            return Ok(pending());
        };
        let report = if reports.len() > 1 {
            reports.pop_front()
        } else {
            reports.front().cloned()
        };
        Ok(report.unwrap_or_else(pending))
    }

    fn download(&self, url: &str) -> Result<DownloadedImage, ServiceError> {
        if self.failing_downloads.contains(url) {
            return Err(rejected(404));
        }
        Ok(DownloadedImage {
            bytes: url.as_bytes().to_vec(),
            content_type: Some("image/png".to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredBlob {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub(crate) struct FakeBlobStore {
    failing_keys: Vec<String>,
    puts: Mutex<Vec<StoredBlob>>,
    calls: AtomicUsize,
}

impl FakeBlobStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Puts whose key contains `fragment` are rejected.
    pub(crate) fn failing_on(mut self, fragment: &str) -> Self {
        self.failing_keys.push(fragment.to_string());
        self
    }

    pub(crate) fn stored(&self) -> Vec<StoredBlob> {
        let mut puts = self
            .puts
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone();
        puts.sort_by(|a, b| a.key.cmp(&b.key));
        puts
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn url_for(key: &str) -> String {
        format!("https://cdn.test/{key}")
    }
}

impl BlobStore for FakeBlobStore {
    fn put(&self, bytes: &[u8], key: &str, content_type: &str) -> Result<String, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_keys.iter().any(|fragment| key.contains(fragment)) {
            return Err(StoreError::Status {
                key: key.to_string(),
                status: 403,
                body: "AccessDenied".to_string(),
            });
        }
        self.puts
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(StoredBlob {
                key: key.to_string(),
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            });
        Ok(Self::url_for(key))
    }
}

#[derive(Default)]
pub(crate) struct RecordingProgress {
    updates: Mutex<Vec<(usize, usize, String)>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub(crate) fn positions(&self) -> Vec<(usize, usize)> {
        self.updates
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .iter()
            .map(|(completed, total, _)| (*completed, *total))
            .collect()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.updates
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .iter()
            .map(|(_, _, message)| message.clone())
            .collect()
    }

    pub(crate) fn warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn on_progress(&self, completed: usize, total: usize, message: &str) {
        self.updates
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push((completed, total, message.to_string()));
    }

    fn on_warning(&self, message: &str) {
        self.warnings
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(message.to_string());
    }
}

/// One request as received by [`HttpFixture`]. Header names are lowercased.
#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub(crate) fn json_body(&self) -> anyhow::Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Local HTTP server on 127.0.0.1 that answers exactly one request with a
/// canned response and hands back what it received.
pub(crate) struct HttpFixture {
    base_url: String,
    handle: JoinHandle<anyhow::Result<CapturedRequest>>,
}

impl HttpFixture {
    pub(crate) fn respond(status: u16, content_type: &str, body: &[u8]) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let content_type = content_type.to_string();
        let body = body.to_vec();
        let handle = thread::spawn(move || -> anyhow::Result<CapturedRequest> {
            let (stream, _) = listener.accept()?;
            let mut reader = BufReader::new(stream.try_clone()?);
            let captured = read_request(&mut reader)?;
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status} Fixture\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )?;
            stream.write_all(&body)?;
            stream.flush()?;
            Ok(captured)
        });
        Ok(Self { base_url, handle })
    }

    pub(crate) fn json(status: u16, body: &Value) -> anyhow::Result<Self> {
        Self::respond(status, "application/json", body.to_string().as_bytes())
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Waits for the server thread and returns the request it served.
    pub(crate) fn request(self) -> anyhow::Result<CapturedRequest> {
        self.handle
            .join()
            .map_err(|_| anyhow::anyhow!("http fixture thread panicked"))?
    }
}

fn read_request(reader: &mut impl BufRead) -> anyhow::Result<CapturedRequest> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = BTreeMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    let length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body)?;
    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

/// Client for talking to an [`HttpFixture`]; ignores any proxy settings in the environment.
pub(crate) fn fixture_client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()?)
}
