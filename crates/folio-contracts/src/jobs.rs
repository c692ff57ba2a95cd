use serde::Serialize;
use thiserror::Error;

use crate::manifest::PageKey;

/// Aspect hint sent with a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    Portrait,
    Landscape,
}

impl AspectRatio {
    /// Cover and back page are portrait; everything in between is a landscape spread.
    pub fn for_position(page_index: usize, page_count: usize) -> Self {
        if page_index == 0 || page_index + 1 == page_count {
            Self::Portrait
        } else {
            Self::Landscape
        }
    }

    pub fn as_ratio(self) -> &'static str {
        match self {
            Self::Portrait => "3:4",
            Self::Landscape => "3:2",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    pub key: PageKey,
    pub remote_id: String,
    pub status: JobStatus,
    pub prompt: String,
    pub book_title: String,
    pub page_number: i64,
    pub aspect: AspectRatio,
    pub output_url: Option<String>,
}

impl GenerationJob {
    pub fn is_uploadable(&self) -> bool {
        self.status == JobStatus::Succeeded
            && self
                .output_url
                .as_deref()
                .map(|url| !url.trim().is_empty())
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub key: PageKey,
    pub blob_key: String,
    pub blob_url: Option<String>,
}

impl UploadResult {
    pub fn resolved_url(&self) -> Option<&str> {
        self.blob_url.as_deref().filter(|url| !url.is_empty())
    }
}

/// Terminal state of a page at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Resolved,
    NoJob,
    Failed,
    TimedOut,
    SucceededUnresolved,
}

/// Why a page did not resolve. Every variant is final for its page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("generation request rejected: {0}")]
    Submission(String),
    #[error("generation failed (prediction {remote_id}){}", detail_suffix(.detail))]
    Generation {
        remote_id: String,
        detail: Option<String>,
    },
    #[error("generation still pending after {waited_secs}s (prediction {remote_id})")]
    PollTimeout { remote_id: String, waited_secs: u64 },
    #[error("generation succeeded without an output URL (prediction {remote_id})")]
    MissingOutput { remote_id: String },
    #[error("image download failed: {0}")]
    Fetch(String),
    #[error("blob upload failed: {0}")]
    Store(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|text| format!(": {text}"))
        .unwrap_or_default()
}

impl PageError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Submission(_) => "submission",
            Self::Generation { .. } => "generation",
            Self::PollTimeout { .. } => "poll_timeout",
            Self::MissingOutput { .. } => "missing_output",
            Self::Fetch(_) => "fetch",
            Self::Store(_) => "store",
        }
    }

    pub fn state(&self) -> PageState {
        match self {
            Self::Submission(_) => PageState::NoJob,
            Self::Generation { .. } => PageState::Failed,
            Self::PollTimeout { .. } => PageState::TimedOut,
            Self::MissingOutput { .. } | Self::Fetch(_) | Self::Store(_) => {
                PageState::SucceededUnresolved
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub key: PageKey,
    pub book_title: String,
    pub page_number: i64,
    pub error: PageError,
}

impl PageFailure {
    pub fn for_job(job: &GenerationJob, error: PageError) -> Self {
        Self {
            key: job.key,
            book_title: job.book_title.clone(),
            page_number: job.page_number,
            error,
        }
    }
}
