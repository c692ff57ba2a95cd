pub mod error;
pub mod http;
pub mod merger;
pub mod orchestrator;
pub mod pipeline;
pub mod poller;
pub mod progress;
pub mod service;
mod sigv4;
pub mod store;
pub mod uploader;

#[cfg(test)]
mod testing;

pub use error::{error_chain_text, ServiceError, StoreError, REDACTED};
pub use http::{build_http_client, DEFAULT_HTTP_TIMEOUT};
pub use merger::{merge, MergeOutcome, MergeStats};
pub use orchestrator::{Substitutions, DEFAULT_SUBMIT_DELAY};
pub use pipeline::{plan, Pipeline, PipelineOptions, PlannedPage, RunReport};
pub use poller::PollPolicy;
pub use progress::{EventProgress, FanoutProgress, LogProgress, ProgressSink};
pub use service::{
    DownloadedImage, RemoteImageService, RemoteState, ReplicateConfig, ReplicateService,
    StatusReport, SubmitOutcome,
};
pub use store::{BlobStore, S3BlobStore, S3Config};
pub use uploader::{blob_key, sanitize_title, UploadOptions};
