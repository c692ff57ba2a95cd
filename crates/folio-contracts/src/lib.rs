pub mod events;
pub mod jobs;
pub mod manifest;
pub mod runs;

pub use jobs::{
    AspectRatio, GenerationJob, JobStatus, PageError, PageFailure, PageState, UploadResult,
};
pub use manifest::{BookView, Manifest, ManifestError, PageKey, PageView, PLACEHOLDER_IMAGE_URL};
