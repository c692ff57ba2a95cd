use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use folio_contracts::{GenerationJob, PageError, PageFailure, PageKey, UploadResult};
use tracing::debug;

use crate::error::error_chain_text;
use crate::progress::ProgressTracker;
use crate::service::RemoteImageService;
use crate::store::BlobStore;

pub const DEFAULT_NAMESPACE: &str = "ideogram";
pub const DEFAULT_UPLOAD_WORKERS: usize = 5;
const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Leading path segment of every blob key.
    pub namespace: String,
    pub workers: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            workers: DEFAULT_UPLOAD_WORKERS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOutcome {
    /// One entry per uploadable job, ordered by page key.
    pub results: Vec<UploadResult>,
    pub failures: Vec<PageFailure>,
}

/// Keeps alphanumerics, space, `_` and `-`; anything else becomes `_`, then
/// spaces become `_` too.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, ' ' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>()
        .replace(' ', "_")
}

/// `<namespace>/<sanitized title>/page_<n>`, without a file extension.
pub fn blob_key(namespace: &str, book_title: &str, page_number: i64) -> String {
    format!(
        "{}/{}/page_{page_number}",
        namespace.trim_matches('/'),
        sanitize_title(book_title)
    )
}

pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match mime.as_str() {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

/// Downloads every finished image and stores it, `options.workers` at a time.
/// A failure only affects its own page.
pub(crate) fn upload_all(
    jobs: &[GenerationJob],
    service: &dyn RemoteImageService,
    store: &dyn BlobStore,
    options: &UploadOptions,
    tracker: &ProgressTracker<'_>,
) -> UploadOutcome {
    let queue = jobs
        .iter()
        .filter(|job| job.is_uploadable())
        .collect::<VecDeque<_>>();
    let total = queue.len();
    if total == 0 {
        return UploadOutcome::default();
    }
    let workers = options.workers.clamp(1, total);
    let queue = Mutex::new(queue);
    let results: Mutex<BTreeMap<PageKey, UploadResult>> = Mutex::new(BTreeMap::new());
    let failures: Mutex<Vec<PageFailure>> = Mutex::new(Vec::new());
    let finished = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                let Some(job) = next else {
                    break;
                };
                let base_key = blob_key(&options.namespace, &job.book_title, job.page_number);
                let result = match upload_one(job, &base_key, service, store) {
                    Ok(result) => result,
                    Err(error) => {
                        tracker.warn(&format!(
                            "Upload failed for '{}', page {}: {error}",
                            job.book_title, job.page_number
                        ));
                        failures
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(PageFailure::for_job(job, error));
                        UploadResult {
                            key: job.key,
                            blob_key: base_key,
                            blob_url: None,
                        }
                    }
                };
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(job.key, result);
                let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                tracker.advance(&format!("Uploaded image: {done}/{total}"));
            });
        }
    });

    let mut failures = failures
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    failures.sort_by_key(|failure| failure.key);
    UploadOutcome {
        results: results
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_values()
            .collect(),
        failures,
    }
}

fn upload_one(
    job: &GenerationJob,
    base_key: &str,
    service: &dyn RemoteImageService,
    store: &dyn BlobStore,
) -> Result<UploadResult, PageError> {
    let url = job.output_url.as_deref().unwrap_or_default();
    let image = service
        .download(url)
        .map_err(|err| PageError::Fetch(error_chain_text(&err, 512)))?;
    let content_type = image
        .content_type
        .as_deref()
        .filter(|value| value.starts_with("image/"))
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    let key = format!(
        "{base_key}.{}",
        extension_for_content_type(Some(content_type))
    );
    let blob_url = store
        .put(&image.bytes, &key, content_type)
        .map_err(|err| PageError::Store(error_chain_text(&err, 512)))?;
    debug!(key = %job.key, blob_key = %key, size = image.bytes.len(), "image uploaded");
    Ok(UploadResult {
        key: job.key,
        blob_key: key,
        blob_url: Some(blob_url),
    })
}
