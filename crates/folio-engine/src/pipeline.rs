use std::time::Duration;

use folio_contracts::runs::Preview;
use folio_contracts::{
    AspectRatio, GenerationJob, JobStatus, Manifest, PageFailure, PageKey, PageState, UploadResult,
};
use tracing::info;

use crate::merger::{merge, MergeStats};
use crate::orchestrator::{submit_all, Substitutions, DEFAULT_SUBMIT_DELAY};
use crate::poller::{poll_until_terminal, PollPolicy};
use crate::progress::{ProgressSink, ProgressTracker};
use crate::service::RemoteImageService;
use crate::store::BlobStore;
use crate::uploader::{blob_key, upload_all, UploadOptions};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Pause between successive generation requests.
    pub submit_delay: Duration,
    pub poll: PollPolicy,
    pub upload: UploadOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            submit_delay: DEFAULT_SUBMIT_DELAY,
            poll: PollPolicy::default(),
            upload: UploadOptions::default(),
        }
    }
}

/// What `folio plan` shows for a page: everything a run would send, without sending it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPage {
    pub key: PageKey,
    pub book_title: String,
    pub page_number: i64,
    pub prompt: String,
    pub aspect: AspectRatio,
    /// Blob key without the extension, which depends on the downloaded image.
    pub blob_key: String,
}

pub fn plan(manifest: &Manifest, substitutions: &Substitutions, namespace: &str) -> Vec<PlannedPage> {
    manifest
        .pages()
        .map(|(book, page)| PlannedPage {
            key: page.key,
            book_title: book.title.clone(),
            page_number: page.page_number,
            prompt: substitutions.apply(&page.image_prompt),
            aspect: AspectRatio::for_position(page.key.page, book.pages.len()),
            blob_key: blob_key(namespace, &book.title, page.page_number),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// The input manifest with every resolved `imageUrl` written in.
    pub manifest: Manifest,
    pub stats: MergeStats,
    pub jobs: Vec<GenerationJob>,
    pub uploads: Vec<UploadResult>,
    /// Every page that did not resolve, ordered by page key.
    pub failures: Vec<PageFailure>,
    pub poll_sweeps: usize,
    pub previews: Vec<Preview>,
}

impl RunReport {
    pub fn page_state(&self, key: PageKey) -> PageState {
        let resolved = self
            .uploads
            .iter()
            .any(|upload| upload.key == key && upload.resolved_url().is_some());
        if resolved {
            return PageState::Resolved;
        }
        if let Some(failure) = self.failures.iter().find(|failure| failure.key == key) {
            return failure.error.state();
        }
        match self.jobs.iter().find(|job| job.key == key).map(|job| job.status) {
            None => PageState::NoJob,
            Some(JobStatus::Failed) => PageState::Failed,
            Some(JobStatus::Succeeded) => PageState::SucceededUnresolved,
            Some(JobStatus::TimedOut) | Some(JobStatus::Pending) => PageState::TimedOut,
        }
    }

    /// Terminal state of every page, in manifest order.
    pub fn page_states(&self) -> Vec<(PageKey, PageState)> {
        self.manifest
            .pages()
            .map(|(_, page)| (page.key, self.page_state(page.key)))
            .collect()
    }
}

/// Runs the four stages in order: submit, poll, upload, merge.
pub struct Pipeline<S, B> {
    service: S,
    store: B,
    options: PipelineOptions,
}

impl<S: RemoteImageService, B: BlobStore> Pipeline<S, B> {
    pub fn new(service: S, store: B, options: PipelineOptions) -> Self {
        Self {
            service,
            store,
            options,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Page-level problems never fail the run; they end up in the report.
    pub fn run(
        &self,
        manifest: &Manifest,
        substitutions: &Substitutions,
        progress: &dyn ProgressSink,
    ) -> RunReport {
        let page_count = manifest.page_count();
        let tracker = ProgressTracker::new(progress, page_count * 2);
        info!(
            books = manifest.books().len(),
            pages = page_count,
            service = self.service.name(),
            "illustration run started"
        );

        let submission = submit_all(
            manifest,
            substitutions,
            &self.service,
            self.options.submit_delay,
            &tracker,
        );
        let mut jobs = submission.jobs;
        let poll = poll_until_terminal(&mut jobs, &self.service, &self.options.poll, &tracker);
        let upload = upload_all(
            &jobs,
            &self.service,
            &self.store,
            &self.options.upload,
            &tracker,
        );
        let merged = merge(manifest, &upload.results);

        let mut failures = submission.failures;
        failures.extend(poll.failures);
        failures.extend(upload.failures);
        failures.sort_by_key(|failure| failure.key);

        tracker.finish(&format!(
            "Resolved {}/{} pages",
            merged.stats.resolved, merged.stats.total
        ));
        info!(
            resolved = merged.stats.resolved,
            unresolved = merged.stats.unresolved,
            poll_sweeps = poll.sweeps,
            "illustration run finished"
        );

        RunReport {
            manifest: merged.manifest,
            stats: merged.stats,
            jobs,
            uploads: upload.results,
            failures,
            poll_sweeps: poll.sweeps,
            previews: merged.previews,
        }
    }
}
