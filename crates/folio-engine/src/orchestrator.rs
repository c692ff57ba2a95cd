use std::thread;
use std::time::Duration;

use folio_contracts::{AspectRatio, GenerationJob, JobStatus, Manifest, PageError, PageFailure};
use tracing::debug;

use crate::error::error_chain_text;
use crate::progress::ProgressTracker;
use crate::service::{RemoteImageService, SubmitOutcome};

pub const DEFAULT_SUBMIT_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_CHARACTER_NAME: &str = "Mia";
pub const DEFAULT_CHARACTER_AGE: &str = "2";

const NAME_PLACEHOLDER: &str = "{charactername}";
const AGE_PLACEHOLDER: &str = "{characterage}";
const ERROR_TEXT_LIMIT: usize = 512;

/// Values written into the prompt placeholders before submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitutions {
    pub character_name: String,
    pub character_age: String,
}

impl Default for Substitutions {
    fn default() -> Self {
        Self::new(DEFAULT_CHARACTER_NAME, DEFAULT_CHARACTER_AGE)
    }
}

impl Substitutions {
    pub fn new(character_name: impl Into<String>, character_age: impl Into<String>) -> Self {
        Self {
            character_name: character_name.into(),
            character_age: character_age.into(),
        }
    }

    /// Literal replacement of every placeholder occurrence; other `{...}` tokens are kept.
    pub fn apply(&self, prompt: &str) -> String {
        prompt
            .replace(NAME_PLACEHOLDER, &self.character_name)
            .replace(AGE_PLACEHOLDER, &self.character_age)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionOutcome {
    pub jobs: Vec<GenerationJob>,
    pub failures: Vec<PageFailure>,
}

/// Submits one generation request per page, in manifest order, pausing
/// `delay` between requests.
pub(crate) fn submit_all(
    manifest: &Manifest,
    substitutions: &Substitutions,
    service: &dyn RemoteImageService,
    delay: Duration,
    tracker: &ProgressTracker<'_>,
) -> SubmissionOutcome {
    let total = manifest.page_count();
    let mut outcome = SubmissionOutcome::default();
    for (position, (book, page)) in manifest.pages().enumerate() {
        if position > 0 && !delay.is_zero() {
            thread::sleep(delay);
        }
        let prompt = substitutions.apply(&page.image_prompt);
        let aspect = AspectRatio::for_position(page.key.page, book.pages.len());
        let mut job = GenerationJob {
            key: page.key,
            remote_id: String::new(),
            status: JobStatus::Pending,
            prompt,
            book_title: book.title.clone(),
            page_number: page.page_number,
            aspect,
            output_url: None,
        };

        match service.submit(&job.prompt, aspect) {
            Ok(SubmitOutcome::Immediate {
                remote_id,
                output_url,
            }) => {
                debug!(key = %job.key, remote_id = %remote_id, "generation finished synchronously");
                job.remote_id = remote_id;
                job.status = JobStatus::Succeeded;
                job.output_url = Some(output_url);
                outcome.jobs.push(job);
            }
            Ok(SubmitOutcome::Queued { remote_id }) => {
                debug!(key = %job.key, remote_id = %remote_id, "generation queued");
                job.remote_id = remote_id;
                outcome.jobs.push(job);
            }
            Err(err) => {
                let error = PageError::Submission(error_chain_text(&err, ERROR_TEXT_LIMIT));
                tracker.warn(&format!(
                    "Image generation request failed for '{}', page {}: {error}",
                    job.book_title, job.page_number
                ));
                outcome.failures.push(PageFailure::for_job(&job, error));
            }
        }
        tracker.advance(&format!(
            "Initiated image generation: {}/{total}",
            position + 1
        ));
    }
    outcome
}
