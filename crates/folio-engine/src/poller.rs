use std::thread;
use std::time::{Duration, Instant};

use folio_contracts::{GenerationJob, JobStatus, PageError, PageFailure};
use tracing::debug;

use crate::error::error_chain_text;
use crate::progress::ProgressTracker;
use crate::service::{RemoteImageService, RemoteState};

/// Sweep pacing for pending generations.
///
/// The wait between sweeps starts at `initial_interval` and grows by
/// `multiplier` up to `max_interval`. Jobs still pending once `timeout` has
/// elapsed are given up on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(3),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            timeout: Duration::from_secs(600),
        }
    }
}

impl PollPolicy {
    pub fn next_interval(&self, current: Duration) -> Duration {
        let grown = current.mul_f64(self.multiplier.max(1.0));
        grown.min(self.max_interval.max(self.initial_interval))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    /// Full passes over the pending jobs; 0 when nothing was pending.
    pub sweeps: usize,
    pub failures: Vec<PageFailure>,
}

/// Polls every pending job until each one reaches a terminal status or the
/// policy's timeout runs out. Jobs are updated in place.
pub(crate) fn poll_until_terminal(
    jobs: &mut [GenerationJob],
    service: &dyn RemoteImageService,
    policy: &PollPolicy,
    tracker: &ProgressTracker<'_>,
) -> PollOutcome {
    let started = Instant::now();
    let mut interval = policy.initial_interval;
    let mut outcome = PollOutcome::default();

    while jobs.iter().any(|job| !job.status.is_terminal()) {
        outcome.sweeps += 1;
        for job in jobs.iter_mut().filter(|job| !job.status.is_terminal()) {
            // A sweep over slow status calls must not run past the deadline.
            if started.elapsed() >= policy.timeout {
                break;
            }
            check_job(job, service, tracker, &mut outcome.failures);
        }

        let pending = jobs
            .iter()
            .filter(|job| !job.status.is_terminal())
            .count();
        tracker.note(&format!(
            "Checked image generation status: {pending} of {} still pending",
            jobs.len()
        ));
        if pending == 0 {
            break;
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            let waited_secs = elapsed.as_secs();
            for job in jobs.iter_mut().filter(|job| !job.status.is_terminal()) {
                job.status = JobStatus::TimedOut;
                let error = PageError::PollTimeout {
                    remote_id: job.remote_id.clone(),
                    waited_secs,
                };
                tracker.warn(&format!(
                    "Gave up on '{}', page {}: {error}",
                    job.book_title, job.page_number
                ));
                outcome.failures.push(PageFailure::for_job(job, error));
            }
            break;
        }
        thread::sleep(interval.min(policy.timeout - elapsed));
        interval = policy.next_interval(interval);
    }
    outcome
}

fn check_job(
    job: &mut GenerationJob,
    service: &dyn RemoteImageService,
    tracker: &ProgressTracker<'_>,
    failures: &mut Vec<PageFailure>,
) {
    let report = match service.status(&job.remote_id) {
        Ok(report) => report,
        Err(err) => {
            // Transient; the job is retried on the next sweep.
            tracker.warn(&format!(
                "Status check failed for '{}', page {}: {}",
                job.book_title,
                job.page_number,
                error_chain_text(&err, 512)
            ));
            return;
        }
    };
    match report.state {
        RemoteState::Pending => {}
        RemoteState::Succeeded => {
            job.status = JobStatus::Succeeded;
            job.output_url = report.output_url;
            if job.is_uploadable() {
                debug!(key = %job.key, remote_id = %job.remote_id, "generation succeeded");
            } else {
                let error = PageError::MissingOutput {
                    remote_id: job.remote_id.clone(),
                };
                tracker.warn(&format!(
                    "No image returned for '{}', page {}: {error}",
                    job.book_title, job.page_number
                ));
                failures.push(PageFailure::for_job(job, error));
            }
        }
        RemoteState::Failed => {
            job.status = JobStatus::Failed;
            let error = PageError::Generation {
                remote_id: job.remote_id.clone(),
                detail: report.error,
            };
            tracker.warn(&format!(
                "Image generation failed for '{}', page {}: {error}",
                job.book_title, job.page_number
            ));
            failures.push(PageFailure::for_job(job, error));
        }
    }
}
