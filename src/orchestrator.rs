//! Single-job fetch: acquire, navigate, classify, extract, release.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::BrowserBackend;
use crate::detect::{self, Verdict};
use crate::error::{ErrorKind, NavigationError};
use crate::extract;
use crate::job::{FetchJob, FetchResult, PageContent};
use crate::pool::{ContextLease, ContextPool, ReleaseOutcome};

/// Runs fetch jobs against pooled browser contexts.
///
/// `run` never fails: every error path becomes a `FetchResult` with
/// `success == false`. A blocked page is terminal; the job is not retried.
pub struct FetchOrchestrator<B: BrowserBackend> {
    pool: ContextPool<B>,
}

impl<B: BrowserBackend> FetchOrchestrator<B> {
    pub fn new(pool: ContextPool<B>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ContextPool<B> {
        &self.pool
    }

    /// Fetch one job.
    pub async fn run(&self, job: &FetchJob) -> FetchResult {
        let started = Instant::now();
        let url = job.url().as_str();

        let lease = match self.pool.acquire(self.pool.config().acquire_timeout()).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!("Could not acquire context for {}: {}", url, e);
                return FetchResult::failure(url, e.kind(), started.elapsed())
                    .with_error(e.to_string());
            }
        };

        debug!("Fetching {} on context {}", url, lease.id());
        let (result, outcome) = self.fetch_on(&lease, job, started).await;
        lease.release(outcome).await;

        if result.success {
            info!("Fetched {} in {}ms", url, result.elapsed_ms);
        }
        result
    }

    async fn fetch_on(
        &self,
        lease: &ContextLease<B>,
        job: &FetchJob,
        started: Instant,
    ) -> (FetchResult, ReleaseOutcome) {
        let backend = self.pool.backend();
        let context = lease.id();
        let url = job.url().as_str();

        let navigated = tokio::time::timeout(
            job.timeout(),
            backend.navigate(context, job.url(), job.timeout()),
        )
        .await;

        let nav = match navigated {
            Ok(Ok(nav)) => nav,
            Ok(Err(e)) => {
                warn!("Navigation to {} failed: {}", url, e);
                let outcome = self.outcome_for(&e);
                let result = FetchResult::failure(url, e.kind(), started.elapsed())
                    .with_error(e.to_string());
                return (result, outcome);
            }
            Err(_) => {
                warn!("Navigation to {} exceeded {:?}", url, job.timeout());
                return (
                    FetchResult::failure(url, ErrorKind::Timeout, started.elapsed())
                        .with_error(format!("Navigation exceeded {}ms", job.options().timeout_ms)),
                    self.outcome_for(&NavigationError::Timeout),
                );
            }
        };

        if !job.post_load_wait().is_zero() {
            tokio::time::sleep(job.post_load_wait()).await;
        }

        let snapshot = match tokio::time::timeout(job.timeout(), backend.get_content(context)).await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                warn!("Reading content of {} failed: {}", url, e);
                let outcome = self.outcome_for(&e);
                let result = FetchResult::failure(url, e.kind(), started.elapsed())
                    .with_error(e.to_string());
                return (result, outcome);
            }
            Err(_) => {
                // Loaded but cannot serialize the DOM: the context is wedged.
                warn!("Reading content of {} timed out", url);
                return (
                    FetchResult::failure(url, ErrorKind::Timeout, started.elapsed())
                        .with_error("Timed out reading page content"),
                    ReleaseOutcome::Failed,
                );
            }
        };

        let status = snapshot.status_code.or(nav.status_code);

        if let Verdict::Blocked(kind) = detect::classify(status, &snapshot.final_url, &snapshot.html)
        {
            warn!(
                "Blocked by anti-automation defense at {} ({}), not retrying",
                url, kind
            );
            let result = FetchResult::blocked(
                url,
                kind,
                status,
                Some(snapshot.final_url),
                started.elapsed(),
            );
            return (result, ReleaseOutcome::Healthy);
        }

        if let Some(code) = status.filter(|s| *s >= 400) {
            debug!("{} answered HTTP {}", url, code);
            let result = FetchResult::failure(url, ErrorKind::NavigationError, started.elapsed())
                .with_status(Some(code))
                .with_error(format!("HTTP {}", code));
            return (result, ReleaseOutcome::Healthy);
        }

        let extracted = extract::extract(&snapshot.html);
        let page = PageContent {
            final_url: snapshot.final_url,
            status_code: status,
            html: snapshot.html,
            title: extracted.title,
            simplified_text: extracted.text,
        };
        (
            FetchResult::success(url, page, started.elapsed()),
            ReleaseOutcome::Healthy,
        )
    }

    /// Whether a navigation failure counts against the context.
    fn outcome_for(&self, error: &NavigationError) -> ReleaseOutcome {
        if error.is_context_failure() {
            return ReleaseOutcome::Failed;
        }
        match error {
            NavigationError::Timeout if self.pool.config().count_timeouts_as_failures => {
                ReleaseOutcome::Failed
            }
            _ => ReleaseOutcome::Healthy,
        }
    }
}
