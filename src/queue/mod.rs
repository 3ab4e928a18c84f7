//! Request queue: the single entry point for fetch jobs.
//!
//! Enforces the global in-flight cap, spaces dispatches to the same host by
//! `request_delay_ms`, and pushes back with `QUEUE_FULL` once the waiting list
//! reaches `max_queue_size`.

mod dispatcher;
mod throttle;

pub use throttle::DomainThrottle;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::browser::BrowserBackend;
use crate::error::ErrorKind;
use crate::job::{FetchJob, FetchOptions, FetchResult};
use crate::orchestrator::FetchOrchestrator;
use crate::pool::ContextPool;
use dispatcher::{Command, Dispatcher};

/// Queue limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Jobs executing at once.
    pub max_concurrency: usize,
    /// Waiting jobs before new submissions are rejected.
    pub max_queue_size: usize,
    /// Minimum spacing between dispatch starts to one host.
    pub request_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_queue_size: 100,
            request_delay_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Queue counters. `processed`, `failed`, `blocked` and `rejected` only grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Jobs that ran through the orchestrator.
    pub processed: u64,
    /// Processed jobs that did not succeed (blocked included).
    pub failed: u64,
    /// Processed jobs stopped by an anti-automation defense.
    pub blocked: u64,
    /// Submissions turned away with `QUEUE_FULL`.
    pub rejected: u64,
    pub queue_depth: usize,
    pub active_count: usize,
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing left in flight or waiting.
    Drained,
    /// Timed out; the remaining jobs were abandoned, not cancelled.
    TimedOut { active: usize, waiting: usize },
}

/// Front door for fetch jobs.
pub struct RequestQueue<B: BrowserBackend> {
    commands: mpsc::UnboundedSender<Command>,
    stats: watch::Receiver<QueueStats>,
    orchestrator: Arc<FetchOrchestrator<B>>,
}

impl<B: BrowserBackend> RequestQueue<B> {
    /// Start the queue's dispatcher. Must be called inside a tokio runtime.
    pub fn new(orchestrator: FetchOrchestrator<B>, config: QueueConfig) -> Self {
        let max_contexts = orchestrator.pool().config().max_contexts;
        if config.max_concurrency > max_contexts {
            warn!(
                "max_concurrency ({}) exceeds max_contexts ({}); extra jobs will wait on the pool",
                config.max_concurrency, max_contexts
            );
        }
        info!(
            "Starting request queue (max_concurrency={}, max_queue_size={}, request_delay={:?})",
            config.max_concurrency,
            config.max_queue_size,
            config.request_delay()
        );

        let orchestrator = Arc::new(orchestrator);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (published, stats) = watch::channel(QueueStats::default());
        let dispatcher = Dispatcher::new(config, orchestrator.clone(), commands_rx, published);
        tokio::spawn(dispatcher.run());

        Self {
            commands,
            stats,
            orchestrator,
        }
    }

    /// Submit a job and wait for its result.
    pub async fn submit(&self, job: FetchJob) -> FetchResult {
        let url = job.url().to_string();
        let (reply, result) = oneshot::channel();
        if self.commands.send(Command::Submit { job, reply }).is_err() {
            return FetchResult::failure(&url, ErrorKind::ShuttingDown, Duration::ZERO);
        }
        result.await.unwrap_or_else(|_| {
            FetchResult::failure(&url, ErrorKind::ShuttingDown, Duration::ZERO)
                .with_error("Queue stopped before the job completed")
        })
    }

    /// Validate a raw URL and submit it. Invalid input is answered with
    /// `INVALID_URL` without touching the queue.
    pub async fn submit_url(&self, raw: &str, options: FetchOptions) -> FetchResult {
        match FetchJob::parse(raw, options) {
            Ok(job) => self.submit(job).await,
            Err(e) => FetchResult::failure(raw, ErrorKind::InvalidUrl, Duration::ZERO)
                .with_error(e.to_string()),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        *self.stats.borrow()
    }

    pub fn pool(&self) -> &ContextPool<B> {
        self.orchestrator.pool()
    }

    /// Stop accepting submissions and wait for queued and in-flight work.
    ///
    /// Does not shut the pool down.
    pub async fn drain(&self, timeout: Duration) -> DrainOutcome {
        let (ack, acked) = oneshot::channel();
        if self.commands.send(Command::Drain { ack }).is_ok() {
            let _ = acked.await;
        }

        let mut stats = self.stats.clone();
        let idle = tokio::time::timeout(
            timeout,
            stats.wait_for(|s| s.active_count == 0 && s.queue_depth == 0),
        )
        .await
        .map(|r| r.is_ok());

        match idle {
            Ok(_) => {
                info!("Queue drained");
                DrainOutcome::Drained
            }
            Err(_) => {
                let s = self.stats();
                warn!(
                    "Drain timed out after {:?} with {} active and {} waiting",
                    timeout, s.active_count, s.queue_depth
                );
                DrainOutcome::TimedOut {
                    active: s.active_count,
                    waiting: s.queue_depth,
                }
            }
        }
    }

    /// Drain the queue, then shut the pool down. Both phases use the pool's
    /// `drain_timeout_ms`.
    pub async fn shutdown(&self) -> DrainOutcome {
        let pool = self.pool();
        let drain_timeout = pool.config().drain_timeout();
        let outcome = self.drain(drain_timeout).await;
        pool.shutdown(drain_timeout).await;
        outcome
    }
}
