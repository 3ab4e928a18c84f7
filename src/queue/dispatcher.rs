//! The queue's dispatch loop.
//!
//! All queue state lives here and is mutated only by this task: the waiting
//! list, the in-flight count, the per-host throttle and the counters.
//! Submissions and completions arrive as messages; a timer wakes the loop
//! when a throttled host becomes eligible.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::throttle::DomainThrottle;
use super::{QueueConfig, QueueStats};
use crate::browser::BrowserBackend;
use crate::error::ErrorKind;
use crate::job::{FetchJob, FetchResult};
use crate::orchestrator::FetchOrchestrator;

pub(super) enum Command {
    Submit {
        job: FetchJob,
        reply: oneshot::Sender<FetchResult>,
    },
    Drain {
        ack: oneshot::Sender<()>,
    },
}

struct Pending {
    job: FetchJob,
    reply: oneshot::Sender<FetchResult>,
    enqueued_at: Instant,
}

struct Completion {
    result: FetchResult,
    reply: oneshot::Sender<FetchResult>,
}

pub(super) struct Dispatcher<B: BrowserBackend> {
    config: QueueConfig,
    orchestrator: Arc<FetchOrchestrator<B>>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    completions: mpsc::UnboundedReceiver<Completion>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    waiting: VecDeque<Pending>,
    throttle: DomainThrottle,
    active: usize,
    accepting: bool,
    wake_at: Option<Instant>,
    stats: QueueStats,
    published: watch::Sender<QueueStats>,
}

impl<B: BrowserBackend> Dispatcher<B> {
    pub(super) fn new(
        config: QueueConfig,
        orchestrator: Arc<FetchOrchestrator<B>>,
        commands: mpsc::UnboundedReceiver<Command>,
        published: watch::Sender<QueueStats>,
    ) -> Self {
        let (completions_tx, completions) = mpsc::unbounded_channel();
        Self {
            throttle: DomainThrottle::new(config.request_delay()),
            config,
            orchestrator,
            commands,
            commands_open: true,
            completions,
            completions_tx,
            waiting: VecDeque::new(),
            active: 0,
            accepting: true,
            wake_at: None,
            stats: QueueStats::default(),
            published,
        }
    }

    /// Run until every handle to the queue is gone and no work remains.
    pub(super) async fn run(mut self) {
        loop {
            let wake_at = self.wake_at;
            tokio::select! {
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => self.commands_open = false,
                },
                Some(done) = self.completions.recv() => self.on_completion(done),
                _ = tokio::time::sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {}
            }

            self.dispatch();
            self.publish();

            if !self.commands_open && self.active == 0 && self.waiting.is_empty() {
                break;
            }
        }
        debug!("Queue dispatcher stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { job, reply } => {
                if !self.accepting {
                    let result =
                        FetchResult::failure(job.url().as_str(), ErrorKind::ShuttingDown, Duration::ZERO)
                            .with_error("Queue is draining");
                    let _ = reply.send(result);
                    return;
                }
                if self.waiting.len() >= self.config.max_queue_size {
                    self.stats.rejected += 1;
                    warn!(
                        "Queue full ({} waiting), rejecting {}",
                        self.waiting.len(),
                        job.url()
                    );
                    let result =
                        FetchResult::failure(job.url().as_str(), ErrorKind::QueueFull, Duration::ZERO)
                            .with_error(format!(
                                "Queue is full ({} waiting)",
                                self.config.max_queue_size
                            ));
                    let _ = reply.send(result);
                    return;
                }
                self.waiting.push_back(Pending {
                    job,
                    reply,
                    enqueued_at: Instant::now(),
                });
            }
            Command::Drain { ack } => {
                if self.accepting {
                    info!(
                        "Draining queue ({} active, {} waiting)",
                        self.active,
                        self.waiting.len()
                    );
                }
                self.accepting = false;
                self.publish();
                let _ = ack.send(());
            }
        }
    }

    fn on_completion(&mut self, done: Completion) {
        self.active = self.active.saturating_sub(1);
        self.stats.processed += 1;
        if !done.result.success {
            self.stats.failed += 1;
        }
        if done.result.blocked {
            self.stats.blocked += 1;
        }
        // Counters are visible before the caller sees its result.
        self.publish();
        let _ = done.reply.send(done.result);
    }

    /// Start every waiting job that is eligible now, in submission order.
    ///
    /// A job whose host is still throttled stays in place; later jobs for
    /// other hosts may pass it. Jobs for the same host keep their order
    /// because they share one throttle entry.
    fn dispatch(&mut self) {
        let now = Instant::now();
        self.wake_at = None;

        let mut idx = 0;
        while idx < self.waiting.len() && self.active < self.config.max_concurrency {
            let wait = self
                .throttle
                .time_until_ready(self.waiting[idx].job.host(), now);
            if !wait.is_zero() {
                let at = now + wait;
                self.wake_at = Some(self.wake_at.map_or(at, |w| w.min(at)));
                idx += 1;
                continue;
            }
            if let Some(pending) = self.waiting.remove(idx) {
                self.start(pending, now);
            }
        }

        if let Some(at) = self.wake_at {
            debug!(
                "{} job(s) held by host throttle, next check in {:?}",
                self.waiting.len(),
                at.saturating_duration_since(now)
            );
        }
    }

    fn start(&mut self, pending: Pending, now: Instant) {
        let Pending {
            job,
            reply,
            enqueued_at,
        } = pending;

        self.throttle.record_dispatch(job.host(), now);
        self.active += 1;
        debug!(
            "Dispatching {} (active={}, queued for {:?})",
            job.url(),
            self.active,
            now.saturating_duration_since(enqueued_at)
        );

        let orchestrator = self.orchestrator.clone();
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let url = job.url().to_string();
            let started = Instant::now();
            let result = match tokio::spawn(async move { orchestrator.run(&job).await }).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Fetch task for {} failed: {}", url, e);
                    FetchResult::failure(&url, ErrorKind::NavigationError, started.elapsed())
                        .with_error(format!("Fetch task failed: {}", e))
                }
            };
            let _ = done.send(Completion { result, reply });
        });
    }

    fn publish(&mut self) {
        self.stats.queue_depth = self.waiting.len();
        self.stats.active_count = self.active;
        self.published.send_replace(self.stats);
    }
}
