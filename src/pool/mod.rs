//! Bounded pool of browser execution contexts.
//!
//! Capacity is a fair semaphore with `max_contexts` permits. A permit is
//! held for as long as a context is lent out (and while a replacement for an
//! evicted context is launching), so live contexts never exceed capacity and
//! waiting acquirers are served in arrival order.

mod handle;
mod lease;

pub use handle::{ContextHandle, ContextState, ReleaseOutcome};
pub use lease::ContextLease;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::browser::{BrowserBackend, ContextId};
use crate::error::PoolError;

/// Configuration for the execution context pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on live contexts.
    pub max_contexts: usize,
    /// Deadline for launching one context.
    pub launch_timeout_ms: u64,
    /// Deadline for obtaining a context, waiting included.
    pub acquire_timeout_ms: u64,
    /// Consecutive failures after which a context is evicted and replaced.
    pub failure_threshold: u32,
    /// Whether a navigation timeout counts against the context.
    pub count_timeouts_as_failures: bool,
    /// How long shutdown waits for busy contexts before terminating them.
    pub drain_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_contexts: 4,
            launch_timeout_ms: 30_000,
            acquire_timeout_ms: 60_000,
            failure_threshold: 3,
            count_timeouts_as_failures: true,
            drain_timeout_ms: 10_000,
        }
    }
}

impl PoolConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
    pub launched: u64,
    pub evicted: u64,
    pub launch_failures: u64,
    pub closed: bool,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<ContextHandle>,
    busy: HashSet<ContextId>,
    /// Evicted contexts whose replacement launch is still running.
    replacing: usize,
    /// Launches for callers that already hold a permit.
    launching: usize,
    closed: bool,
    launched: u64,
    evicted: u64,
    launch_failures: u64,
}

impl PoolState {
    fn in_use(&self) -> usize {
        self.busy.len() + self.replacing + self.launching
    }
}

pub(crate) struct PoolInner<B: BrowserBackend> {
    backend: Arc<B>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    /// Signalled whenever a context stops being in use.
    released: Notify,
}

/// Pool of browser execution contexts with launch-on-demand and
/// crash replacement.
pub struct ContextPool<B: BrowserBackend> {
    inner: Arc<PoolInner<B>>,
}

impl<B: BrowserBackend> Clone for ContextPool<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: BrowserBackend> ContextPool<B> {
    /// Create an empty pool. Contexts are launched lazily on first acquire.
    pub fn new(backend: Arc<B>, config: PoolConfig) -> Self {
        info!(
            "Created execution context pool (max_contexts={}, failure_threshold={})",
            config.max_contexts, config.failure_threshold
        );
        Self {
            inner: Arc::new(PoolInner {
                backend,
                permits: Arc::new(Semaphore::new(config.max_contexts)),
                config,
                state: Mutex::new(PoolState::default()),
                released: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.inner.backend
    }

    /// Borrow a context, waiting up to `timeout` for one to free up.
    ///
    /// Reuses an idle context when available, otherwise launches one.
    pub async fn acquire(&self, timeout: Duration) -> Result<ContextLease<B>, PoolError> {
        let inner = &self.inner;
        let started = tokio::time::Instant::now();

        let permit = match tokio::time::timeout(timeout, inner.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                warn!("No execution context available after {:?}", timeout);
                return Err(PoolError::AcquireTimeout(timeout));
            }
        };

        let (reused, stale) = {
            let mut state = inner.lock_state();
            if state.closed {
                return Err(PoolError::Closed);
            }
            match state.idle.pop_front() {
                Some(handle)
                    if handle.consecutive_failures() >= inner.config.failure_threshold =>
                {
                    state.evicted += 1;
                    (None, Some(handle))
                }
                Some(mut handle) => {
                    handle.mark_busy();
                    state.busy.insert(handle.id().clone());
                    (Some(handle), None)
                }
                None => (None, None),
            }
        };

        if let Some(stale) = stale {
            warn!(
                "Evicting execution context {} after {} consecutive failures",
                stale.id(),
                stale.consecutive_failures()
            );
            inner.backend.close_context(stale.id()).await;
        }

        let handle = match reused {
            Some(handle) => {
                debug!(
                    "Reusing execution context {} (waited {:?})",
                    handle.id(),
                    started.elapsed()
                );
                handle
            }
            None => inner.launch().await?,
        };

        Ok(ContextLease::new(handle, permit, inner.clone()))
    }

    /// Return a context to the pool. Equivalent to `lease.release(outcome)`.
    pub async fn release(&self, lease: ContextLease<B>, outcome: ReleaseOutcome) {
        lease.release(outcome).await;
    }

    /// Stop lending contexts and terminate every browser process.
    ///
    /// Waits up to `drain_timeout` for lent-out contexts to come back, then
    /// terminates whatever is still busy. Calling it again is a no-op.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        let inner = &self.inner;
        {
            let mut state = inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        inner.permits.close();
        info!("Shutting down execution context pool");

        let drained = tokio::time::timeout(drain_timeout, inner.wait_until(|s| s.in_use() == 0))
            .await
            .is_ok();

        let (idle, busy): (Vec<ContextHandle>, Vec<ContextId>) = {
            let mut state = inner.lock_state();
            (state.idle.drain(..).collect(), state.busy.drain().collect())
        };

        if !drained {
            warn!(
                "Drain timed out after {:?}, terminating {} busy context(s)",
                drain_timeout,
                busy.len()
            );
        }

        for handle in &idle {
            inner.backend.close_context(handle.id()).await;
        }
        for id in &busy {
            inner.backend.close_context(id).await;
        }

        // A launch cannot be cut short; it closes its own context once it
        // sees the pool is closed.
        let launching = inner.lock_state().launching;
        if launching > 0 {
            debug!("Waiting for {} context launch(es) to finish", launching);
            let settled = tokio::time::timeout(
                inner.config.launch_timeout(),
                inner.wait_until(|s| s.launching == 0),
            )
            .await;
            if settled.is_err() {
                warn!("{} context launch(es) still running after shutdown", launching);
            }
        }

        info!(
            "Execution context pool shut down ({} idle, {} busy terminated)",
            idle.len(),
            busy.len()
        );
    }

    /// Number of contexts currently alive (idle, busy or being replaced).
    pub fn live_contexts(&self) -> usize {
        let state = self.inner.lock_state();
        state.idle.len() + state.in_use()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state();
        PoolStats {
            live: state.idle.len() + state.in_use(),
            idle: state.idle.len(),
            busy: state.busy.len(),
            launched: state.launched,
            evicted: state.evicted,
            launch_failures: state.launch_failures,
            closed: state.closed,
        }
    }
}

impl<B: BrowserBackend> PoolInner<B> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        // State mutations never panic midway, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn wait_until(&self, ready: impl Fn(&PoolState) -> bool) {
        loop {
            let notified = self.released.notified();
            if ready(&self.lock_state()) {
                return;
            }
            notified.await;
        }
    }

    /// Launch a context for a caller that already holds a permit.
    async fn launch(&self) -> Result<ContextHandle, PoolError> {
        let _launching = LaunchGuard::new(self);
        let timeout = self.config.launch_timeout();
        let launched = tokio::time::timeout(timeout, self.backend.launch_context()).await;

        let id = match launched {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                self.lock_state().launch_failures += 1;
                warn!("Execution context launch failed: {}", e);
                return Err(PoolError::Launch(e));
            }
            Err(_) => {
                self.lock_state().launch_failures += 1;
                warn!("Execution context launch timed out after {:?}", timeout);
                return Err(PoolError::LaunchTimeout(timeout));
            }
        };

        let closed = {
            let mut state = self.lock_state();
            state.launched += 1;
            if !state.closed {
                state.busy.insert(id.clone());
            }
            state.closed
        };
        if closed {
            self.backend.close_context(&id).await;
            return Err(PoolError::Closed);
        }

        info!("Launched execution context {}", id);
        let mut handle = ContextHandle::new(id);
        handle.mark_busy();
        Ok(handle)
    }

    /// Take a context back from its lease.
    pub(crate) async fn finish(
        self: Arc<Self>,
        mut handle: ContextHandle,
        permit: OwnedSemaphorePermit,
        outcome: ReleaseOutcome,
    ) {
        let failures = handle.record(outcome);
        let evict = failures >= self.config.failure_threshold;

        let closed = {
            let mut state = self.lock_state();
            state.busy.remove(handle.id());
            if !state.closed && !evict {
                handle.mark_idle();
                state.idle.push_back(handle);
                drop(state);
                self.released.notify_waiters();
                drop(permit);
                return;
            }
            if evict && !state.closed {
                state.evicted += 1;
                state.replacing += 1;
            }
            state.closed
        };

        if closed {
            self.released.notify_waiters();
            self.backend.close_context(handle.id()).await;
            debug!("Closed context {} returned after shutdown", handle.id());
            return;
        }

        warn!(
            "Evicting execution context {} after {} consecutive failures",
            handle.id(),
            failures
        );
        tokio::spawn(self.replace(handle, permit));
    }

    /// Destroy an evicted context and launch its replacement. The permit is
    /// held until the replacement is in the idle list (or given up on).
    async fn replace(self: Arc<Self>, evicted: ContextHandle, permit: OwnedSemaphorePermit) {
        self.backend.close_context(evicted.id()).await;

        let timeout = self.config.launch_timeout();
        let launched = tokio::time::timeout(timeout, self.backend.launch_context()).await;

        let orphan = {
            let mut state = self.lock_state();
            state.replacing -= 1;
            match launched {
                Ok(Ok(id)) => {
                    state.launched += 1;
                    if state.closed {
                        Some(id)
                    } else {
                        info!("Replaced context {} with {}", evicted.id(), id);
                        state.idle.push_back(ContextHandle::new(id));
                        None
                    }
                }
                Ok(Err(e)) => {
                    state.launch_failures += 1;
                    warn!("Replacement launch failed, pool shrinks until next acquire: {}", e);
                    None
                }
                Err(_) => {
                    state.launch_failures += 1;
                    warn!("Replacement launch timed out after {:?}", timeout);
                    None
                }
            }
        };

        if let Some(id) = orphan {
            self.backend.close_context(&id).await;
        }
        drop(permit);
        self.released.notify_waiters();
    }

    /// Synchronous fallback for a lease dropped outside a runtime: put the
    /// context back as failed without closing anything. A context past the
    /// failure threshold is evicted by the next acquire that picks it up.
    pub(crate) fn finish_detached(&self, mut handle: ContextHandle) {
        handle.record(ReleaseOutcome::Failed);
        let mut state = self.lock_state();
        state.busy.remove(handle.id());
        if !state.closed {
            handle.mark_idle();
            state.idle.push_back(handle);
        }
        drop(state);
        self.released.notify_waiters();
    }
}

/// Counts a launch as in use until it returns or is abandoned.
struct LaunchGuard<'a, B: BrowserBackend> {
    pool: &'a PoolInner<B>,
}

impl<'a, B: BrowserBackend> LaunchGuard<'a, B> {
    fn new(pool: &'a PoolInner<B>) -> Self {
        pool.lock_state().launching += 1;
        Self { pool }
    }
}

impl<B: BrowserBackend> Drop for LaunchGuard<'_, B> {
    fn drop(&mut self) {
        self.pool.lock_state().launching -= 1;
        self.pool.released.notify_waiters();
    }
}
