//! Scoped ownership of a pooled context.

use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tracing::warn;

use super::{ContextHandle, PoolInner, ReleaseOutcome};
use crate::browser::{BrowserBackend, ContextId};

/// Exclusive loan of one execution context. Consumed by [`release`].
///
/// If dropped without being released (cancelled future, panic), the context
/// goes back to the pool marked as failed.
///
/// [`release`]: ContextLease::release
pub struct ContextLease<B: BrowserBackend> {
    handle: Option<ContextHandle>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<B>>,
}

impl<B: BrowserBackend> ContextLease<B> {
    pub(crate) fn new(
        handle: ContextHandle,
        permit: OwnedSemaphorePermit,
        pool: Arc<PoolInner<B>>,
    ) -> Self {
        Self {
            handle: Some(handle),
            permit: Some(permit),
            pool,
        }
    }

    pub fn handle(&self) -> &ContextHandle {
        // Only `release` and `drop` take the handle, and both consume the lease.
        self.handle.as_ref().expect("lease holds its handle until released")
    }

    pub fn id(&self) -> &ContextId {
        self.handle().id()
    }

    /// Hand the context back with the caller's verdict on its health.
    pub async fn release(mut self, outcome: ReleaseOutcome) {
        if let (Some(handle), Some(permit)) = (self.handle.take(), self.permit.take()) {
            self.pool.clone().finish(handle, permit, outcome).await;
        }
    }
}

impl<B: BrowserBackend> std::fmt::Debug for ContextLease<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextLease")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<B: BrowserBackend> Drop for ContextLease<B> {
    fn drop(&mut self) {
        let (Some(handle), Some(permit)) = (self.handle.take(), self.permit.take()) else {
            return;
        };

        warn!(
            "Context lease {} dropped without release, returning it as failed",
            handle.id()
        );
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(
                    self.pool
                        .clone()
                        .finish(handle, permit, ReleaseOutcome::Failed),
                );
            }
            Err(_) => {
                self.pool.finish_detached(handle);
                drop(permit);
            }
        }
    }
}
