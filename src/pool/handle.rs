//! Execution context handle and its health bookkeeping.

use chrono::{DateTime, Utc};

use crate::browser::ContextId;

/// Whether a handle is sitting in the pool or lent out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Idle,
    Busy,
}

/// How a lease ended, as judged by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The context behaved; failure streak resets.
    Healthy,
    /// Context-level failure (crash, unresponsive, wedged navigation).
    Failed,
}

/// One browser execution context as tracked by the pool.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    id: ContextId,
    state: ContextState,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    consecutive_failures: u32,
}

impl ContextHandle {
    pub(crate) fn new(id: ContextId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: ContextState::Idle,
            created_at: now,
            last_used_at: now,
            consecutive_failures: 0,
        }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn mark_busy(&mut self) {
        self.state = ContextState::Busy;
        self.last_used_at = Utc::now();
    }

    pub(crate) fn mark_idle(&mut self) {
        self.state = ContextState::Idle;
    }

    /// Apply a release outcome. Returns the updated failure streak.
    pub(crate) fn record(&mut self, outcome: ReleaseOutcome) -> u32 {
        self.last_used_at = Utc::now();
        match outcome {
            ReleaseOutcome::Healthy => self.consecutive_failures = 0,
            ReleaseOutcome::Failed => self.consecutive_failures += 1,
        }
        self.consecutive_failures
    }
}
