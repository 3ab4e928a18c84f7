//! Per-host dispatch spacing.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Dispatch history for one host.
#[derive(Debug, Clone, Copy)]
struct HostEntry {
    last_dispatch_at: Instant,
    dispatches: u64,
}

/// Tracks the last dispatch time per host.
///
/// Entries are never removed; the map grows with the number of distinct
/// hosts seen. Only the queue dispatcher touches it.
#[derive(Debug)]
pub struct DomainThrottle {
    delay: Duration,
    hosts: HashMap<String, HostEntry>,
}

impl DomainThrottle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            hosts: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Time left before `host` may be dispatched to again.
    pub fn time_until_ready(&self, host: &str, now: Instant) -> Duration {
        match self.hosts.get(host) {
            Some(entry) => {
                let elapsed = now.saturating_duration_since(entry.last_dispatch_at);
                self.delay.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    pub fn is_ready(&self, host: &str, now: Instant) -> bool {
        self.time_until_ready(host, now).is_zero()
    }

    /// Mark a dispatch to `host` at `now`.
    pub fn record_dispatch(&mut self, host: &str, now: Instant) {
        match self.hosts.get_mut(host) {
            Some(entry) => {
                entry.last_dispatch_at = entry.last_dispatch_at.max(now);
                entry.dispatches += 1;
            }
            None => {
                self.hosts.insert(
                    host.to_string(),
                    HostEntry {
                        last_dispatch_at: now,
                        dispatches: 1,
                    },
                );
            }
        }
    }

    pub fn last_dispatch(&self, host: &str) -> Option<Instant> {
        self.hosts.get(host).map(|e| e.last_dispatch_at)
    }

    pub fn dispatch_count(&self, host: &str) -> u64 {
        self.hosts.get(host).map(|e| e.dispatches).unwrap_or(0)
    }

    /// Number of distinct hosts ever dispatched to.
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}
