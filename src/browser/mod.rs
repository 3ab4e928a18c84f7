//! Headless browser capability.
//!
//! The pool and orchestrator only see [`BrowserBackend`]: launch an isolated
//! execution context, navigate it, read back the page, close it. The
//! chromiumoxide implementation lives in [`chromium`].

mod chromium;
mod config;

pub use chromium::ChromiumBackend;
pub use config::BrowserEngineConfig;

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::{BrowserError, NavigationError};

/// Opaque identity of one execution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(String);

impl ContextId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContextId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What navigation reported once the load finished.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NavigationInfo {
    /// Main document HTTP status, when the browser exposes it.
    pub status_code: Option<u16>,
}

/// Final page state after load (and any settle wait).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub final_url: String,
    pub status_code: Option<u16>,
    pub html: String,
}

/// A provider of isolated browser execution contexts.
///
/// Implementations must tolerate `close_context` on an id that was already
/// closed, and must treat each context as usable by one caller at a time
/// (the pool guarantees exclusivity).
#[async_trait]
pub trait BrowserBackend: Send + Sync + 'static {
    /// Start a new execution context.
    async fn launch_context(&self) -> Result<ContextId, BrowserError>;

    /// Navigate the context to `url`. `timeout` is advisory for the backend's
    /// own protocol timeouts; the orchestrator enforces the hard deadline.
    async fn navigate(
        &self,
        context: &ContextId,
        url: &Url,
        timeout: Duration,
    ) -> Result<NavigationInfo, NavigationError>;

    /// Read the current page.
    async fn get_content(&self, context: &ContextId) -> Result<PageSnapshot, NavigationError>;

    /// Terminate the context and release its resources.
    async fn close_context(&self, context: &ContextId);
}

/// Map a browser-reported navigation error message onto [`NavigationError`].
#[cfg(feature = "browser")]
pub(crate) fn classify_navigation_error(message: &str) -> NavigationError {
    let lower = message.to_lowercase();
    if lower.contains("net::err_timed_out") || lower.contains("timeout") || lower.contains("timed out")
    {
        NavigationError::Timeout
    } else if lower.contains("net::err_") {
        NavigationError::Network(message.to_string())
    } else if lower.contains("channel")
        || lower.contains("websocket")
        || lower.contains("connection closed")
        || lower.contains("target closed")
        || lower.contains("crash")
        || lower.contains("no response")
    {
        NavigationError::Crashed(message.to_string())
    } else {
        NavigationError::Network(message.to_string())
    }
}
