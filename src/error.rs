//! Error taxonomy for fetch results and the typed errors behind it.
//!
//! Nothing on the public fetch surface returns `Err`: pool, browser and
//! parsing failures are folded into an [`ErrorKind`] carried by a
//! [`FetchResult`](crate::job::FetchResult).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of reasons a fetch did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// URL did not parse as an absolute http(s) URL. Rejected before queueing.
    InvalidUrl,
    /// Waiting list was at capacity.
    QueueFull,
    /// No execution context could be acquired or launched in time.
    LaunchTimeout,
    /// Navigation exceeded the job deadline.
    Timeout,
    /// Network, DNS or protocol failure reaching the target.
    NavigationError,
    /// Anti-automation defense detected. Terminal.
    Blocked,
    /// Submitted after drain began.
    ShuttingDown,
}

impl ErrorKind {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "INVALID_URL",
            ErrorKind::QueueFull => "QUEUE_FULL",
            ErrorKind::LaunchTimeout => "LAUNCH_TIMEOUT",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NavigationError => "NAVIGATION_ERROR",
            ErrorKind::Blocked => "BLOCKED",
            ErrorKind::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// HTTP status a request/response layer should answer with.
    ///
    /// `NAVIGATION_ERROR` maps to 500 here; use
    /// [`FetchResult::http_status`](crate::job::FetchResult::http_status)
    /// to get the 404 refinement for missing targets.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidUrl => 400,
            ErrorKind::Blocked => 403,
            ErrorKind::QueueFull | ErrorKind::ShuttingDown => 503,
            ErrorKind::LaunchTimeout | ErrorKind::Timeout | ErrorKind::NavigationError => 500,
        }
    }

    /// Whether the failure was produced before the job reached the orchestrator.
    pub fn is_admission_failure(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidUrl | ErrorKind::QueueFull | ErrorKind::ShuttingDown
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejections from [`FetchJob::parse`](crate::job::FetchJob::parse).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Failures from the execution context pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Timed out after {0:?} waiting for an execution context")]
    AcquireTimeout(std::time::Duration),
    #[error("Execution context launch timed out after {0:?}")]
    LaunchTimeout(std::time::Duration),
    #[error("Execution context launch failed: {0}")]
    Launch(#[from] BrowserError),
    #[error("Pool is shut down")]
    Closed,
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Closed => ErrorKind::ShuttingDown,
            PoolError::AcquireTimeout(_) | PoolError::LaunchTimeout(_) | PoolError::Launch(_) => {
                ErrorKind::LaunchTimeout
            }
        }
    }
}

/// Failures starting or talking to a browser process.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Browser executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Failed to launch browser: {0}")]
    Launch(String),
    #[error("Failed to connect to remote browser: {0}")]
    Remote(String),
    #[error("Unknown execution context {0}")]
    UnknownContext(String),
    #[error("Browser support not compiled. Rebuild with: cargo build --features browser")]
    Unsupported,
}

/// Failures during a single navigation.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("Navigation timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    /// The context itself is unusable (process gone, CDP channel closed).
    #[error("Execution context crashed: {0}")]
    Crashed(String),
}

impl NavigationError {
    /// Whether this failure says something about the health of the context
    /// rather than the target site.
    pub fn is_context_failure(&self) -> bool {
        matches!(self, NavigationError::Crashed(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NavigationError::Timeout => ErrorKind::Timeout,
            NavigationError::Network(_) | NavigationError::Crashed(_) => {
                ErrorKind::NavigationError
            }
        }
    }
}

/// Invalid settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
