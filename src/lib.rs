//! webacquire - browser-backed page acquisition.
//!
//! Fetches pages through a bounded pool of headless browser contexts,
//! spaces requests to the same host, and reports anti-automation blocks
//! as terminal results instead of working around them.

pub mod browser;
pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod job;
pub mod orchestrator;
pub mod pool;
pub mod queue;

pub use browser::{BrowserBackend, ChromiumBackend, ContextId};
pub use config::Settings;
pub use detect::{BlockKind, Verdict};
pub use error::ErrorKind;
pub use job::{FetchJob, FetchOptions, FetchResult};
pub use orchestrator::FetchOrchestrator;
pub use pool::{ContextPool, ReleaseOutcome};
pub use queue::{DrainOutcome, QueueStats, RequestQueue};
