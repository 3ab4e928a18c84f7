//! Fetch jobs and their results.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::detect::BlockKind;
use crate::error::{ErrorKind, JobError};

/// Per-job timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// Hard navigation deadline.
    pub timeout_ms: u64,
    /// Extra settle time after load for script-rendered pages.
    pub post_load_wait_ms: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            post_load_wait_ms: 0,
        }
    }
}

/// A validated, immutable fetch request.
///
/// Construction goes through [`FetchJob::parse`], so a `FetchJob` always
/// holds an absolute http(s) URL with a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    url: Url,
    host: String,
    options: FetchOptions,
}

impl FetchJob {
    /// Parse and validate a raw URL.
    pub fn parse(raw: &str, options: FetchOptions) -> Result<Self, JobError> {
        let invalid = |reason: &str| JobError::InvalidUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .to_ascii_lowercase();

        Ok(Self { url, host, options })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Lowercased host used as the throttle key.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn options(&self) -> FetchOptions {
        self.options
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.options.timeout_ms)
    }

    pub fn post_load_wait(&self) -> Duration {
        Duration::from_millis(self.options.post_load_wait_ms)
    }
}

/// Outcome of a fetch. Exactly one of `success` with content or
/// `error_kind` is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    pub success: bool,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplified_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_kind: Option<BlockKind>,
}

impl FetchResult {
    /// Successful fetch with extracted content.
    pub fn success(url: &str, page: PageContent, elapsed: Duration) -> Self {
        Self {
            success: true,
            url: url.to_string(),
            final_url: Some(page.final_url),
            status_code: page.status_code,
            html: Some(page.html),
            simplified_text: Some(page.simplified_text),
            title: page.title,
            elapsed_ms: millis(elapsed),
            error_kind: None,
            error: None,
            blocked: false,
            block_kind: None,
        }
    }

    /// Failed fetch.
    pub fn failure(url: &str, kind: ErrorKind, elapsed: Duration) -> Self {
        Self {
            success: false,
            url: url.to_string(),
            final_url: None,
            status_code: None,
            html: None,
            simplified_text: None,
            title: None,
            elapsed_ms: millis(elapsed),
            error_kind: Some(kind),
            error: None,
            blocked: false,
            block_kind: None,
        }
    }

    /// Terminal blocked outcome.
    pub fn blocked(
        url: &str,
        kind: BlockKind,
        status_code: Option<u16>,
        final_url: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            blocked: true,
            block_kind: Some(kind),
            status_code,
            final_url,
            error: Some(format!("Blocked by anti-automation defense ({})", kind)),
            ..Self::failure(url, ErrorKind::Blocked, elapsed)
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn with_status(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }

    /// HTTP status for a request/response layer.
    ///
    /// Navigation failures against a missing page or an unresolvable host
    /// answer 404; other failures follow [`ErrorKind::http_status`].
    pub fn http_status(&self) -> u16 {
        match self.error_kind {
            None => 200,
            Some(ErrorKind::NavigationError) if self.is_not_found() => 404,
            Some(kind) => kind.http_status(),
        }
    }

    fn is_not_found(&self) -> bool {
        self.status_code == Some(404)
            || self
                .error
                .as_deref()
                .is_some_and(|e| e.contains("ERR_NAME_NOT_RESOLVED"))
    }
}

/// Content pulled from a page that passed block detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub final_url: String,
    pub status_code: Option<u16>,
    pub html: String,
    pub title: Option<String>,
    pub simplified_text: String,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
