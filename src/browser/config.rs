//! Browser engine configuration types.

use serde::{Deserialize, Serialize};

/// Browser engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    /// Set to false for debugging.
    pub headless: bool,

    /// Explicit Chrome/Chromium executable. Auto-discovered when unset.
    pub executable: Option<String>,

    /// Additional Chrome arguments.
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, each context is a fresh CDP session on that browser
    /// instead of a locally launched process.
    pub remote_url: Option<String>,

    /// CDP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            chrome_args: Vec::new(),
            remote_url: None,
            request_timeout_secs: 30,
        }
    }
}

impl BrowserEngineConfig {
    /// Apply `WEBACQUIRE_BROWSER_*` / `BROWSER_URL` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("BROWSER_URL") {
            let url = url.trim();
            if !url.is_empty() {
                self.remote_url = Some(url.to_string());
            }
        }
        if let Ok(path) = std::env::var("WEBACQUIRE_BROWSER_EXECUTABLE") {
            if !path.trim().is_empty() {
                self.executable = Some(path.trim().to_string());
            }
        }
        if let Ok(val) = std::env::var("WEBACQUIRE_BROWSER_HEADLESS") {
            self.headless = !(val == "0" || val.eq_ignore_ascii_case("false"));
        }
        self
    }
}
