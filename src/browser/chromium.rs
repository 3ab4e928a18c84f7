//! chromiumoxide-backed execution contexts.
//!
//! Each context is its own browser process with a private profile
//! directory, or, when `remote_url` is configured, its own CDP session
//! against an already running browser.

use super::BrowserEngineConfig;

#[cfg(feature = "browser")]
pub use enabled::ChromiumBackend;

#[cfg(not(feature = "browser"))]
pub use disabled::ChromiumBackend;

#[cfg(feature = "browser")]
mod enabled {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;
    use tracing::{debug, info, warn};
    use url::Url;

    use super::BrowserEngineConfig;
    use crate::browser::{
        classify_navigation_error, BrowserBackend, ContextId, NavigationInfo, PageSnapshot,
    };
    use crate::error::{BrowserError, NavigationError};

    /// Reads the main document status from the Navigation Timing API.
    const STATUS_SCRIPT: &str = r#"
        (() => {
            const entry = performance.getEntriesByType('navigation')[0];
            return entry && entry.responseStatus ? entry.responseStatus : 0;
        })()
    "#;

    /// Grace period for a browser process to exit after `Browser.close`.
    const CLOSE_GRACE: Duration = Duration::from_secs(5);

    struct LoadedPage {
        page: Page,
        status: Option<u16>,
    }

    struct ChromiumContext {
        browser: Mutex<Browser>,
        page: Mutex<Option<LoadedPage>>,
        handler: JoinHandle<()>,
        user_data_dir: Option<PathBuf>,
        remote: bool,
    }

    /// Browser backend launching one Chrome process per execution context.
    pub struct ChromiumBackend {
        config: BrowserEngineConfig,
        contexts: Mutex<HashMap<ContextId, Arc<ChromiumContext>>>,
    }

    impl ChromiumBackend {
        /// Common Chrome executable paths to check.
        const CHROME_PATHS: &'static [&'static str] = &[
            // Linux
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            // macOS
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            // Common install locations
            "/opt/google/chrome/google-chrome",
        ];

        /// Create a backend. Nothing is launched until the pool asks.
        pub fn new(config: BrowserEngineConfig) -> Self {
            Self {
                config,
                contexts: Mutex::new(HashMap::new()),
            }
        }

        /// Find Chrome executable.
        fn find_chrome(&self) -> Result<PathBuf, BrowserError> {
            if let Some(ref configured) = self.config.executable {
                let expanded = shellexpand::tilde(configured);
                let path = Path::new(expanded.as_ref());
                if path.exists() {
                    return Ok(path.to_path_buf());
                }
                if let Ok(found) = which::which(configured) {
                    return Ok(found);
                }
                return Err(BrowserError::ExecutableNotFound(configured.clone()));
            }

            for path in Self::CHROME_PATHS {
                let p = Path::new(path);
                if p.exists() {
                    debug!("Found Chrome at: {}", path);
                    return Ok(p.to_path_buf());
                }
            }

            for cmd in [
                "google-chrome",
                "google-chrome-stable",
                "chromium",
                "chromium-browser",
            ] {
                if let Ok(path) = which::which(cmd) {
                    debug!("Found Chrome in PATH: {}", path.display());
                    return Ok(path);
                }
            }

            Err(BrowserError::ExecutableNotFound(
                "Chrome/Chromium not found. Install chromium or set browser.executable".to_string(),
            ))
        }

        async fn launch_local(&self, id: &ContextId) -> Result<ChromiumContext, BrowserError> {
            let chrome_path = self.find_chrome()?;
            let user_data_dir = std::env::temp_dir().join(format!("webacquire-{}", id));

            info!(
                "Launching browser context {} (headless={})",
                id, self.config.headless
            );

            let mut builder = BrowserConfig::builder()
                .chrome_executable(chrome_path)
                .user_data_dir(&user_data_dir)
                .request_timeout(Duration::from_secs(self.config.request_timeout_secs));

            // with_head means NOT headless
            if !self.config.headless {
                builder = builder.with_head();
            }

            builder = builder
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--disable-background-networking")
                .arg("--disable-sync")
                .arg("--disable-translate")
                .arg("--no-sandbox") // Often needed for headless in containers
                .arg("--disable-gpu");

            for arg in &self.config.chrome_args {
                builder = builder.arg(arg);
            }

            let config = builder
                .build()
                .map_err(|e| BrowserError::Launch(format!("invalid browser config: {}", e)))?;

            let (browser, handler) = Browser::launch(config)
                .await
                .map_err(|e| BrowserError::Launch(e.to_string()))?;

            Ok(ChromiumContext {
                browser: Mutex::new(browser),
                page: Mutex::new(None),
                handler: spawn_handler(handler),
                user_data_dir: Some(user_data_dir),
                remote: false,
            })
        }

        /// Connect a new CDP session to a remote Chrome instance.
        async fn connect_remote(&self, url: &str) -> Result<ChromiumContext, BrowserError> {
            // Get WebSocket URL from the /json/version endpoint
            let http_url = url
                .replace("ws://", "http://")
                .replace("wss://", "https://");
            let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

            let client = reqwest::Client::new();
            let resp: serde_json::Value = client
                .get(&version_url)
                .send()
                .await
                .map_err(|e| BrowserError::Remote(e.to_string()))?
                .json()
                .await
                .map_err(|e| BrowserError::Remote(format!("bad version info: {}", e)))?;

            let ws_url = resp
                .get("webSocketDebuggerUrl")
                .and_then(|v| v.as_str())
                .ok_or_else(|| BrowserError::Remote("no webSocketDebuggerUrl in response".into()))?;

            debug!("Connecting to WebSocket: {}", ws_url);

            let handler_config = chromiumoxide::handler::HandlerConfig {
                request_timeout: Duration::from_secs(self.config.request_timeout_secs),
                ..Default::default()
            };

            let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
                .await
                .map_err(|e| BrowserError::Remote(e.to_string()))?;

            Ok(ChromiumContext {
                browser: Mutex::new(browser),
                page: Mutex::new(None),
                handler: spawn_handler(handler),
                user_data_dir: None,
                remote: true,
            })
        }

        async fn context(&self, id: &ContextId) -> Result<Arc<ChromiumContext>, NavigationError> {
            self.contexts
                .lock()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| NavigationError::Crashed(format!("unknown context {}", id)))
        }
    }

    fn spawn_handler<H, E>(mut handler: H) -> JoinHandle<()>
    where
        H: futures::Stream<Item = Result<(), E>> + Unpin + Send + 'static,
        E: Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        })
    }

    #[async_trait]
    impl BrowserBackend for ChromiumBackend {
        async fn launch_context(&self) -> Result<ContextId, BrowserError> {
            let id = ContextId::generate();
            let context = match self.config.remote_url.clone() {
                Some(remote) => self.connect_remote(&remote).await?,
                None => self.launch_local(&id).await?,
            };
            self.contexts.lock().await.insert(id.clone(), Arc::new(context));
            Ok(id)
        }

        async fn navigate(
            &self,
            context: &ContextId,
            url: &Url,
            _timeout: Duration,
        ) -> Result<NavigationInfo, NavigationError> {
            let ctx = self.context(context).await?;

            // A cancelled navigation leaves its tab behind; close it first.
            if let Some(stale) = ctx.page.lock().await.take() {
                let _ = stale.page.close().await;
            }

            let page = {
                let browser = ctx.browser.lock().await;
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| NavigationError::Crashed(e.to_string()))?
            };
            *ctx.page.lock().await = Some(LoadedPage {
                page: page.clone(),
                status: None,
            });

            debug!("Navigating context {} to {}", context, url);
            page.goto(url.as_str())
                .await
                .map_err(|e| classify_navigation_error(&e.to_string()))?;

            let status = match page.evaluate(STATUS_SCRIPT.to_string()).await {
                Ok(result) => result.into_value::<u16>().ok().filter(|s| *s > 0),
                Err(e) => {
                    debug!("Could not read navigation status: {}", e);
                    None
                }
            };
            if let Some(loaded) = ctx.page.lock().await.as_mut() {
                loaded.status = status;
            }

            Ok(NavigationInfo {
                status_code: status,
            })
        }

        async fn get_content(&self, context: &ContextId) -> Result<PageSnapshot, NavigationError> {
            let ctx = self.context(context).await?;
            let loaded = ctx
                .page
                .lock()
                .await
                .take()
                .ok_or_else(|| NavigationError::Crashed("no page loaded".to_string()))?;

            let final_url = loaded.page.url().await.ok().flatten().unwrap_or_default();
            let html = loaded.page.content().await;

            // Close the page to prevent tab accumulation
            let _ = loaded.page.close().await;

            Ok(PageSnapshot {
                final_url,
                status_code: loaded.status,
                html: html.map_err(|e| classify_navigation_error(&e.to_string()))?,
            })
        }

        async fn close_context(&self, context: &ContextId) {
            let Some(ctx) = self.contexts.lock().await.remove(context) else {
                return;
            };

            if let Some(loaded) = ctx.page.lock().await.take() {
                let _ = loaded.page.close().await;
            }

            if !ctx.remote {
                let mut browser = ctx.browser.lock().await;
                let closed = tokio::time::timeout(CLOSE_GRACE, async {
                    let _ = browser.close().await;
                    browser.wait().await
                })
                .await;
                if closed.is_err() {
                    warn!("Browser context {} did not exit, killing", context);
                    if let Some(Err(e)) = browser.kill().await {
                        warn!("Failed to kill browser context {}: {}", context, e);
                    }
                }
            }
            ctx.handler.abort();

            if let Some(ref dir) = ctx.user_data_dir {
                if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                    debug!("Could not remove profile dir {}: {}", dir.display(), e);
                }
            }
            debug!("Closed browser context {}", context);
        }
    }
}

#[cfg(not(feature = "browser"))]
mod disabled {
    use std::time::Duration;

    use async_trait::async_trait;
    use url::Url;

    use super::BrowserEngineConfig;
    use crate::browser::{BrowserBackend, ContextId, NavigationInfo, PageSnapshot};
    use crate::error::{BrowserError, NavigationError};

    /// Stub for when the browser feature is disabled.
    pub struct ChromiumBackend {
        _config: BrowserEngineConfig,
    }

    impl ChromiumBackend {
        pub fn new(config: BrowserEngineConfig) -> Self {
            Self { _config: config }
        }
    }

    #[async_trait]
    impl BrowserBackend for ChromiumBackend {
        async fn launch_context(&self) -> Result<ContextId, BrowserError> {
            Err(BrowserError::Unsupported)
        }

        async fn navigate(
            &self,
            _context: &ContextId,
            _url: &Url,
            _timeout: Duration,
        ) -> Result<NavigationInfo, NavigationError> {
            Err(NavigationError::Crashed(BrowserError::Unsupported.to_string()))
        }

        async fn get_content(&self, _context: &ContextId) -> Result<PageSnapshot, NavigationError> {
            Err(NavigationError::Crashed(BrowserError::Unsupported.to_string()))
        }

        async fn close_context(&self, _context: &ContextId) {}
    }
}
