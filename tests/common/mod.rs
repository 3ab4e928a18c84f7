//! Scripted in-memory browser backend for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use webacquire::browser::{BrowserBackend, ContextId, NavigationInfo, PageSnapshot};
use webacquire::error::{BrowserError, NavigationError};
use webacquire::pool::{ContextPool, PoolConfig};

/// What a navigation to a URL does.
#[derive(Debug, Clone)]
pub enum Behavior {
    Load,
    /// Never finishes loading.
    Hang,
    /// The context dies mid-navigation.
    Crash,
    Network(String),
}

#[derive(Debug, Clone)]
pub struct Script {
    pub behavior: Behavior,
    pub status: Option<u16>,
    pub html: String,
    pub final_url: Option<String>,
    pub delay: Duration,
}

impl Script {
    pub fn ok(html: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::Load,
            status: Some(200),
            html: html.into(),
            final_url: None,
            delay: Duration::from_millis(50),
        }
    }

    pub fn status(code: u16, html: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            ..Self::ok(html)
        }
    }

    pub fn hang() -> Self {
        Self {
            behavior: Behavior::Hang,
            ..Self::ok("")
        }
    }

    pub fn crash() -> Self {
        Self {
            behavior: Behavior::Crash,
            ..Self::ok("")
        }
    }

    pub fn network(message: &str) -> Self {
        Self {
            behavior: Behavior::Network(message.to_string()),
            ..Self::ok("")
        }
    }

    pub fn redirect_to(mut self, final_url: &str) -> Self {
        self.final_url = Some(final_url.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// One recorded `navigate` call.
#[derive(Debug, Clone)]
pub struct Navigation {
    pub url: String,
    pub context: ContextId,
    pub at: Instant,
}

#[derive(Default)]
struct BackendState {
    next_id: u64,
    launched: u64,
    live: HashSet<ContextId>,
    closed: Vec<ContextId>,
    navigating: HashSet<ContextId>,
    in_flight: usize,
    max_in_flight: usize,
    double_use: bool,
    loaded: HashMap<ContextId, PageSnapshot>,
    navigations: Vec<Navigation>,
    failing_launches: usize,
}

pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, Script>>,
    fallback: Script,
    launch_delay: Mutex<Duration>,
    state: Mutex<BackendState>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Script::ok(page("Fixture", "<p>Fixture content.</p>")),
            launch_delay: Mutex::new(Duration::from_millis(10)),
            state: Mutex::new(BackendState::default()),
        })
    }

    /// Script the response for `url`. Unscripted URLs load a plain page.
    pub fn script(&self, url: &str, script: Script) -> &Self {
        let key = Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string());
        self.scripts.lock().unwrap().insert(key, script);
        self
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock().unwrap() = delay;
    }

    /// Make the next `n` launches fail.
    pub fn fail_launches(&self, n: usize) {
        self.state.lock().unwrap().failing_launches = n;
    }

    pub fn launched(&self) -> u64 {
        self.state.lock().unwrap().launched
    }

    pub fn live(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn closed(&self) -> Vec<ContextId> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn navigations(&self) -> Vec<Navigation> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn navigations_to(&self, url: &str) -> Vec<Navigation> {
        let key = Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string());
        self.navigations()
            .into_iter()
            .filter(|n| n.url == key)
            .collect()
    }

    /// Highest number of navigations that were running at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    /// Whether a context was ever navigated by two callers at once.
    pub fn double_use(&self) -> bool {
        self.state.lock().unwrap().double_use
    }

    fn script_for(&self, url: &Url) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Clears the in-flight markers when a navigation ends or is abandoned.
struct InFlight<'a> {
    backend: &'a ScriptedBackend,
    context: ContextId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.backend.state.lock().unwrap();
        state.navigating.remove(&self.context);
        state.in_flight -= 1;
    }
}

#[async_trait]
impl BrowserBackend for ScriptedBackend {
    async fn launch_context(&self) -> Result<ContextId, BrowserError> {
        let delay = *self.launch_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        let mut state = self.state.lock().unwrap();
        if state.failing_launches > 0 {
            state.failing_launches -= 1;
            return Err(BrowserError::Launch("scripted launch failure".to_string()));
        }
        state.next_id += 1;
        state.launched += 1;
        let id = ContextId::from(format!("ctx-{}", state.next_id));
        state.live.insert(id.clone());
        Ok(id)
    }

    async fn navigate(
        &self,
        context: &ContextId,
        url: &Url,
        _timeout: Duration,
    ) -> Result<NavigationInfo, NavigationError> {
        let script = self.script_for(url);
        let _in_flight = {
            let mut state = self.state.lock().unwrap();
            if !state.live.contains(context) {
                return Err(NavigationError::Crashed(format!("context {} is closed", context)));
            }
            if !state.navigating.insert(context.clone()) {
                state.double_use = true;
            }
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.navigations.push(Navigation {
                url: url.to_string(),
                context: context.clone(),
                at: Instant::now(),
            });
            InFlight {
                backend: self,
                context: context.clone(),
            }
        };

        tokio::time::sleep(script.delay).await;

        match script.behavior {
            Behavior::Hang => std::future::pending().await,
            Behavior::Crash => Err(NavigationError::Crashed("renderer crashed".to_string())),
            Behavior::Network(message) => Err(NavigationError::Network(message)),
            Behavior::Load => {
                let snapshot = PageSnapshot {
                    final_url: script.final_url.unwrap_or_else(|| url.to_string()),
                    status_code: script.status,
                    html: script.html,
                };
                self.state
                    .lock()
                    .unwrap()
                    .loaded
                    .insert(context.clone(), snapshot);
                Ok(NavigationInfo {
                    status_code: script.status,
                })
            }
        }
    }

    async fn get_content(&self, context: &ContextId) -> Result<PageSnapshot, NavigationError> {
        self.state
            .lock()
            .unwrap()
            .loaded
            .remove(context)
            .ok_or_else(|| NavigationError::Crashed("no page loaded".to_string()))
    }

    async fn close_context(&self, context: &ContextId) {
        let mut state = self.state.lock().unwrap();
        if state.live.remove(context) {
            state.closed.push(context.clone());
        }
        state.loaded.remove(context);
    }
}

pub fn page(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{}</title></head><body>{}</body></html>",
        title, body
    )
}

pub fn pool_config(max_contexts: usize) -> PoolConfig {
    PoolConfig {
        max_contexts,
        ..PoolConfig::default()
    }
}

pub fn pool(backend: &Arc<ScriptedBackend>, config: PoolConfig) -> ContextPool<ScriptedBackend> {
    ContextPool::new(backend.clone(), config)
}
