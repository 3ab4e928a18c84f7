//! Configuration management for webacquire using the prefer crate.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::browser::BrowserEngineConfig;
use crate::error::ConfigError;
use crate::job::FetchOptions;
use crate::pool::PoolConfig;
use crate::queue::QueueConfig;

/// Top-level settings. Every section is optional in a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pool: PoolConfig,
    pub queue: QueueConfig,
    /// Defaults applied to jobs that don't set their own options.
    pub fetch: FetchOptions,
    pub browser: BrowserEngineConfig,

    /// File the settings were read from, if any.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Settings {
    /// Discover a `webacquire.{toml,yaml,json,...}` file, apply environment
    /// overrides and validate.
    pub async fn load() -> Result<Self, ConfigError> {
        // prefer handles discovery; parsing goes through serde
        let settings = match prefer::load("webacquire").await {
            Ok(found) => match found.source_path() {
                Some(path) => Self::read_file(path).await?,
                None => Self::default(),
            },
            Err(e) => {
                debug!("No config file found ({}), using defaults", e);
                Self::default()
            }
        };
        settings.finish()
    }

    /// Load from an explicit path. The format follows the file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::read_file(path).await?.finish()
    }

    async fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let shown = path.display().to_string();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: shown.clone(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_err = |message: String| ConfigError::Parse {
            path: shown.clone(),
            message,
        };

        let mut settings: Settings = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| parse_err(e.to_string()))?,
        };

        debug!("Loaded settings from {}", shown);
        settings.source_path = Some(path.to_path_buf());
        Ok(settings)
    }

    fn finish(self) -> Result<Self, ConfigError> {
        let settings = self.with_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `WEBACQUIRE_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("WEBACQUIRE_MAX_CONTEXTS") {
            self.pool.max_contexts = v;
        }
        if let Some(v) = env_parse("WEBACQUIRE_LAUNCH_TIMEOUT_MS") {
            self.pool.launch_timeout_ms = v;
        }
        if let Some(v) = env_parse("WEBACQUIRE_ACQUIRE_TIMEOUT_MS") {
            self.pool.acquire_timeout_ms = v;
        }
        if let Some(v) = env_parse("WEBACQUIRE_FAILURE_THRESHOLD") {
            self.pool.failure_threshold = v;
        }
        if let Some(v) = env_parse("WEBACQUIRE_COUNT_TIMEOUTS_AS_FAILURES") {
            self.pool.count_timeouts_as_failures = v;
        }
        if let Some(v) = env_parse("WEBACQUIRE_DRAIN_TIMEOUT_MS") {
            self.pool.drain_timeout_ms = v;
        }
        if let Some(v) = env_parse("WEBACQUIRE_MAX_CONCURRENCY") {
            self.queue.max_concurrency = v;
        }
        if let Some(v) = env_parse("WEBACQUIRE_MAX_QUEUE_SIZE") {
            self.queue.max_queue_size = v;
        }
        if let Some(v) = env_parse("WEBACQUIRE_REQUEST_DELAY_MS") {
            self.queue.request_delay_ms = v;
        }
        if let Some(v) = env_parse("WEBACQUIRE_TIMEOUT_MS") {
            self.fetch.timeout_ms = v;
        }
        if let Some(v) = env_parse("WEBACQUIRE_POST_LOAD_WAIT_MS") {
            self.fetch.post_load_wait_ms = v;
        }
        self.browser = self.browser.with_env_overrides();
        self
    }

    /// Reject settings the pool and queue cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_contexts == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_contexts must be at least 1".to_string(),
            ));
        }
        if self.pool.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "pool.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.queue.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.queue.max_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.queue.max_concurrency > self.pool.max_contexts {
            return Err(ConfigError::Invalid(format!(
                "queue.max_concurrency ({}) exceeds pool.max_contexts ({})",
                self.queue.max_concurrency, self.pool.max_contexts
            )));
        }
        if self.fetch.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "fetch.timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Render as TOML for display.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn write_config(ext: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{}", ext))
            .tempfile()
            .unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.pool.max_contexts, 4);
        assert_eq!(settings.pool.failure_threshold, 3);
        assert_eq!(settings.queue.max_queue_size, 100);
        assert_eq!(settings.queue.request_delay_ms, 1000);
        assert_eq!(settings.fetch.timeout_ms, 30_000);
    }

    #[tokio::test]
    async fn partial_toml_keeps_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let file = write_config(
            "toml",
            r#"
[pool]
max_contexts = 8

[queue]
max_concurrency = 6
request_delay_ms = 250
"#,
        );

        let settings = Settings::load_from_path(file.path()).await.unwrap();
        assert_eq!(settings.pool.max_contexts, 8);
        assert_eq!(settings.pool.acquire_timeout_ms, 60_000);
        assert_eq!(settings.queue.max_concurrency, 6);
        assert_eq!(settings.queue.request_delay_ms, 250);
        assert_eq!(settings.queue.max_queue_size, 100);
        assert_eq!(settings.source_path.as_deref(), Some(file.path()));
    }

    #[tokio::test]
    async fn yaml_and_json_by_extension() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let yaml = write_config("yaml", "fetch:\n  post_load_wait_ms: 500\n");
        let settings = Settings::load_from_path(yaml.path()).await.unwrap();
        assert_eq!(settings.fetch.post_load_wait_ms, 500);

        let json = write_config("json", r#"{"browser": {"headless": false}}"#);
        let settings = Settings::load_from_path(json.path()).await.unwrap();
        assert!(!settings.browser.headless);
    }

    #[tokio::test]
    async fn parse_error_names_the_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let file = write_config("toml", "[pool\nmax_contexts = ");
        let err = Settings::load_from_path(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let err = Settings::load_from_path(Path::new("/nonexistent/webacquire.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn concurrency_above_pool_capacity_is_rejected() {
        let mut settings = Settings::default();
        settings.pool.max_contexts = 2;
        settings.queue.max_concurrency = 3;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut settings = Settings::default();
        settings.pool.failure_threshold = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let _guard = ENV_MUTEX.lock().unwrap();

        std::env::set_var("WEBACQUIRE_MAX_CONTEXTS", "6");
        std::env::set_var("WEBACQUIRE_REQUEST_DELAY_MS", "2500");
        std::env::set_var("WEBACQUIRE_MAX_QUEUE_SIZE", "not-a-number");

        let settings = Settings::default().with_env_overrides();
        assert_eq!(settings.pool.max_contexts, 6);
        assert_eq!(settings.queue.request_delay_ms, 2500);
        assert_eq!(settings.queue.max_queue_size, 100);

        std::env::remove_var("WEBACQUIRE_MAX_CONTEXTS");
        std::env::remove_var("WEBACQUIRE_REQUEST_DELAY_MS");
        std::env::remove_var("WEBACQUIRE_MAX_QUEUE_SIZE");
    }

    #[test]
    fn shutdown_and_timeout_policy_env_overrides_apply() {
        let _guard = ENV_MUTEX.lock().unwrap();

        std::env::set_var("WEBACQUIRE_COUNT_TIMEOUTS_AS_FAILURES", "false");
        std::env::set_var("WEBACQUIRE_DRAIN_TIMEOUT_MS", "2500");

        let settings = Settings::default().with_env_overrides();
        assert!(!settings.pool.count_timeouts_as_failures);
        assert_eq!(settings.pool.drain_timeout_ms, 2500);

        std::env::remove_var("WEBACQUIRE_COUNT_TIMEOUTS_AS_FAILURES");
        std::env::remove_var("WEBACQUIRE_DRAIN_TIMEOUT_MS");
    }

    #[test]
    fn browser_env_overrides_apply() {
        let _guard = ENV_MUTEX.lock().unwrap();

        std::env::set_var("BROWSER_URL", " ws://localhost:9222 ");
        std::env::set_var("WEBACQUIRE_BROWSER_HEADLESS", "false");

        let settings = Settings::default().with_env_overrides();
        assert_eq!(
            settings.browser.remote_url.as_deref(),
            Some("ws://localhost:9222")
        );
        assert!(!settings.browser.headless);

        std::env::remove_var("BROWSER_URL");
        std::env::remove_var("WEBACQUIRE_BROWSER_HEADLESS");
    }

    #[test]
    fn renders_as_toml() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("[pool]"));
        assert!(rendered.contains("max_contexts = 4"));
        assert!(!rendered.contains("source_path"));
    }
}
