//! Relay configuration.

use std::str::FromStr;
use std::time::Duration;

use parley_daemon::{DaemonClient, DEFAULT_DAEMON_URL, DEFAULT_HEALTH_TIMEOUT, DEFAULT_IDLE_TIMEOUT};

/// Default validity window of a catalog refresh.
pub const DEFAULT_CATALOG_REFRESH: Duration = Duration::from_secs(30);

/// Default interval between background health checks.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// What [`ChatSession::reset`](crate::ChatSession::reset) does with the
/// session's settings.
///
/// The transcript is always cleared. With `KeepConfig` (the default) the
/// selected model, temperature, token limit, system prompt and streaming
/// flag survive the reset; with `RestoreDefaults` they are reseeded from
/// the defaults the session was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetPolicy {
    #[default]
    KeepConfig,
    RestoreDefaults,
}

impl FromStr for ResetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keep" | "keep-config" => Ok(ResetPolicy::KeepConfig),
            "defaults" | "restore-defaults" => Ok(ResetPolicy::RestoreDefaults),
            other => Err(format!(
                "unknown reset policy '{}', expected 'keep' or 'defaults'",
                other
            )),
        }
    }
}

/// Configuration shared by the catalog, the connectivity monitor and every
/// chat session of one process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Daemon base URL
    pub base_url: String,
    /// Time without any data before a request is abandoned
    pub idle_timeout: Duration,
    /// Catalog refresh cadence; older snapshots are stale
    pub catalog_refresh: Duration,
    /// Interval between background health checks
    pub health_interval: Duration,
    /// Request timeout of a single health check
    pub health_timeout: Duration,
    pub reset_policy: ResetPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DAEMON_URL.to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            catalog_refresh: DEFAULT_CATALOG_REFRESH,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            reset_policy: ResetPolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let base_url = lookup("PARLEY_DAEMON_URL")
            .or_else(|| lookup("OLLAMA_HOST"))
            .filter(|v| !v.trim().is_empty())
            .map(|v| normalize_url(&v))
            .unwrap_or(defaults.base_url);

        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        let reset_policy = lookup("PARLEY_RESET_POLICY")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.reset_policy);

        Self {
            base_url,
            idle_timeout: secs("PARLEY_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            catalog_refresh: secs("PARLEY_CATALOG_REFRESH_SECS", defaults.catalog_refresh),
            health_interval: secs("PARLEY_HEALTH_INTERVAL_SECS", defaults.health_interval),
            health_timeout: secs("PARLEY_HEALTH_TIMEOUT_SECS", defaults.health_timeout),
            reset_policy,
        }
    }

    /// Same config pointed at another daemon.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = normalize_url(&url.into());
        self
    }

    /// Build a daemon client honoring this config's URL and timeouts.
    pub fn client(&self) -> DaemonClient {
        DaemonClient::with_url(&self.base_url)
            .with_idle_timeout(self.idle_timeout)
            .with_health_timeout(self.health_timeout)
    }

    /// Create a builder for configuration.
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }
}

/// `OLLAMA_HOST` is often given as a bare `host:port`.
fn normalize_url(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('/');
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    }
}

/// Builder for relay configuration.
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = normalize_url(&url.into());
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn catalog_refresh(mut self, interval: Duration) -> Self {
        self.config.catalog_refresh = interval;
        self
    }

    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.config.health_interval = interval;
        self
    }

    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.config.health_timeout = timeout;
        self
    }

    pub fn reset_policy(mut self, policy: ResetPolicy) -> Self {
        self.config.reset_policy = policy;
        self
    }

    pub fn build(self) -> RelayConfig {
        self.config
    }
}
