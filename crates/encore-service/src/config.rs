use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "encore".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Where and how to reach the backend.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend API. Resource paths are resolved relative to it.
    pub url: String,

    /// Credential sent as a bearer token with every request.
    pub auth_token: Option<String>,

    /// Path of the readiness endpoint, relative to `url`.
    pub health_path: String,

    /// The timeout for establishing a connection.
    ///
    /// This applies to each individual attempt. The overall time a request may take is governed
    /// by the per-resource timeouts.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// How long idle pooled connections are kept around.
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/".into(),
            auth_token: None,
            health_path: "health".into(),
            connect_timeout: Duration::from_secs(2),
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Fine-tuning of the in-memory caches.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a successfully fetched value is served without asking the backend again.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How many last-known-good values are kept per resource for stale fallbacks.
    pub stale_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            stale_capacity: 1_000,
        }
    }
}

/// Controls the one-time readiness probe that absorbs the backend's cold start.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct WarmupConfig {
    /// When disabled, requests go out without waiting for a probe.
    pub enabled: bool,

    /// Number of probe attempts before giving up and letting requests through anyway.
    pub max_attempts: u32,

    /// Delay after the first failed probe. It doubles after every further failure.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Timeout of a single probe.
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// How a single resource is fetched from the backend.
///
/// Fields omitted from a config file take the values of [`FetchPolicy::default`], not those of
/// the resource-specific defaults.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct FetchPolicy {
    /// Timeout of a single network attempt.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Total number of attempts, including the first one.
    pub attempts: u32,

    /// Fixed delay between attempts.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Whether an expired last-known-good value is an acceptable fallback.
    pub serve_stale: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            attempts: 2,
            retry_delay: Duration::from_secs(1),
            serve_stale: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ResourceConfigs {
    /// Single artist profiles.
    pub artist_profile: FetchPolicy,

    /// The list of popular artists.
    pub popular_artists: FetchPolicy,

    /// Timeout of a mutation. Mutations are never retried.
    #[serde(with = "humantime_serde")]
    pub mutation_timeout: Duration,
}

impl Default for ResourceConfigs {
    fn default() -> Self {
        Self {
            artist_profile: FetchPolicy::default(),
            popular_artists: FetchPolicy {
                timeout: Duration::from_secs(8),
                ..FetchPolicy::default()
            },
            mutation_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// The backend to talk to.
    pub backend: BackendConfig,

    /// In-memory cache settings.
    pub cache: CacheConfig,

    /// The cold-start readiness probe.
    pub warmup: WarmupConfig,

    /// Per-resource fetch policies.
    pub resources: ResourceConfigs,

    /// A directory with one JSON document per resource key, used as a read-only last resort
    /// when neither the cache nor the backend can provide a value.
    pub fallback_dir: Option<PathBuf>,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    let level = String::deserialize(deserializer)?;
    LevelFilter::from_str(&level).map_err(serde::de::Error::custom)
}
