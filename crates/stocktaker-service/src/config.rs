use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
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
    /// The log level for stocktaker.
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
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A tag name to report the environment to, for each metric. Defaults to not sending such a tag.
    pub environment_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "stocktaker".into(),
            hostname_tag: None,
            environment_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Fine-tuning the catalog lookup caches (models and colors).
///
/// These differ from [`DashboardCacheConfig`] in the [`Default`] implementation.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CatalogCacheConfig {
    /// How long a computed lookup is served before it is recomputed.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Number of keys above which a warning is logged. Entries are never evicted because of it.
    pub max_keys: Option<usize>,

    /// Maximum time a request waits for an in-flight computation.
    ///
    /// The computation itself is not cancelled when a waiter gives up.
    #[serde(with = "humantime_serde")]
    pub join_timeout: Option<Duration>,
}

impl Default for CatalogCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_keys: Some(10_000),
            join_timeout: None,
        }
    }
}

/// Fine-tuning the dashboard cache.
///
/// These differ from [`CatalogCacheConfig`] in the [`Default`] implementation.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct DashboardCacheConfig {
    /// How long computed dashboard numbers are served before they are recomputed.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Maximum time a request waits for an in-flight computation.
    #[serde(with = "humantime_serde")]
    pub join_timeout: Option<Duration>,
}

impl Default for DashboardCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            join_timeout: None,
        }
    }
}

/// The settings of a single cache instance.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CacheConfig {
    Catalog(CatalogCacheConfig),
    Dashboard(DashboardCacheConfig),
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        match self {
            Self::Catalog(cfg) => cfg.ttl,
            Self::Dashboard(cfg) => cfg.ttl,
        }
    }

    pub fn max_keys(&self) -> Option<usize> {
        match self {
            Self::Catalog(cfg) => cfg.max_keys,
            Self::Dashboard(_) => None,
        }
    }

    pub fn join_timeout(&self) -> Option<Duration> {
        match self {
            Self::Catalog(cfg) => cfg.join_timeout,
            Self::Dashboard(cfg) => cfg.join_timeout,
        }
    }
}

impl From<CatalogCacheConfig> for CacheConfig {
    fn from(source: CatalogCacheConfig) -> Self {
        Self::Catalog(source)
    }
}

impl From<DashboardCacheConfig> for CacheConfig {
    fn from(source: DashboardCacheConfig) -> Self {
        Self::Dashboard(source)
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfigs {
    /// Configure the cache of distinct phone models.
    pub models: CatalogCacheConfig,
    /// Configure the cache of distinct colors per model.
    pub colors: CatalogCacheConfig,
    /// Configure the cache of dashboard summaries.
    pub dashboard: DashboardCacheConfig,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Fine-tune cache expiry
    pub caches: CacheConfigs,
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
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config() {
        // It should be possible to set individual caches in reasonable units without
        // affecting other caches' default values.
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.caches.dashboard.ttl, Duration::from_secs(60));
        assert_eq!(cfg.caches.models.ttl, Duration::from_secs(600));

        let yaml = r#"
            caches:
              dashboard:
                ttl: 5s
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.caches.dashboard.ttl, Duration::from_secs(5));
        assert_eq!(cfg.caches.dashboard.join_timeout, None);
        assert_eq!(cfg.caches.models, CatalogCacheConfig::default());
        assert_eq!(cfg.caches.colors, CatalogCacheConfig::default());

        let yaml = r#"
            caches:
              colors:
                join_timeout: 250ms
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.caches.colors.join_timeout,
            Some(Duration::from_millis(250))
        );
        assert_eq!(cfg.caches.colors.ttl, Duration::from_secs(600));
        assert_eq!(cfg.caches.colors.max_keys, Some(10_000));
        assert_eq!(cfg.caches.dashboard, DashboardCacheConfig::default());
    }

    #[test]
    fn test_disabling_key_hint() {
        let yaml = r#"
            caches:
              models:
                max_keys: null
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.caches.models.max_keys, None);
        assert_eq!(CacheConfig::from(cfg.caches.models).max_keys(), None);
    }

    #[test]
    fn test_logging_config() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert!(cfg.logging.enable_backtraces);

        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_empty_config_file() {
        let err = Config::from_reader("  \n".as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "config file empty");
    }

    #[test]
    fn test_config_snapshot() {
        let yaml = r#"
            metrics:
              statsd: 127.0.0.1:8125
              prefix: inventory
              custom_tags:
                region: eu
            caches:
              models:
                ttl: 2m
                max_keys: 500
              dashboard:
                join_timeout: 1s
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        insta::assert_debug_snapshot!(cfg.caches, @r###"
        CacheConfigs {
            models: CatalogCacheConfig {
                ttl: 120s,
                max_keys: Some(
                    500,
                ),
                join_timeout: None,
            },
            colors: CatalogCacheConfig {
                ttl: 600s,
                max_keys: Some(
                    10000,
                ),
                join_timeout: None,
            },
            dashboard: DashboardCacheConfig {
                ttl: 60s,
                join_timeout: Some(
                    1s,
                ),
            },
        }
        "###);
        assert_eq!(cfg.metrics.prefix, "inventory");
        assert_eq!(cfg.metrics.custom_tags["region"], "eu");
    }
}
